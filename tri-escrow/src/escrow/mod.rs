//! The escrow state machine.
//!
//! [`EscrowStateMachine`] records deals, deploys one settlement wallet per
//! deal through its [`WalletFactory`], and drives each deal through
//!
//! ```text
//! AWAITING_PAYMENT -> AWAITING_DELIVERY -> COMPLETE | CANCELED
//!                                       -> DISPUTED -> COMPLETE | REFUNDED
//! ```
//!
//! Every transition has one internal implementation that takes an already
//! resolved actor. Direct entry points use the caller; signed entry points
//! recover the actor from an EIP-712 signature, then check the deadline, the
//! escrow nonce and the used-signature registry before applying the same
//! transition.
//!
//! The machine never holds tokens: deposits go straight from the buyer to the
//! deal's wallet, and only the wallet pays out.

pub mod access;
pub mod events;
pub mod fees;
mod types;

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
#[cfg(feature = "telemetry")]
use tracing::instrument;

pub use access::{Required, authorize};
pub use events::EscrowEvent;
pub use types::{
    DisputeEvidence, DisputeOutcome, EscrowDeal, EscrowId, EscrowState, NewEscrow, Role,
};

use crate::chain::{CallContext, ChainId};
use crate::config::{ConfigError, ProtocolConfig};
use crate::domain::{
    ConfirmDelivery, RequestCancel, StartDispute, WalletAuthorization, check_deadline,
    signing_digest,
};
use crate::error::EscrowError;
use crate::lock::ReentrancyLock;
use crate::nonce::NonceRegistry;
use crate::signature::{RawSignature, signature_hash};
use crate::timestamp::{DAY, HOUR, UnixTimestamp};
use crate::token::TokenBank;
use crate::wallet::{
    EscrowStateReader, SettlementTerms, SettlementWallet, SplitReceipt, WalletFactory,
    WalletParams,
};

/// Wait after maturity before a buyer's unanswered cancel can be forced.
pub const GRACE_PERIOD: u64 = 6 * HOUR;

/// Minimum time a dispute stays open once both sides submitted evidence.
pub const MIN_EVIDENCE_WINDOW: u64 = 72 * HOUR;

/// Wait after maturity before anyone may release funds to the seller.
pub const DISPUTE_SHORT_TIMEOUT: u64 = 7 * DAY;

/// Time after which the arbiter may rule on incomplete evidence.
pub const DISPUTE_LONG_TIMEOUT: u64 = 30 * DAY;

/// Time after which an undecided dispute can be refunded by either party.
pub const EMERGENCY_RECOVERY_DELAY: u64 = 90 * DAY;

/// Ten years, in days.
pub const MAX_MATURITY_DAYS: u64 = 3_651;

/// Upper bound on title and IPFS hash lengths.
pub const MAX_TEXT_LEN: usize = 100;

macro_rules! log_transition {
    ($id:expr, $from:expr, $to:expr, $actor:expr) => {
        #[cfg(feature = "telemetry")]
        tracing::info!(
            escrow_id = %$id,
            from = %$from,
            to = %$to,
            actor = %$actor,
            "escrow transition"
        );
        #[cfg(not(feature = "telemetry"))]
        let _ = (&$id, &$from, &$to, &$actor);
    };
}

/// A participant's off-chain authorization, submitted by a relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAuthorization {
    /// Address that claims to have signed.
    pub signer: Address,
    /// Must equal the escrow's current nonce.
    pub nonce: U256,
    /// Strict expiry, at most one day ahead.
    pub deadline: UnixTimestamp,
    /// 65-byte `r || s || v` over the typed message.
    pub signature: Bytes,
}

impl SignedAuthorization {
    fn deadline_word(&self) -> U256 {
        U256::from(self.deadline.as_secs())
    }
}

/// Escrow records by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscrowBook {
    deals: BTreeMap<EscrowId, EscrowDeal>,
}

impl EscrowBook {
    /// The record of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::EscrowNotFound`] for unknown ids.
    pub fn get(&self, id: EscrowId) -> Result<&EscrowDeal, EscrowError> {
        self.deals.get(&id).ok_or(EscrowError::EscrowNotFound(id))
    }

    fn get_mut(&mut self, id: EscrowId) -> Result<&mut EscrowDeal, EscrowError> {
        self.deals.get_mut(&id).ok_or(EscrowError::EscrowNotFound(id))
    }

    /// Number of escrows ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deals.len()
    }

    /// Whether no escrow was created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }

    /// All records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EscrowDeal> {
        self.deals.values()
    }
}

impl EscrowStateReader for EscrowBook {
    fn settlement_terms(&self, escrow_id: EscrowId) -> Result<SettlementTerms, EscrowError> {
        let deal = self.get(escrow_id)?;
        Ok(SettlementTerms {
            escrow_id,
            state: deal.state,
            amount: deal.amount,
            buyer: deal.buyer,
            seller: deal.seller,
            wallet: deal.wallet,
        })
    }
}

/// One deployed escrow contract with its wallet factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowStateMachine {
    address: Address,
    fee_to: Address,
    chain_id: ChainId,
    domain: Eip712Domain,
    next_id: EscrowId,
    escrows: EscrowBook,
    nonces: NonceRegistry,
    factory: WalletFactory,
    events: Vec<EscrowEvent>,
    lock: ReentrancyLock,
}

impl EscrowStateMachine {
    /// Deploys an escrow contract as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is inconsistent.
    pub fn new(config: &ProtocolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            address: config.escrow_address,
            fee_to: config.fee_to,
            chain_id: config.chain_id,
            domain: config.escrow_domain(),
            next_id: EscrowId(0),
            escrows: EscrowBook::default(),
            nonces: NonceRegistry::new(),
            factory: WalletFactory::new(config.factory_address, config.escrow_address),
            events: Vec::new(),
            lock: ReentrancyLock::new(),
        })
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Contract address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Fee receiver.
    #[must_use]
    pub const fn fee_to(&self) -> Address {
        self.fee_to
    }

    /// Chain id of the domain.
    #[must_use]
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The escrow EIP-712 domain.
    #[must_use]
    pub const fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    /// `DOMAIN_SEPARATOR()`.
    #[must_use]
    pub fn domain_separator(&self) -> B256 {
        self.domain.separator()
    }

    /// `getEscrow(id)`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::EscrowNotFound`] for unknown ids.
    pub fn escrow(&self, id: EscrowId) -> Result<&EscrowDeal, EscrowError> {
        self.escrows.get(id)
    }

    /// All escrow records.
    #[must_use]
    pub const fn escrows(&self) -> &EscrowBook {
        &self.escrows
    }

    /// `nextEscrowId()`.
    #[must_use]
    pub const fn next_escrow_id(&self) -> EscrowId {
        self.next_id
    }

    /// `isNonceUsed(id, participant, nonce)`.
    #[must_use]
    pub fn is_nonce_used(&self, id: EscrowId, participant: Address, nonce: U256) -> bool {
        self.nonces.is_nonce_used(id, participant, nonce)
    }

    /// `getWalletAuthorizationDigest(id, participant)`.
    ///
    /// For an existing escrow this binds its recorded wallet. For the next
    /// id it binds the predicted wallet, which is what the seller signs
    /// before creation.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::EscrowNotFound`] for ids beyond the next one.
    pub fn wallet_authorization_digest(
        &self,
        id: EscrowId,
        participant: Address,
    ) -> Result<B256, EscrowError> {
        let wallet = if id == self.next_id {
            self.factory.predict(id)
        } else {
            self.escrows.get(id)?.wallet
        };
        Ok(self.wallet_consent_digest(id, wallet, participant))
    }

    /// The wallet factory.
    #[must_use]
    pub const fn factory(&self) -> &WalletFactory {
        &self.factory
    }

    /// The settlement wallet at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::WalletNotFound`] if nothing is deployed there.
    pub fn wallet(&self, address: Address) -> Result<&SettlementWallet, EscrowError> {
        self.factory.wallet(address)
    }

    /// The digest `signer` must sign to settle the wallet at `address` as its
    /// escrow currently stands.
    ///
    /// # Errors
    ///
    /// [`EscrowError::WalletNotFound`], [`EscrowError::NotOwner`] or
    /// [`EscrowError::EscrowNotFinal`].
    pub fn split_authorization_digest(
        &self,
        address: Address,
        signer: Address,
    ) -> Result<B256, EscrowError> {
        let wallet = self.factory.wallet(address)?;
        let terms = self.escrows.settlement_terms(wallet.escrow_id())?;
        wallet.authorization_digest(signer, &terms)
    }

    /// The event log, oldest first.
    #[must_use]
    pub fn events(&self) -> &[EscrowEvent] {
        &self.events
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// `createEscrow`, sent by the seller.
    ///
    /// Validates the deal, checks the seller's consent signature over the
    /// predicted wallet, deploys the wallet and records the escrow in
    /// AWAITING_PAYMENT.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlySeller`], signature-format errors, validation
    /// errors, [`EscrowError::SignerMismatch`] or token lookup failures.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(seller = %ctx.sender)))]
    pub fn create_escrow(
        &mut self,
        ctx: CallContext,
        params: NewEscrow,
        seller_wallet_sig: &[u8],
        bank: &mut dyn TokenBank,
    ) -> Result<EscrowId, EscrowError> {
        if ctx.sender != params.seller {
            return Err(EscrowError::OnlySeller(ctx.sender));
        }
        self.nonreentrant(|m| {
            let deal = m.prepare(params, seller_wallet_sig, &*bank)?;
            m.commit(deal)
        })
    }

    /// `createEscrowAndDeposit`, sent by the buyer.
    ///
    /// Creation and deposit happen together or not at all.
    ///
    /// # Errors
    ///
    /// Everything [`EscrowStateMachine::create_escrow`] can return, with
    /// [`EscrowError::OnlyBuyer`] for the caller check, plus token transfer
    /// failures.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(buyer = %ctx.sender)))]
    pub fn create_escrow_and_deposit(
        &mut self,
        ctx: CallContext,
        params: NewEscrow,
        seller_wallet_sig: &[u8],
        bank: &mut dyn TokenBank,
    ) -> Result<EscrowId, EscrowError> {
        if ctx.sender != params.buyer {
            return Err(EscrowError::OnlyBuyer(ctx.sender));
        }
        self.nonreentrant(|m| {
            let mut deal = m.prepare(params, seller_wallet_sig, &*bank)?;
            // `prepare` has ruled out every `commit` failure, so the pull is the last fallible step.
            bank.require_mut(deal.token)?
                .transfer_from(m.address, deal.buyer, deal.wallet, deal.amount)?;
            Self::mark_deposited(&mut deal, ctx.now);
            let maturity_time = deal.maturity_time.unwrap_or_default();
            let (wallet, amount) = (deal.wallet, deal.amount);
            let id = m.commit(deal)?;
            m.events.push(EscrowEvent::Deposited {
                escrow_id: id,
                wallet,
                amount,
                maturity_time,
            });
            log_transition!(id, EscrowState::AwaitingPayment, EscrowState::AwaitingDelivery, ctx.sender);
            Ok(id)
        })
    }

    /// `deposit(id)`: pulls `amount` from the buyer into the escrow's wallet.
    ///
    /// The buyer must have approved the escrow contract beforehand.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlyBuyer`], [`EscrowError::InvalidState`] or token
    /// transfer failures.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id)))]
    pub fn deposit(
        &mut self,
        ctx: CallContext,
        id: EscrowId,
        bank: &mut dyn TokenBank,
    ) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let deal = m.escrows.get(id)?;
            authorize(deal, ctx.sender, Required::Buyer)?;
            expect_state(deal, EscrowState::AwaitingPayment)?;
            bank.require_mut(deal.token)?
                .transfer_from(m.address, deal.buyer, deal.wallet, deal.amount)?;

            let deal = m.escrows.get_mut(id)?;
            Self::mark_deposited(deal, ctx.now);
            let event = EscrowEvent::Deposited {
                escrow_id: id,
                wallet: deal.wallet,
                amount: deal.amount,
                maturity_time: deal.maturity_time.unwrap_or_default(),
            };
            m.events.push(event);
            log_transition!(id, EscrowState::AwaitingPayment, EscrowState::AwaitingDelivery, ctx.sender);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// `confirmDelivery(id)`, sent by the buyer.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlyBuyer`] or [`EscrowError::InvalidState`].
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id)))]
    pub fn confirm_delivery(&mut self, ctx: CallContext, id: EscrowId) -> Result<(), EscrowError> {
        self.nonreentrant(|m| m.apply_confirm(ctx.sender, id))
    }

    /// `confirmDeliverySigned(id, ...)`, relayed on the buyer's behalf.
    ///
    /// # Errors
    ///
    /// Signature-format, deadline, signer, nonce and replay errors, then
    /// anything [`EscrowStateMachine::confirm_delivery`] returns.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id, relayer = %ctx.sender)))]
    pub fn confirm_delivery_signed(
        &mut self,
        ctx: CallContext,
        id: EscrowId,
        auth: &SignedAuthorization,
    ) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let message = ConfirmDelivery {
                escrowId: id.as_u256(),
                buyer: auth.signer,
                nonce: auth.nonce,
                deadline: auth.deadline_word(),
            };
            let key = m.verify_signed(ctx.now, id, auth, &message, Required::Buyer)?;
            m.apply_confirm(auth.signer, id)?;
            m.consume(id, auth, key)
        })
    }

    /// `autoRelease(id)`: anyone may release to the seller once maturity
    /// plus [`DISPUTE_SHORT_TIMEOUT`] has strictly passed.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InvalidState`] or [`EscrowError::ReleaseNotDue`].
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id)))]
    pub fn auto_release(&mut self, ctx: CallContext, id: EscrowId) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let deal = m.escrows.get_mut(id)?;
            expect_state(deal, EscrowState::AwaitingDelivery)?;
            let maturity = deal.maturity_time.unwrap_or_default();
            if !ctx.now.is_past(maturity, DISPUTE_SHORT_TIMEOUT) {
                return Err(EscrowError::ReleaseNotDue(maturity + DISPUTE_SHORT_TIMEOUT));
            }
            settle(deal, EscrowState::Complete);
            let fee = fees::settlement_fee(EscrowState::Complete, deal.amount);
            m.events.push(EscrowEvent::AutoReleased { escrow_id: id, fee });
            log_transition!(id, EscrowState::AwaitingDelivery, EscrowState::Complete, ctx.sender);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// `requestCancel(id)`, sent by the buyer or the seller. The escrow is
    /// canceled once both have asked.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlyBuyerOrSeller`], [`EscrowError::InvalidState`] or
    /// [`EscrowError::CancelAlreadyRequested`].
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id)))]
    pub fn request_cancel(&mut self, ctx: CallContext, id: EscrowId) -> Result<(), EscrowError> {
        self.nonreentrant(|m| m.apply_cancel_request(ctx.sender, id))
    }

    /// `requestCancelSigned(id, ...)`.
    ///
    /// # Errors
    ///
    /// Signature-format, deadline, signer, nonce and replay errors, then
    /// anything [`EscrowStateMachine::request_cancel`] returns.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id, relayer = %ctx.sender)))]
    pub fn request_cancel_signed(
        &mut self,
        ctx: CallContext,
        id: EscrowId,
        auth: &SignedAuthorization,
    ) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let message = RequestCancel {
                escrowId: id.as_u256(),
                requester: auth.signer,
                nonce: auth.nonce,
                deadline: auth.deadline_word(),
            };
            let key = m.verify_signed(ctx.now, id, auth, &message, Required::BuyerOrSeller)?;
            m.apply_cancel_request(auth.signer, id)?;
            m.consume(id, auth, key)
        })
    }

    /// `cancelByTimeout(id)`: the buyer asked to cancel, the seller never
    /// answered, and maturity plus [`GRACE_PERIOD`] has strictly passed.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlyBuyer`], [`EscrowError::InvalidState`],
    /// [`EscrowError::CancelNotRequested`] or [`EscrowError::GracePeriodActive`].
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id)))]
    pub fn cancel_by_timeout(&mut self, ctx: CallContext, id: EscrowId) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let deal = m.escrows.get_mut(id)?;
            authorize(deal, ctx.sender, Required::Buyer)?;
            expect_state(deal, EscrowState::AwaitingDelivery)?;
            if !deal.buyer_cancel_requested {
                return Err(EscrowError::CancelNotRequested);
            }
            let maturity = deal.maturity_time.unwrap_or_default();
            if !ctx.now.is_past(maturity, GRACE_PERIOD) {
                return Err(EscrowError::GracePeriodActive(maturity + GRACE_PERIOD));
            }
            settle(deal, EscrowState::Canceled);
            m.events.push(EscrowEvent::EscrowCanceled {
                escrow_id: id,
                by_timeout: true,
            });
            log_transition!(id, EscrowState::AwaitingDelivery, EscrowState::Canceled, ctx.sender);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Disputes
    // ------------------------------------------------------------------

    /// `startDispute(id)`, sent by the buyer or the seller.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlyBuyerOrSeller`], [`EscrowError::InvalidState`] or
    /// [`EscrowError::DisputesUnavailable`] when the escrow has no arbiter.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id)))]
    pub fn start_dispute(&mut self, ctx: CallContext, id: EscrowId) -> Result<(), EscrowError> {
        self.nonreentrant(|m| m.apply_dispute(ctx.sender, ctx.now, id))
    }

    /// `startDisputeSigned(id, ...)`.
    ///
    /// # Errors
    ///
    /// Signature-format, deadline, signer, nonce and replay errors, then
    /// anything [`EscrowStateMachine::start_dispute`] returns.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id, relayer = %ctx.sender)))]
    pub fn start_dispute_signed(
        &mut self,
        ctx: CallContext,
        id: EscrowId,
        auth: &SignedAuthorization,
    ) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let message = StartDispute {
                escrowId: id.as_u256(),
                initiator: auth.signer,
                nonce: auth.nonce,
                deadline: auth.deadline_word(),
            };
            let key = m.verify_signed(ctx.now, id, auth, &message, Required::BuyerOrSeller)?;
            m.apply_dispute(auth.signer, ctx.now, id)?;
            m.consume(id, auth, key)
        })
    }

    /// `submitDisputeMessage(id, ipfsHash)`: one evidence reference per role.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NotParticipant`], [`EscrowError::InvalidState`],
    /// [`EscrowError::InvalidIpfsHash`] or [`EscrowError::EvidenceAlreadySubmitted`].
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id)))]
    pub fn submit_dispute_message(
        &mut self,
        ctx: CallContext,
        id: EscrowId,
        ipfs_hash: &str,
    ) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let deal = m.escrows.get_mut(id)?;
            let role = authorize(deal, ctx.sender, Required::Participant)?;
            expect_state(deal, EscrowState::Disputed)?;
            check_text(ipfs_hash, EscrowError::InvalidIpfsHash)?;
            let slot = deal.evidence.slot_mut(role);
            if slot.is_some() {
                return Err(EscrowError::EvidenceAlreadySubmitted(ctx.sender));
            }
            *slot = Some(ipfs_hash.to_owned());
            m.events.push(EscrowEvent::DisputeMessage {
                escrow_id: id,
                role,
                ipfs_hash: ipfs_hash.to_owned(),
            });

            #[cfg(feature = "telemetry")]
            tracing::info!(escrow_id = %id, %role, "dispute evidence submitted");

            Ok(())
        })
    }

    /// `submitArbiterDecision(id, outcome, resolutionHash)`.
    ///
    /// Allowed once both parties submitted evidence and
    /// [`MIN_EVIDENCE_WINDOW`] has elapsed since the dispute started, or
    /// once [`DISPUTE_LONG_TIMEOUT`] has elapsed regardless of evidence.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlyArbiter`], [`EscrowError::InvalidState`],
    /// [`EscrowError::InvalidIpfsHash`] or [`EscrowError::EvidenceWindowActive`].
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id, ?outcome)))]
    pub fn submit_arbiter_decision(
        &mut self,
        ctx: CallContext,
        id: EscrowId,
        outcome: DisputeOutcome,
        resolution_hash: &str,
    ) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let deal = m.escrows.get_mut(id)?;
            authorize(deal, ctx.sender, Required::Arbiter)?;
            expect_state(deal, EscrowState::Disputed)?;
            check_text(resolution_hash, EscrowError::InvalidIpfsHash)?;

            let started = deal.dispute_start_time.unwrap_or_default();
            let evidence_complete =
                deal.evidence.submitted(Role::Buyer) && deal.evidence.submitted(Role::Seller);
            let window = if evidence_complete {
                MIN_EVIDENCE_WINDOW
            } else {
                DISPUTE_LONG_TIMEOUT
            };
            if !ctx.now.has_elapsed(started, window) {
                return Err(EscrowError::EvidenceWindowActive(started + window));
            }

            let arbiter_slot = deal.evidence.slot_mut(Role::Arbiter);
            if arbiter_slot.is_none() {
                *arbiter_slot = Some(resolution_hash.to_owned());
            }
            let state = outcome.final_state();
            settle(deal, state);
            let fee = fees::settlement_fee(state, deal.amount);
            m.events.push(EscrowEvent::DisputeResolved {
                escrow_id: id,
                outcome,
                fee,
                resolution_hash: resolution_hash.to_owned(),
            });
            log_transition!(id, EscrowState::Disputed, state, ctx.sender);
            Ok(())
        })
    }

    /// `resolveStaleDispute(id)`: refunds the buyer when the arbiter has not
    /// ruled within [`EMERGENCY_RECOVERY_DELAY`] of the dispute start.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlyBuyerOrSeller`], [`EscrowError::InvalidState`] or
    /// [`EscrowError::RecoveryNotDue`].
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow_id = %id)))]
    pub fn resolve_stale_dispute(&mut self, ctx: CallContext, id: EscrowId) -> Result<(), EscrowError> {
        self.nonreentrant(|m| {
            let deal = m.escrows.get_mut(id)?;
            authorize(deal, ctx.sender, Required::BuyerOrSeller)?;
            expect_state(deal, EscrowState::Disputed)?;
            let started = deal.dispute_start_time.unwrap_or_default();
            if !ctx.now.has_elapsed(started, EMERGENCY_RECOVERY_DELAY) {
                return Err(EscrowError::RecoveryNotDue(started + EMERGENCY_RECOVERY_DELAY));
            }
            settle(deal, EscrowState::Refunded);
            m.events.push(EscrowEvent::StaleDisputeRefunded {
                escrow_id: id,
                caller: ctx.sender,
            });
            log_transition!(id, EscrowState::Disputed, EscrowState::Refunded, ctx.sender);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// `executeSplit(to, signatures)` on the wallet at `wallet`.
    ///
    /// # Errors
    ///
    /// [`EscrowError::WalletNotFound`] or anything
    /// [`SettlementWallet::execute_split`] returns.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(%wallet, %to)))]
    pub fn execute_split(
        &mut self,
        wallet: Address,
        to: Address,
        signatures: &[Bytes; 3],
        bank: &mut dyn TokenBank,
    ) -> Result<SplitReceipt, EscrowError> {
        self.nonreentrant(|m| {
            let receipt =
                m.factory
                    .wallet_mut(wallet)?
                    .execute_split(to, signatures, &m.escrows, bank)?;
            m.events.push(EscrowEvent::SplitExecuted {
                escrow_id: receipt.escrow_id,
                wallet: receipt.wallet,
                recipient: receipt.recipient,
                amount: receipt.amount,
                fee_to: receipt.fee_to,
                fee: receipt.fee,
                nonce: receipt.nonce,
            });
            Ok(receipt)
        })
    }

    /// How many slots of `signatures` validly approve paying `to` from `wallet`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::WalletNotFound`] if nothing is deployed there.
    pub fn wallet_signature_count(
        &self,
        wallet: Address,
        to: Address,
        signatures: &[Bytes; 3],
    ) -> Result<usize, EscrowError> {
        Ok(self.factory.wallet(wallet)?.valid_signature_count(to, signatures))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn nonreentrant<T>(
        &mut self,
        call: impl FnOnce(&mut Self) -> Result<T, EscrowError>,
    ) -> Result<T, EscrowError> {
        self.lock.acquire()?;
        let result = call(self);
        self.lock.release();
        result
    }

    fn wallet_consent_digest(&self, id: EscrowId, wallet: Address, participant: Address) -> B256 {
        let message = WalletAuthorization {
            escrowId: id.as_u256(),
            wallet,
            participant,
        };
        signing_digest(&message, &self.domain)
    }

    /// Validates a new deal and the seller's wallet consent without mutating anything.
    fn prepare(
        &self,
        params: NewEscrow,
        seller_wallet_sig: &[u8],
        bank: &dyn TokenBank,
    ) -> Result<EscrowDeal, EscrowError> {
        let raw = RawSignature::parse(seller_wallet_sig)?;
        self.validate_parties(&params)?;
        if params.maturity_days > MAX_MATURITY_DAYS {
            return Err(EscrowError::MaturityTooLong(params.maturity_days));
        }
        check_text(&params.title, EscrowError::InvalidTitle)?;
        check_text(&params.ipfs_hash, EscrowError::InvalidIpfsHash)?;
        let token_decimals = bank.require(params.token)?.decimals();
        fees::check_amount(params.amount, token_decimals)?;

        let id = self.next_id;
        let wallet = self.factory.predict(id);
        if self.factory.is_deployed(wallet) {
            return Err(EscrowError::WalletAlreadyDeployed(wallet));
        }
        let recovered = raw.recover(&self.wallet_consent_digest(id, wallet, params.seller))?;
        if recovered != params.seller {
            return Err(EscrowError::SignerMismatch {
                expected: params.seller,
                recovered,
            });
        }

        Ok(EscrowDeal {
            id,
            token: params.token,
            buyer: params.buyer,
            seller: params.seller,
            arbiter: params.arbiter,
            wallet,
            amount: params.amount,
            token_decimals,
            maturity_days: params.maturity_days,
            title: params.title,
            ipfs_hash: params.ipfs_hash,
            deposit_time: None,
            maturity_time: None,
            dispute_start_time: None,
            state: EscrowState::AwaitingPayment,
            buyer_cancel_requested: false,
            seller_cancel_requested: false,
            nonce: U256::ZERO,
            evidence: DisputeEvidence::default(),
        })
    }

    fn validate_parties(&self, params: &NewEscrow) -> Result<(), EscrowError> {
        if params.token == Address::ZERO {
            return Err(EscrowError::ZeroAddress("token"));
        }
        if params.buyer == Address::ZERO {
            return Err(EscrowError::ZeroAddress("buyer"));
        }
        if params.seller == Address::ZERO {
            return Err(EscrowError::ZeroAddress("seller"));
        }
        if params.buyer == params.seller {
            return Err(EscrowError::BuyerIsSeller);
        }
        if params.arbiter != Address::ZERO {
            if params.arbiter == params.buyer || params.arbiter == params.seller {
                return Err(EscrowError::ArbiterConflict);
            }
            if params.arbiter == self.fee_to {
                return Err(EscrowError::ArbiterIsFeeReceiver);
            }
        }
        Ok(())
    }

    /// Deploys the deal's wallet and records the deal.
    fn commit(&mut self, deal: EscrowDeal) -> Result<EscrowId, EscrowError> {
        let id = deal.id;
        let wallet = self.factory.deploy(
            self.address,
            WalletParams {
                escrow_id: id,
                token: deal.token,
                buyer: deal.buyer,
                seller: deal.seller,
                arbiter: deal.arbiter,
                fee_to: self.fee_to,
                chain_id: self.chain_id,
            },
        )?;
        self.events.push(EscrowEvent::EscrowCreated {
            escrow_id: id,
            token: deal.token,
            buyer: deal.buyer,
            seller: deal.seller,
            arbiter: deal.arbiter,
            wallet,
            amount: deal.amount,
        });
        self.escrows.deals.insert(id, deal);
        self.next_id = id.next();

        #[cfg(feature = "telemetry")]
        tracing::info!(escrow_id = %id, %wallet, "escrow created");

        Ok(id)
    }

    fn mark_deposited(deal: &mut EscrowDeal, now: UnixTimestamp) {
        deal.deposit_time = Some(now);
        deal.maturity_time = Some(now + deal.maturity_days.saturating_mul(DAY));
        deal.state = EscrowState::AwaitingDelivery;
    }

    /// Checks a signed authorization up to, but not including, the transition.
    ///
    /// Order: signature format, deadline, signer recovery, role, escrow
    /// nonce, then the replay registry. Returns the used-signature key.
    fn verify_signed<T: SolStruct>(
        &self,
        now: UnixTimestamp,
        id: EscrowId,
        auth: &SignedAuthorization,
        message: &T,
        required: Required,
    ) -> Result<B256, EscrowError> {
        let result = self.check_signed(now, id, auth, message, required);

        #[cfg(feature = "telemetry")]
        let result = result.inspect_err(|err| {
            tracing::debug!(
                escrow_id = %id,
                signer = %auth.signer,
                code = err.code(),
                "signed authorization rejected"
            );
        });

        result
    }

    fn check_signed<T: SolStruct>(
        &self,
        now: UnixTimestamp,
        id: EscrowId,
        auth: &SignedAuthorization,
        message: &T,
        required: Required,
    ) -> Result<B256, EscrowError> {
        let raw = RawSignature::parse(&auth.signature)?;
        check_deadline(now, auth.deadline)?;
        let recovered = raw.recover(&signing_digest(message, &self.domain))?;
        if recovered != auth.signer {
            return Err(EscrowError::SignerMismatch {
                expected: auth.signer,
                recovered,
            });
        }
        let deal = self.escrows.get(id)?;
        authorize(deal, auth.signer, required)?;
        if auth.nonce != deal.nonce {
            return Err(EscrowError::InvalidNonce {
                provided: auth.nonce,
                current: deal.nonce,
            });
        }
        let key = signature_hash(self.address, id.as_u256(), &raw, self.chain_id);
        self.nonces.ensure_unused(id, auth.signer, auth.nonce, &key)?;
        Ok(key)
    }

    /// Records a consumed authorization and advances the escrow nonce.
    fn consume(
        &mut self,
        id: EscrowId,
        auth: &SignedAuthorization,
        key: B256,
    ) -> Result<(), EscrowError> {
        let deal = self.escrows.get_mut(id)?;
        deal.nonce += U256::from(1);
        self.nonces.consume(id, auth.signer, auth.nonce, key);
        Ok(())
    }

    fn apply_confirm(&mut self, actor: Address, id: EscrowId) -> Result<(), EscrowError> {
        let deal = self.escrows.get_mut(id)?;
        authorize(deal, actor, Required::Buyer)?;
        expect_state(deal, EscrowState::AwaitingDelivery)?;
        settle(deal, EscrowState::Complete);
        let fee = fees::settlement_fee(EscrowState::Complete, deal.amount);
        self.events.push(EscrowEvent::DeliveryConfirmed { escrow_id: id, fee });
        log_transition!(id, EscrowState::AwaitingDelivery, EscrowState::Complete, actor);
        Ok(())
    }

    fn apply_cancel_request(&mut self, actor: Address, id: EscrowId) -> Result<(), EscrowError> {
        let deal = self.escrows.get_mut(id)?;
        let role = authorize(deal, actor, Required::BuyerOrSeller)?;
        expect_state(deal, EscrowState::AwaitingDelivery)?;
        let flag = if role == Role::Buyer {
            &mut deal.buyer_cancel_requested
        } else {
            &mut deal.seller_cancel_requested
        };
        if *flag {
            return Err(EscrowError::CancelAlreadyRequested(actor));
        }
        *flag = true;
        self.events.push(EscrowEvent::CancelRequested {
            escrow_id: id,
            requester: actor,
        });

        if deal.buyer_cancel_requested && deal.seller_cancel_requested {
            settle(deal, EscrowState::Canceled);
            self.events.push(EscrowEvent::EscrowCanceled {
                escrow_id: id,
                by_timeout: false,
            });
            log_transition!(id, EscrowState::AwaitingDelivery, EscrowState::Canceled, actor);
        }
        Ok(())
    }

    fn apply_dispute(
        &mut self,
        actor: Address,
        now: UnixTimestamp,
        id: EscrowId,
    ) -> Result<(), EscrowError> {
        let deal = self.escrows.get_mut(id)?;
        authorize(deal, actor, Required::BuyerOrSeller)?;
        expect_state(deal, EscrowState::AwaitingDelivery)?;
        if !deal.has_arbiter() {
            return Err(EscrowError::DisputesUnavailable(id));
        }
        deal.state = EscrowState::Disputed;
        deal.dispute_start_time = Some(now);
        self.events.push(EscrowEvent::DisputeStarted {
            escrow_id: id,
            initiator: actor,
        });
        log_transition!(id, EscrowState::AwaitingDelivery, EscrowState::Disputed, actor);
        Ok(())
    }
}

fn expect_state(deal: &EscrowDeal, expected: EscrowState) -> Result<(), EscrowError> {
    if deal.state == expected {
        Ok(())
    } else {
        Err(EscrowError::InvalidState {
            id: deal.id,
            expected,
            actual: deal.state,
        })
    }
}

/// Moves `deal` into a terminal state. Cancel requests are cleared here and nowhere else.
fn settle(deal: &mut EscrowDeal, state: EscrowState) {
    deal.state = state;
    deal.buyer_cancel_requested = false;
    deal.seller_cancel_requested = false;
}

fn check_text(text: &str, error: fn(usize) -> EscrowError) -> Result<(), EscrowError> {
    if (1..=MAX_TEXT_LEN).contains(&text.len()) {
        Ok(())
    } else {
        Err(error(text.len()))
    }
}
