//! Per-escrow settlement wallets.
//!
//! A [`SettlementWallet`] custodies one escrow's deposit and exposes a single
//! mutating operation, [`SettlementWallet::execute_split`]. It releases funds
//! only when two of its three owners (buyer, seller, arbiter) sign a
//! [`Split`] over the recipient implied by the escrow's final state. The
//! wallet reads that state itself through [`EscrowStateReader`]; the caller
//! only proposes a recipient and cannot redirect funds.

pub mod factory;

use std::collections::HashSet;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::Eip712Domain;
use serde::{Deserialize, Serialize};

use crate::chain::ChainId;
use crate::domain::{Split, signing_digest, wallet_domain};
use crate::error::EscrowError;
use crate::escrow::{EscrowId, EscrowState, fees};
use crate::signature::{RawSignature, SignatureSlot, signature_hash};
use crate::token::TokenBank;

pub use factory::{
    WalletFactory, init_code_hash, predict_wallet_address, settlement_wallet_code_hash,
    wallet_salt,
};

/// Distinct owner approvals required to split.
pub const THRESHOLD: usize = 2;

/// Immutable wallet fields fixed at deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletParams {
    /// Escrow this wallet custodies.
    pub escrow_id: EscrowId,
    /// The only token the wallet pays out.
    pub token: Address,
    /// Owner in slot 0.
    pub buyer: Address,
    /// Owner in slot 1.
    pub seller: Address,
    /// Owner in slot 2, possibly zero.
    pub arbiter: Address,
    /// Protocol fee receiver.
    pub fee_to: Address,
    /// Chain the wallet's domain is bound to.
    pub chain_id: ChainId,
}

/// What the escrow's current record implies for settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementTerms {
    /// Escrow id.
    pub escrow_id: EscrowId,
    /// Current state.
    pub state: EscrowState,
    /// Nominal deal amount.
    pub amount: U256,
    /// Refund recipient.
    pub buyer: Address,
    /// Payment recipient.
    pub seller: Address,
    /// Custodian recorded for the escrow.
    pub wallet: Address,
}

/// The transfers a split performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    /// Seller on COMPLETE, buyer otherwise.
    pub recipient: Address,
    /// Sent to `recipient`.
    pub amount: U256,
    /// Sent to the fee receiver.
    pub fee: U256,
}

impl SettlementTerms {
    /// The recipient the final state dictates.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::EscrowNotFinal`] unless the state is terminal.
    pub const fn recipient(&self) -> Result<Address, EscrowError> {
        match self.state {
            EscrowState::Complete => Ok(self.seller),
            EscrowState::Refunded | EscrowState::Canceled => Ok(self.buyer),
            state => Err(EscrowError::EscrowNotFinal {
                id: self.escrow_id,
                state,
            }),
        }
    }

    /// Splits `balance` between the recipient and the fee receiver.
    ///
    /// The fee is owed on COMPLETE only, once per escrow: `fee_paid` is what
    /// earlier splits already sent to the fee receiver, and only the rest is
    /// charged, capped at what the wallet holds. Everything else goes to the
    /// recipient, including tokens sent to the wallet beyond `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::EscrowNotFinal`] unless the state is terminal.
    pub fn payout(&self, balance: U256, fee_paid: U256) -> Result<Payout, EscrowError> {
        let recipient = self.recipient()?;
        let fee = fees::settlement_fee(self.state, self.amount)
            .saturating_sub(fee_paid)
            .min(balance);
        Ok(Payout {
            recipient,
            amount: balance - fee,
            fee,
        })
    }
}

/// Read access to escrow records, as the wallet sees the escrow contract.
pub trait EscrowStateReader {
    /// Terms of `escrow_id` as currently recorded.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::EscrowNotFound`] for unknown ids.
    fn settlement_terms(&self, escrow_id: EscrowId) -> Result<SettlementTerms, EscrowError>;
}

/// Result of a successful split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitReceipt {
    /// Escrow id.
    pub escrow_id: EscrowId,
    /// Paying wallet.
    pub wallet: Address,
    /// Token paid out.
    pub token: Address,
    /// Seller or buyer.
    pub recipient: Address,
    /// Sent to `recipient`.
    pub amount: U256,
    /// Fee receiver.
    pub fee_to: Address,
    /// Sent to `fee_to`.
    pub fee: U256,
    /// Nonce the approvals were signed over.
    pub nonce: U256,
}

/// A 2-of-3 token custodian bound to one escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementWallet {
    address: Address,
    escrow_contract: Address,
    params: WalletParams,
    nonce: U256,
    fee_paid: U256,
    used_signatures: HashSet<B256>,
}

impl SettlementWallet {
    pub(crate) fn new(address: Address, escrow_contract: Address, params: WalletParams) -> Self {
        Self {
            address,
            escrow_contract,
            params,
            nonce: U256::ZERO,
            fee_paid: U256::ZERO,
            used_signatures: HashSet::new(),
        }
    }

    /// Wallet address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Escrow contract whose records this wallet reads.
    #[must_use]
    pub const fn escrow_contract(&self) -> Address {
        self.escrow_contract
    }

    /// Escrow this wallet custodies.
    #[must_use]
    pub const fn escrow_id(&self) -> EscrowId {
        self.params.escrow_id
    }

    /// Token paid out.
    #[must_use]
    pub const fn token(&self) -> Address {
        self.params.token
    }

    /// Fee receiver.
    #[must_use]
    pub const fn fee_to(&self) -> Address {
        self.params.fee_to
    }

    /// `getOwners()`, in signature-slot order.
    #[must_use]
    pub const fn owners(&self) -> [Address; 3] {
        [self.params.buyer, self.params.seller, self.params.arbiter]
    }

    /// `isOwner(address)`. The zero address is never an owner.
    #[must_use]
    pub fn is_owner(&self, address: Address) -> bool {
        address != Address::ZERO && self.owners().contains(&address)
    }

    /// `threshold()`.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        THRESHOLD
    }

    /// Nonce the next split must be signed over.
    #[must_use]
    pub const fn nonce(&self) -> U256 {
        self.nonce
    }

    /// Protocol fee already sent to the fee receiver.
    #[must_use]
    pub const fn fee_paid(&self) -> U256 {
        self.fee_paid
    }

    /// The wallet's own EIP-712 domain.
    #[must_use]
    pub fn domain(&self) -> Eip712Domain {
        wallet_domain(self.params.chain_id, self.address)
    }

    /// `getBalance()`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Token`] if the token is not deployed.
    pub fn balance(&self, bank: &dyn TokenBank) -> Result<U256, EscrowError> {
        Ok(bank.require(self.params.token)?.balance_of(self.address))
    }

    /// Digest owners sign to approve paying `to` at the current nonce.
    #[must_use]
    pub fn split_digest(&self, to: Address) -> B256 {
        let message = Split {
            escrowId: self.params.escrow_id.as_u256(),
            token: self.params.token,
            to,
            feeTo: self.params.fee_to,
            nonce: self.nonce,
        };
        signing_digest(&message, &self.domain())
    }

    /// `getAuthorizationDigest(signer)`: what `signer` must sign to settle
    /// the escrow as it currently stands.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NotOwner`] or [`EscrowError::EscrowNotFinal`].
    pub fn authorization_digest(
        &self,
        signer: Address,
        terms: &SettlementTerms,
    ) -> Result<B256, EscrowError> {
        if !self.is_owner(signer) {
            return Err(EscrowError::NotOwner(signer));
        }
        Ok(self.split_digest(terms.recipient()?))
    }

    /// `getValidSignatureCount()`: distinct owners whose slot signature
    /// approves paying `to` at the current nonce. Malformed, foreign and
    /// already-used signatures do not count.
    #[must_use]
    pub fn valid_signature_count(&self, to: Address, signatures: &[Bytes; 3]) -> usize {
        let digest = self.split_digest(to);
        let mut seen = Vec::with_capacity(3);
        for (owner, slot) in self.owners().into_iter().zip(signatures) {
            let SignatureSlot::Provided(bytes) = SignatureSlot::from(slot) else {
                continue;
            };
            let Ok(raw) = RawSignature::parse(bytes) else {
                continue;
            };
            if self.used_signatures.contains(&self.signature_key(&raw)) {
                continue;
            }
            if raw.recover(&digest).is_ok_and(|signer| signer == owner) && !seen.contains(&owner) {
                seen.push(owner);
            }
        }
        seen.len()
    }

    /// `executeSplit(to, signatures)`.
    ///
    /// Reads the escrow's final state, checks `to` against the recipient it
    /// implies, verifies at least [`THRESHOLD`] distinct owner approvals and
    /// pays out the whole balance. The protocol fee is charged on the first
    /// COMPLETE payout only; later splits of a topped-up wallet pay the
    /// recipient in full. Empty slots are skipped; a provided
    /// signature must be well formed and come from its slot's owner.
    ///
    /// # Errors
    ///
    /// Fails without moving funds on any state, recipient, signature or
    /// token error, and with [`EscrowError::NothingToSplit`] on an empty wallet.
    pub fn execute_split(
        &mut self,
        to: Address,
        signatures: &[Bytes; 3],
        escrow: &dyn EscrowStateReader,
        bank: &mut dyn TokenBank,
    ) -> Result<SplitReceipt, EscrowError> {
        let terms = escrow.settlement_terms(self.params.escrow_id)?;
        if terms.wallet != self.address {
            return Err(EscrowError::WalletMismatch(self.address));
        }
        let expected = terms.recipient()?;
        if to != expected {
            return Err(EscrowError::RecipientMismatch {
                provided: to,
                expected,
            });
        }

        let approvals = self.collect_approvals(&self.split_digest(to), signatures)?;
        if approvals.len() < THRESHOLD {
            return Err(EscrowError::InsufficientSignatures {
                valid: approvals.len(),
                required: THRESHOLD,
            });
        }

        let balance = self.balance(bank)?;
        if balance.is_zero() {
            return Err(EscrowError::NothingToSplit(self.address));
        }
        let payout = terms.payout(balance, self.fee_paid)?;

        // amount + fee == balance, so neither transfer can run out of funds.
        let token = bank.require_mut(self.params.token)?;
        if !payout.amount.is_zero() {
            token.transfer(self.address, payout.recipient, payout.amount)?;
        }
        if !payout.fee.is_zero() {
            token.transfer(self.address, self.params.fee_to, payout.fee)?;
        }

        let receipt = SplitReceipt {
            escrow_id: self.params.escrow_id,
            wallet: self.address,
            token: self.params.token,
            recipient: payout.recipient,
            amount: payout.amount,
            fee_to: self.params.fee_to,
            fee: payout.fee,
            nonce: self.nonce,
        };
        for key in approvals {
            self.used_signatures.insert(key);
        }
        self.nonce += U256::from(1);
        self.fee_paid += payout.fee;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            escrow_id = %receipt.escrow_id,
            wallet = %receipt.wallet,
            recipient = %receipt.recipient,
            amount = %receipt.amount,
            fee = %receipt.fee,
            "split executed"
        );

        Ok(receipt)
    }

    /// Verifies each provided slot and returns the used-signature keys of the
    /// approvals.
    fn collect_approvals(
        &self,
        digest: &B256,
        signatures: &[Bytes; 3],
    ) -> Result<Vec<B256>, EscrowError> {
        let mut signers = Vec::with_capacity(3);
        let mut keys = Vec::with_capacity(3);
        for (owner, slot) in self.owners().into_iter().zip(signatures) {
            let SignatureSlot::Provided(bytes) = SignatureSlot::from(slot) else {
                continue;
            };
            let raw = RawSignature::parse(bytes)?;
            let signer = raw.recover(digest)?;
            if signers.contains(&signer) {
                return Err(EscrowError::DuplicateSigner(signer));
            }
            if signer != owner {
                return Err(EscrowError::SignerMismatch {
                    expected: owner,
                    recovered: signer,
                });
            }
            let key = self.signature_key(&raw);
            if self.used_signatures.contains(&key) {
                return Err(EscrowError::SignatureAlreadyUsed);
            }
            signers.push(signer);
            keys.push(key);
        }
        Ok(keys)
    }

    fn signature_key(&self, raw: &RawSignature) -> B256 {
        signature_hash(self.address, self.nonce, raw, self.params.chain_id)
    }
}

#[cfg(test)]
mod tests {
    use alloy_signer_local::PrivateKeySigner;

    use super::*;
    use crate::signature::test_utils::{malleate, sign};
    use crate::token::{Erc20, InMemoryBank, InMemoryToken};

    const WALLET: Address = Address::repeat_byte(0x3A);
    const ESCROW: Address = Address::repeat_byte(0xE5);
    const TOKEN: Address = Address::repeat_byte(0x70);
    const FEE_TO: Address = Address::repeat_byte(0xFE);

    struct Fixture {
        buyer: PrivateKeySigner,
        seller: PrivateKeySigner,
        arbiter: PrivateKeySigner,
        wallet: SettlementWallet,
        bank: InMemoryBank,
    }

    struct Record(SettlementTerms);

    impl EscrowStateReader for Record {
        fn settlement_terms(&self, escrow_id: EscrowId) -> Result<SettlementTerms, EscrowError> {
            if escrow_id == self.0.escrow_id {
                Ok(self.0)
            } else {
                Err(EscrowError::EscrowNotFound(escrow_id))
            }
        }
    }

    impl Fixture {
        fn new() -> Self {
            let buyer = PrivateKeySigner::random();
            let seller = PrivateKeySigner::random();
            let arbiter = PrivateKeySigner::random();
            let wallet = SettlementWallet::new(
                WALLET,
                ESCROW,
                WalletParams {
                    escrow_id: EscrowId(0),
                    token: TOKEN,
                    buyer: buyer.address(),
                    seller: seller.address(),
                    arbiter: arbiter.address(),
                    fee_to: FEE_TO,
                    chain_id: 31_337,
                },
            );
            let mut token = InMemoryToken::new("USDC", 6);
            token.mint(WALLET, U256::from(10_000_000u64));
            let mut bank = InMemoryBank::new();
            bank.deploy(TOKEN, token);
            Self {
                buyer,
                seller,
                arbiter,
                wallet,
                bank,
            }
        }

        fn terms(&self, state: EscrowState) -> Record {
            Record(SettlementTerms {
                escrow_id: EscrowId(0),
                state,
                amount: U256::from(10_000_000u64),
                buyer: self.buyer.address(),
                seller: self.seller.address(),
                wallet: WALLET,
            })
        }

        fn approve(&self, signer: &PrivateKeySigner, to: Address) -> Bytes {
            sign(signer, &self.wallet.split_digest(to))
        }

        fn balance(&self, owner: Address) -> U256 {
            self.bank.get(TOKEN).unwrap().balance_of(owner)
        }
    }

    #[test]
    fn complete_pays_seller_minus_fee() {
        let mut f = Fixture::new();
        let to = f.seller.address();
        let sigs = [f.approve(&f.buyer, to), f.approve(&f.seller, to), Bytes::new()];
        let record = f.terms(EscrowState::Complete);
        let receipt = f.wallet.execute_split(to, &sigs, &record, &mut f.bank).unwrap();
        assert_eq!(receipt.amount, U256::from(9_900_000u64));
        assert_eq!(receipt.fee, U256::from(100_000u64));
        assert_eq!(f.balance(to), U256::from(9_900_000u64));
        assert_eq!(f.balance(FEE_TO), U256::from(100_000u64));
        assert_eq!(f.wallet.nonce(), U256::from(1));
    }

    #[test]
    fn refund_pays_buyer_in_full() {
        let mut f = Fixture::new();
        let to = f.buyer.address();
        let sigs = [Bytes::new(), f.approve(&f.seller, to), f.approve(&f.arbiter, to)];
        let record = f.terms(EscrowState::Refunded);
        let receipt = f.wallet.execute_split(to, &sigs, &record, &mut f.bank).unwrap();
        assert_eq!(receipt.fee, U256::ZERO);
        assert_eq!(f.balance(to), U256::from(10_000_000u64));
        assert_eq!(f.balance(FEE_TO), U256::ZERO);
    }

    #[test]
    fn recipient_must_match_final_state() {
        let mut f = Fixture::new();
        let to = f.buyer.address();
        let sigs = [f.approve(&f.buyer, to), f.approve(&f.arbiter, to), Bytes::new()];
        let record = f.terms(EscrowState::Complete);
        assert_eq!(
            f.wallet.execute_split(to, &sigs, &record, &mut f.bank),
            Err(EscrowError::RecipientMismatch {
                provided: to,
                expected: f.seller.address(),
            })
        );
    }

    #[test]
    fn open_escrow_cannot_split() {
        let mut f = Fixture::new();
        let to = f.seller.address();
        let sigs = [f.approve(&f.buyer, to), f.approve(&f.seller, to), Bytes::new()];
        let record = f.terms(EscrowState::AwaitingDelivery);
        assert!(matches!(
            f.wallet.execute_split(to, &sigs, &record, &mut f.bank),
            Err(EscrowError::EscrowNotFinal { .. })
        ));
    }

    #[test]
    fn one_signature_is_not_enough() {
        let mut f = Fixture::new();
        let to = f.seller.address();
        let sigs = [f.approve(&f.buyer, to), Bytes::new(), Bytes::new()];
        let record = f.terms(EscrowState::Complete);
        assert_eq!(
            f.wallet.execute_split(to, &sigs, &record, &mut f.bank),
            Err(EscrowError::InsufficientSignatures {
                valid: 1,
                required: THRESHOLD
            })
        );
        let empty = [Bytes::new(), Bytes::new(), Bytes::new()];
        assert!(matches!(
            f.wallet.execute_split(to, &empty, &record, &mut f.bank),
            Err(EscrowError::InsufficientSignatures { valid: 0, .. })
        ));
    }

    #[test]
    fn same_owner_twice_is_rejected() {
        let mut f = Fixture::new();
        let to = f.seller.address();
        let buyer_sig = f.approve(&f.buyer, to);
        let sigs = [buyer_sig.clone(), buyer_sig, Bytes::new()];
        let record = f.terms(EscrowState::Complete);
        assert!(matches!(
            f.wallet.execute_split(to, &sigs, &record, &mut f.bank),
            Err(EscrowError::DuplicateSigner(_))
        ));
        assert_eq!(f.wallet.valid_signature_count(to, &sigs), 1);
    }

    #[test]
    fn high_s_slot_is_rejected() {
        let mut f = Fixture::new();
        let to = f.seller.address();
        let sigs = [
            malleate(&f.approve(&f.buyer, to)),
            f.approve(&f.seller, to),
            Bytes::new(),
        ];
        let record = f.terms(EscrowState::Complete);
        assert_eq!(
            f.wallet.execute_split(to, &sigs, &record, &mut f.bank).unwrap_err().code(),
            "SignatureSInvalid"
        );
    }

    #[test]
    fn second_split_finds_nothing() {
        let mut f = Fixture::new();
        let to = f.seller.address();
        let sigs = [f.approve(&f.buyer, to), f.approve(&f.seller, to), Bytes::new()];
        let record = f.terms(EscrowState::Complete);
        f.wallet.execute_split(to, &sigs, &record, &mut f.bank).unwrap();

        // Old approvals were signed over nonce 0.
        assert!(matches!(
            f.wallet.execute_split(to, &sigs, &record, &mut f.bank),
            Err(EscrowError::SignerMismatch { .. })
        ));
        let fresh = [f.approve(&f.buyer, to), f.approve(&f.seller, to), Bytes::new()];
        assert_eq!(
            f.wallet.execute_split(to, &fresh, &record, &mut f.bank),
            Err(EscrowError::NothingToSplit(WALLET))
        );
    }

    #[test]
    fn top_up_after_settlement_is_not_charged_again() {
        let mut f = Fixture::new();
        let to = f.seller.address();
        let record = f.terms(EscrowState::Complete);
        let sigs = [f.approve(&f.buyer, to), f.approve(&f.seller, to), Bytes::new()];
        f.wallet.execute_split(to, &sigs, &record, &mut f.bank).unwrap();
        assert_eq!(f.wallet.fee_paid(), U256::from(100_000u64));

        f.bank.get_mut(TOKEN).unwrap().mint(WALLET, U256::from(50_000u64));
        let fresh = [f.approve(&f.buyer, to), Bytes::new(), f.approve(&f.arbiter, to)];
        let receipt = f.wallet.execute_split(to, &fresh, &record, &mut f.bank).unwrap();
        assert_eq!(receipt.fee, U256::ZERO);
        assert_eq!(receipt.amount, U256::from(50_000u64));
        assert_eq!(f.balance(to), U256::from(9_950_000u64));
        assert_eq!(f.balance(FEE_TO), U256::from(100_000u64));
        assert_eq!(f.wallet.fee_paid(), U256::from(100_000u64));
    }

    #[test]
    fn authorization_digest_follows_state() {
        let f = Fixture::new();
        let complete = f.terms(EscrowState::Complete).0;
        assert_eq!(
            f.wallet.authorization_digest(f.arbiter.address(), &complete).unwrap(),
            f.wallet.split_digest(f.seller.address())
        );
        assert_eq!(
            f.wallet.authorization_digest(FEE_TO, &complete),
            Err(EscrowError::NotOwner(FEE_TO))
        );
        let open = f.terms(EscrowState::Disputed).0;
        assert!(f.wallet.authorization_digest(f.buyer.address(), &open).is_err());
    }

    #[test]
    fn owners_and_threshold() {
        let f = Fixture::new();
        assert!(f.wallet.is_owner(f.arbiter.address()));
        assert!(!f.wallet.is_owner(FEE_TO));
        assert!(!f.wallet.is_owner(Address::ZERO));
        assert_eq!(f.wallet.threshold(), 2);
        assert_eq!(f.wallet.balance(&f.bank).unwrap(), U256::from(10_000_000u64));
    }

    #[test]
    fn fee_never_exceeds_balance() {
        let terms = SettlementTerms {
            escrow_id: EscrowId(0),
            state: EscrowState::Complete,
            amount: U256::from(10_000_000u64),
            buyer: Address::repeat_byte(1),
            seller: Address::repeat_byte(2),
            wallet: WALLET,
        };
        let payout = terms.payout(U256::from(50_000u64), U256::ZERO).unwrap();
        assert_eq!(payout.fee, U256::from(50_000u64));
        assert_eq!(payout.amount, U256::ZERO);

        // The remaining half is owed once more tokens arrive.
        let payout = terms.payout(U256::from(80_000u64), U256::from(50_000u64)).unwrap();
        assert_eq!(payout.fee, U256::from(50_000u64));
        assert_eq!(payout.amount, U256::from(30_000u64));
    }
}
