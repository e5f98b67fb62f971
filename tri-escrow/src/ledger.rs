//! A single sequential ledger.
//!
//! [`LocalChain`] owns one escrow contract, the token contracts and a clock,
//! and applies calls one at a time. Each call sees one timestamp and either
//! commits every effect (records, balances, events) or none. Every state
//! machine operation finishes its checks before its first write, and token
//! transfers are all-or-nothing per call, so a failed call has nothing to undo.

use alloy_primitives::{Address, B256, Bytes, U256};

use crate::chain::{CallContext, Clock};
use crate::config::{ConfigError, ProtocolConfig};
use crate::error::EscrowError;
use crate::escrow::{
    DisputeOutcome, EscrowDeal, EscrowEvent, EscrowId, EscrowStateMachine, NewEscrow,
    SignedAuthorization,
};
use crate::timestamp::UnixTimestamp;
use crate::token::TokenBank;
use crate::wallet::{SettlementWallet, SplitReceipt};

/// An escrow deployment plus the tokens it moves.
#[derive(Debug, Clone)]
pub struct LocalChain<B> {
    machine: EscrowStateMachine,
    bank: B,
    clock: Clock,
}

impl<B: TokenBank + 'static> LocalChain<B> {
    /// Deploys an escrow contract described by `config` next to `bank`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is inconsistent.
    pub fn new(config: &ProtocolConfig, bank: B, clock: Clock) -> Result<Self, ConfigError> {
        Ok(Self {
            machine: EscrowStateMachine::new(config)?,
            bank,
            clock,
        })
    }

    /// Current block timestamp.
    #[must_use]
    pub fn now(&self) -> UnixTimestamp {
        self.clock.now()
    }

    /// The clock, for moving manual time.
    pub const fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    /// The escrow contract.
    #[must_use]
    pub const fn machine(&self) -> &EscrowStateMachine {
        &self.machine
    }

    /// The token contracts.
    #[must_use]
    pub const fn bank(&self) -> &B {
        &self.bank
    }

    /// Mutable token contracts, for minting and approvals.
    pub const fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    /// Runs `call` as `sender` at the current time.
    ///
    /// `call` must not write anything before it can no longer fail.
    ///
    /// # Errors
    ///
    /// Returns whatever `call` returns.
    pub fn transact<T>(
        &mut self,
        sender: Address,
        call: impl FnOnce(&mut EscrowStateMachine, &mut B, CallContext) -> Result<T, EscrowError>,
    ) -> Result<T, EscrowError> {
        let ctx = CallContext::new(sender, self.clock.now());
        call(&mut self.machine, &mut self.bank, ctx)
    }

    /// See [`EscrowStateMachine::create_escrow`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn create_escrow(
        &mut self,
        sender: Address,
        params: NewEscrow,
        seller_wallet_sig: &[u8],
    ) -> Result<EscrowId, EscrowError> {
        self.transact(sender, |m, bank, ctx| {
            m.create_escrow(ctx, params, seller_wallet_sig, bank)
        })
    }

    /// See [`EscrowStateMachine::create_escrow_and_deposit`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn create_escrow_and_deposit(
        &mut self,
        sender: Address,
        params: NewEscrow,
        seller_wallet_sig: &[u8],
    ) -> Result<EscrowId, EscrowError> {
        self.transact(sender, |m, bank, ctx| {
            m.create_escrow_and_deposit(ctx, params, seller_wallet_sig, bank)
        })
    }

    /// See [`EscrowStateMachine::deposit`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn deposit(&mut self, sender: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.transact(sender, |m, bank, ctx| m.deposit(ctx, id, bank))
    }

    /// See [`EscrowStateMachine::confirm_delivery`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn confirm_delivery(&mut self, sender: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.transact(sender, |m, _, ctx| m.confirm_delivery(ctx, id))
    }

    /// See [`EscrowStateMachine::confirm_delivery_signed`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn confirm_delivery_signed(
        &mut self,
        relayer: Address,
        id: EscrowId,
        auth: &SignedAuthorization,
    ) -> Result<(), EscrowError> {
        self.transact(relayer, |m, _, ctx| m.confirm_delivery_signed(ctx, id, auth))
    }

    /// See [`EscrowStateMachine::request_cancel`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn request_cancel(&mut self, sender: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.transact(sender, |m, _, ctx| m.request_cancel(ctx, id))
    }

    /// See [`EscrowStateMachine::request_cancel_signed`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn request_cancel_signed(
        &mut self,
        relayer: Address,
        id: EscrowId,
        auth: &SignedAuthorization,
    ) -> Result<(), EscrowError> {
        self.transact(relayer, |m, _, ctx| m.request_cancel_signed(ctx, id, auth))
    }

    /// See [`EscrowStateMachine::cancel_by_timeout`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn cancel_by_timeout(&mut self, sender: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.transact(sender, |m, _, ctx| m.cancel_by_timeout(ctx, id))
    }

    /// See [`EscrowStateMachine::start_dispute`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn start_dispute(&mut self, sender: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.transact(sender, |m, _, ctx| m.start_dispute(ctx, id))
    }

    /// See [`EscrowStateMachine::start_dispute_signed`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn start_dispute_signed(
        &mut self,
        relayer: Address,
        id: EscrowId,
        auth: &SignedAuthorization,
    ) -> Result<(), EscrowError> {
        self.transact(relayer, |m, _, ctx| m.start_dispute_signed(ctx, id, auth))
    }

    /// See [`EscrowStateMachine::submit_dispute_message`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn submit_dispute_message(
        &mut self,
        sender: Address,
        id: EscrowId,
        ipfs_hash: &str,
    ) -> Result<(), EscrowError> {
        self.transact(sender, |m, _, ctx| m.submit_dispute_message(ctx, id, ipfs_hash))
    }

    /// See [`EscrowStateMachine::submit_arbiter_decision`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn submit_arbiter_decision(
        &mut self,
        sender: Address,
        id: EscrowId,
        outcome: DisputeOutcome,
        resolution_hash: &str,
    ) -> Result<(), EscrowError> {
        self.transact(sender, |m, _, ctx| {
            m.submit_arbiter_decision(ctx, id, outcome, resolution_hash)
        })
    }

    /// See [`EscrowStateMachine::auto_release`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn auto_release(&mut self, sender: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.transact(sender, |m, _, ctx| m.auto_release(ctx, id))
    }

    /// See [`EscrowStateMachine::resolve_stale_dispute`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn resolve_stale_dispute(&mut self, sender: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.transact(sender, |m, _, ctx| m.resolve_stale_dispute(ctx, id))
    }

    /// See [`EscrowStateMachine::execute_split`].
    ///
    /// # Errors
    ///
    /// As the state machine.
    pub fn execute_split(
        &mut self,
        sender: Address,
        wallet: Address,
        to: Address,
        signatures: &[Bytes; 3],
    ) -> Result<SplitReceipt, EscrowError> {
        self.transact(sender, |m, bank, _| m.execute_split(wallet, to, signatures, bank))
    }

    /// `getEscrow(id)`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::EscrowNotFound`] for unknown ids.
    pub fn escrow(&self, id: EscrowId) -> Result<&EscrowDeal, EscrowError> {
        self.machine.escrow(id)
    }

    /// The settlement wallet at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::WalletNotFound`] if nothing is deployed there.
    pub fn wallet(&self, address: Address) -> Result<&SettlementWallet, EscrowError> {
        self.machine.wallet(address)
    }

    /// `getBalance()` of the wallet at `address`.
    ///
    /// # Errors
    ///
    /// [`EscrowError::WalletNotFound`] or an unknown token.
    pub fn wallet_balance(&self, address: Address) -> Result<U256, EscrowError> {
        self.machine.wallet(address)?.balance(&self.bank)
    }

    /// What `signer` must sign to settle the wallet at `address`.
    ///
    /// # Errors
    ///
    /// See [`EscrowStateMachine::split_authorization_digest`].
    pub fn split_authorization_digest(
        &self,
        address: Address,
        signer: Address,
    ) -> Result<B256, EscrowError> {
        self.machine.split_authorization_digest(address, signer)
    }

    /// The event log, oldest first.
    #[must_use]
    pub fn events(&self) -> &[EscrowEvent] {
        self.machine.events()
    }
}
