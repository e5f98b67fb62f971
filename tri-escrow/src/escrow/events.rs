//! The ordered event log.
//!
//! Each successful call appends its events in order. A reverted call appends
//! nothing.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use super::types::{DisputeOutcome, EscrowId, Role};
use crate::timestamp::UnixTimestamp;

/// Something that happened to an escrow or its wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EscrowEvent {
    /// A deal was recorded and its wallet deployed.
    EscrowCreated {
        /// Escrow id.
        escrow_id: EscrowId,
        /// ERC20 token.
        token: Address,
        /// Payer.
        buyer: Address,
        /// Payee.
        seller: Address,
        /// Dispute resolver, possibly zero.
        arbiter: Address,
        /// Settlement wallet.
        wallet: Address,
        /// Amount moved or escrowed.
        amount: U256,
    },
    /// The buyer funded the wallet.
    Deposited {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Settlement wallet.
        wallet: Address,
        /// Amount moved or escrowed.
        amount: U256,
        /// When auto-release and cancel timeouts start counting.
        maturity_time: UnixTimestamp,
    },
    /// The buyer confirmed delivery.
    DeliveryConfirmed {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Protocol fee owed on settlement.
        fee: U256,
    },
    /// One side asked to cancel.
    CancelRequested {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Buyer or seller.
        requester: Address,
    },
    /// The escrow was canceled, by agreement or by timeout.
    EscrowCanceled {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Canceled by `cancelByTimeout` rather than mutual request.
        by_timeout: bool,
    },
    /// A dispute was opened.
    DisputeStarted {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Buyer or seller.
        initiator: Address,
    },
    /// A participant submitted evidence.
    DisputeMessage {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Submitter's role.
        role: Role,
        /// Evidence reference.
        ipfs_hash: String,
    },
    /// The arbiter ruled.
    DisputeResolved {
        /// Escrow id.
        escrow_id: EscrowId,
        /// The ruling.
        outcome: DisputeOutcome,
        /// Protocol fee owed on settlement.
        fee: U256,
        /// The arbiter's resolution reference.
        resolution_hash: String,
    },
    /// Maturity plus the release timeout passed without objection.
    AutoReleased {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Protocol fee owed on settlement.
        fee: U256,
    },
    /// An undecided dispute was refunded after the recovery delay.
    StaleDisputeRefunded {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Buyer or seller.
        caller: Address,
    },
    /// A settlement wallet paid out.
    SplitExecuted {
        /// Escrow id.
        escrow_id: EscrowId,
        /// Settlement wallet.
        wallet: Address,
        /// Who received `amount`.
        recipient: Address,
        /// Amount moved or escrowed.
        amount: U256,
        /// Fee receiver.
        fee_to: Address,
        /// Protocol fee owed on settlement.
        fee: U256,
        /// Wallet nonce consumed.
        nonce: U256,
    },
}

impl EscrowEvent {
    /// The escrow the event belongs to.
    #[must_use]
    pub const fn escrow_id(&self) -> EscrowId {
        match self {
            Self::EscrowCreated { escrow_id, .. }
            | Self::Deposited { escrow_id, .. }
            | Self::DeliveryConfirmed { escrow_id, .. }
            | Self::CancelRequested { escrow_id, .. }
            | Self::EscrowCanceled { escrow_id, .. }
            | Self::DisputeStarted { escrow_id, .. }
            | Self::DisputeMessage { escrow_id, .. }
            | Self::DisputeResolved { escrow_id, .. }
            | Self::AutoReleased { escrow_id, .. }
            | Self::StaleDisputeRefunded { escrow_id, .. }
            | Self::SplitExecuted { escrow_id, .. } => *escrow_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let event = EscrowEvent::DeliveryConfirmed {
            escrow_id: EscrowId(3),
            fee: U256::from(100_000u64),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "deliveryConfirmed");
        assert_eq!(json["escrowId"], 3);
        assert_eq!(event.escrow_id(), EscrowId(3));
    }
}
