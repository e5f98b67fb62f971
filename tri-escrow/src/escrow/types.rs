//! Escrow records, lifecycle states and roles.

use std::fmt;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::timestamp::UnixTimestamp;

/// Sequential escrow identifier, starting at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscrowId(pub u64);

impl EscrowId {
    /// The id as a `uint256`, as it appears in signed messages and salts.
    #[must_use]
    pub fn as_u256(&self) -> U256 {
        U256::from(self.0)
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an escrow.
///
/// ```text
/// AWAITING_PAYMENT --deposit--> AWAITING_DELIVERY --confirm/autoRelease--> COMPLETE
///                                 |        |--both cancel / cancelByTimeout--> CANCELED
///                                 |--startDispute--> DISPUTED --arbiter--> COMPLETE | REFUNDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowState {
    /// Created, waiting for the buyer's deposit.
    AwaitingPayment,
    /// Funded, waiting for delivery.
    AwaitingDelivery,
    /// Under arbitration.
    Disputed,
    /// Seller is paid (minus fee).
    Complete,
    /// Buyer is refunded after a dispute.
    Refunded,
    /// Both sides walked away, or the buyer's cancel timed out.
    Canceled,
}

impl EscrowState {
    /// Terminal states accept no further transition; only the wallet split reads them.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Refunded | Self::Canceled)
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::AwaitingDelivery => "AWAITING_DELIVERY",
            Self::Disputed => "DISPUTED",
            Self::Complete => "COMPLETE",
            Self::Refunded => "REFUNDED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's role in one escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Pays in.
    Buyer,
    /// Delivers and gets paid.
    Seller,
    /// Resolves disputes.
    Arbiter,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::Arbiter => "arbiter",
        })
    }
}

/// The arbiter's ruling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Pay the seller; the 1% fee applies.
    ReleaseToSeller,
    /// Refund the buyer in full.
    RefundBuyer,
}

impl DisputeOutcome {
    /// The terminal state the ruling leads to.
    #[must_use]
    pub const fn final_state(&self) -> EscrowState {
        match self {
            Self::ReleaseToSeller => EscrowState::Complete,
            Self::RefundBuyer => EscrowState::Refunded,
        }
    }
}

/// One evidence slot per role. `None` means not yet submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeEvidence {
    /// Buyer's evidence hash.
    pub buyer: Option<String>,
    /// Seller's evidence hash.
    pub seller: Option<String>,
    /// Arbiter's evidence or resolution hash.
    pub arbiter: Option<String>,
}

impl DisputeEvidence {
    /// The slot belonging to `role`.
    #[must_use]
    pub const fn get(&self, role: Role) -> Option<&String> {
        match role {
            Role::Buyer => self.buyer.as_ref(),
            Role::Seller => self.seller.as_ref(),
            Role::Arbiter => self.arbiter.as_ref(),
        }
    }

    /// Whether `role` has submitted.
    #[must_use]
    pub const fn submitted(&self, role: Role) -> bool {
        self.get(role).is_some()
    }

    pub(crate) const fn slot_mut(&mut self, role: Role) -> &mut Option<String> {
        match role {
            Role::Buyer => &mut self.buyer,
            Role::Seller => &mut self.seller,
            Role::Arbiter => &mut self.arbiter,
        }
    }
}

/// Parameters of a new escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEscrow {
    /// ERC20 token.
    pub token: Address,
    /// Payer.
    pub buyer: Address,
    /// Payee.
    pub seller: Address,
    /// Deal value in the token's smallest unit.
    pub amount: U256,
    /// Days from deposit until maturity.
    pub maturity_days: u64,
    /// Dispute resolver; zero disables disputes.
    pub arbiter: Address,
    /// Human-readable title, 1 to 100 characters.
    pub title: String,
    /// Off-chain terms document, 1 to 100 characters.
    pub ipfs_hash: String,
}

/// An escrow record. Never deleted; terminal records stay for audit and settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowDeal {
    /// Escrow id.
    pub id: EscrowId,
    /// ERC20 token.
    pub token: Address,
    /// Payer.
    pub buyer: Address,
    /// Payee.
    pub seller: Address,
    /// Dispute resolver, possibly zero.
    pub arbiter: Address,
    /// Settlement wallet, fixed at creation.
    pub wallet: Address,
    /// Deal value in the token's smallest unit.
    pub amount: U256,
    /// Token decimals cached at creation.
    pub token_decimals: u8,
    /// Days from deposit until maturity.
    pub maturity_days: u64,
    /// Title.
    pub title: String,
    /// Terms document hash.
    pub ipfs_hash: String,
    /// Set by `deposit`.
    pub deposit_time: Option<UnixTimestamp>,
    /// `deposit_time + maturity_days`.
    pub maturity_time: Option<UnixTimestamp>,
    /// Set by `startDispute`.
    pub dispute_start_time: Option<UnixTimestamp>,
    /// Current state.
    pub state: EscrowState,
    /// Buyer asked to cancel.
    pub buyer_cancel_requested: bool,
    /// Seller asked to cancel.
    pub seller_cancel_requested: bool,
    /// Signed transitions consumed so far.
    pub nonce: U256,
    /// Dispute evidence, one slot per role.
    pub evidence: DisputeEvidence,
}

impl EscrowDeal {
    /// The role `address` holds, if any. The zero address never holds a role.
    #[must_use]
    pub fn role_of(&self, address: Address) -> Option<Role> {
        if address == Address::ZERO {
            None
        } else if address == self.buyer {
            Some(Role::Buyer)
        } else if address == self.seller {
            Some(Role::Seller)
        } else if address == self.arbiter {
            Some(Role::Arbiter)
        } else {
            None
        }
    }

    /// Whether a dispute can ever be opened.
    #[must_use]
    pub fn has_arbiter(&self) -> bool {
        self.arbiter != Address::ZERO
    }

    /// The owner triple of the settlement wallet, in signature-slot order.
    #[must_use]
    pub const fn owners(&self) -> [Address; 3] {
        [self.buyer, self.seller, self.arbiter]
    }
}
