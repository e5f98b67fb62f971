//! The role matrix.
//!
//! Every transition names the role it needs; [`authorize`] maps the resolved
//! actor (the direct caller, or the recovered signer of a signed call) to a
//! [`Role`] or to the role-specific error.

use alloy_primitives::Address;

use super::types::{EscrowDeal, Role};
use crate::error::EscrowError;

/// Who may perform a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Required {
    /// `deposit`, `confirmDelivery`, `cancelByTimeout`.
    Buyer,
    /// `submitArbiterDecision`.
    Arbiter,
    /// `requestCancel`, `startDispute`, `resolveStaleDispute`.
    BuyerOrSeller,
    /// `submitDisputeMessage`.
    Participant,
}

/// Resolves `actor`'s role in `deal` and checks it satisfies `required`.
///
/// # Errors
///
/// [`EscrowError::OnlyBuyer`], [`EscrowError::OnlyArbiter`],
/// [`EscrowError::OnlyBuyerOrSeller`] or [`EscrowError::NotParticipant`].
pub fn authorize(deal: &EscrowDeal, actor: Address, required: Required) -> Result<Role, EscrowError> {
    match (required, deal.role_of(actor)) {
        (Required::Buyer, Some(role @ Role::Buyer))
        | (Required::Arbiter, Some(role @ Role::Arbiter))
        | (Required::BuyerOrSeller, Some(role @ (Role::Buyer | Role::Seller)))
        | (Required::Participant, Some(role)) => Ok(role),
        (Required::Buyer, _) => Err(EscrowError::OnlyBuyer(actor)),
        (Required::Arbiter, _) => Err(EscrowError::OnlyArbiter(actor)),
        (Required::BuyerOrSeller, _) => Err(EscrowError::OnlyBuyerOrSeller(actor)),
        (Required::Participant, None) => Err(EscrowError::NotParticipant(actor)),
    }
}
