//! Replay protection for signed escrow transitions.
//!
//! Two independent guards, checked together at the authorization boundary:
//!
//! - the per-escrow counter (`EscrowDeal::nonce`) that a signed message must
//!   match, plus the per-participant record of consumed nonces kept here;
//! - the used-signature set, keyed by [`signature_hash`](crate::signature::signature_hash),
//!   which catches literal resubmission even if the counters ever diverge.

use std::collections::HashSet;

use alloy_primitives::{Address, B256, U256};

use crate::error::EscrowError;
use crate::escrow::EscrowId;

/// Consumed nonces and signatures of one escrow contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonceRegistry {
    nonces: HashSet<(EscrowId, Address, U256)>,
    signatures: HashSet<B256>,
}

impl NonceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `isNonceUsed(id, participant, nonce)`.
    #[must_use]
    pub fn is_nonce_used(&self, id: EscrowId, participant: Address, nonce: U256) -> bool {
        self.nonces.contains(&(id, participant, nonce))
    }

    /// Whether this signature hash was already consumed.
    #[must_use]
    pub fn is_signature_used(&self, signature_hash: &B256) -> bool {
        self.signatures.contains(signature_hash)
    }

    /// Fails if either guard has seen this authorization.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NonceAlreadyUsed`] or [`EscrowError::SignatureAlreadyUsed`].
    pub fn ensure_unused(
        &self,
        id: EscrowId,
        participant: Address,
        nonce: U256,
        signature_hash: &B256,
    ) -> Result<(), EscrowError> {
        if self.is_nonce_used(id, participant, nonce) {
            return Err(EscrowError::NonceAlreadyUsed(nonce));
        }
        if self.is_signature_used(signature_hash) {
            return Err(EscrowError::SignatureAlreadyUsed);
        }
        Ok(())
    }

    /// Records a successful consumption.
    pub fn consume(&mut self, id: EscrowId, participant: Address, nonce: U256, signature_hash: B256) {
        self.nonces.insert((id, participant, nonce));
        self.signatures.insert(signature_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUYER: Address = Address::repeat_byte(0xB1);

    #[test]
    fn consumed_nonce_is_scoped_to_escrow_and_participant() {
        let mut registry = NonceRegistry::new();
        registry.consume(EscrowId(1), BUYER, U256::ZERO, B256::repeat_byte(1));
        assert!(registry.is_nonce_used(EscrowId(1), BUYER, U256::ZERO));
        assert!(!registry.is_nonce_used(EscrowId(2), BUYER, U256::ZERO));
        assert!(!registry.is_nonce_used(EscrowId(1), Address::ZERO, U256::ZERO));
    }

    #[test]
    fn both_guards_reject_independently() {
        let mut registry = NonceRegistry::new();
        registry.consume(EscrowId(1), BUYER, U256::ZERO, B256::repeat_byte(1));
        assert_eq!(
            registry.ensure_unused(EscrowId(1), BUYER, U256::ZERO, &B256::repeat_byte(2)),
            Err(EscrowError::NonceAlreadyUsed(U256::ZERO))
        );
        assert_eq!(
            registry.ensure_unused(EscrowId(1), BUYER, U256::from(1), &B256::repeat_byte(1)),
            Err(EscrowError::SignatureAlreadyUsed)
        );
        assert!(
            registry
                .ensure_unused(EscrowId(1), BUYER, U256::from(1), &B256::repeat_byte(2))
                .is_ok()
        );
    }
}
