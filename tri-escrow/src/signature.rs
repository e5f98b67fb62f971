//! ECDSA signature parsing and signer recovery.
//!
//! Every signed authorization in the protocol (escrow transitions, the
//! seller's wallet consent, wallet split approvals) is a 65-byte `r || s || v`
//! secp256k1 signature over an EIP-712 digest. Format checks run before any
//! business rule: a malformed signature cannot express intent.
//!
//! Only canonical signatures are accepted. For every valid `(r, s, v)` the
//! triple `(r, n - s, v ^ 1)` also verifies; requiring `s <= n / 2` leaves a
//! single valid encoding per intent.

use alloy_primitives::{Address, B256, Bytes, Signature, U256, keccak256, uint};
use alloy_sol_types::SolValue;

use crate::chain::ChainId;

/// Length of an `r || s || v` signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// Order of the secp256k1 curve.
pub const SECP256K1N: U256 =
    uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

/// Upper bound (inclusive) for the `s` value of a canonical signature.
pub const SECP256K1N_HALF: U256 =
    uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// Signature-format failures. Always reported before any role or state check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The signature is not exactly 65 bytes.
    #[error("signature must be {SIGNATURE_LENGTH} bytes, got {0}")]
    SignatureLengthInvalid(usize),
    /// `s` is above `secp256k1n / 2`.
    #[error("signature s value is not in the lower half order")]
    SignatureSInvalid,
    /// `v` is neither 27 nor 28.
    #[error("signature v value must be 27 or 28, got {0}")]
    SignatureVInvalid(u8),
    /// Recovery failed or produced the zero address.
    #[error("signature does not recover to a valid signer")]
    InvalidSignature,
}

/// The `r`, `s`, `v` components of a well-formed signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    /// `r` scalar.
    pub r: B256,
    /// `s` scalar, guaranteed `<= SECP256K1N_HALF`.
    pub s: B256,
    /// Recovery byte, 27 or 28.
    pub v: u8,
}

impl RawSignature {
    /// Splits and validates a 65-byte signature.
    ///
    /// # Errors
    ///
    /// Returns the first format violation found, checked in the order
    /// length, `s`, `v`.
    pub fn parse(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(SignatureError::SignatureLengthInvalid(bytes.len()));
        }
        let r = B256::from_slice(&bytes[..32]);
        let s = B256::from_slice(&bytes[32..64]);
        let v = bytes[64];
        if U256::from_be_bytes(s.0) > SECP256K1N_HALF {
            return Err(SignatureError::SignatureSInvalid);
        }
        if v != 27 && v != 28 {
            return Err(SignatureError::SignatureVInvalid(v));
        }
        Ok(Self { r, s, v })
    }

    /// Recovers the signer of `digest`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::InvalidSignature`] if the point does not
    /// recover or recovers to the zero address.
    pub fn recover(&self, digest: &B256) -> Result<Address, SignatureError> {
        let signature = Signature::new(
            U256::from_be_bytes(self.r.0),
            U256::from_be_bytes(self.s.0),
            self.v == 28,
        );
        let signer = signature
            .recover_address_from_prehash(digest)
            .map_err(|_| SignatureError::InvalidSignature)?;
        if signer == Address::ZERO {
            return Err(SignatureError::InvalidSignature);
        }
        Ok(signer)
    }
}

/// Recovers the address that signed `digest`.
///
/// # Errors
///
/// Returns a [`SignatureError`] for malformed, non-canonical or unrecoverable signatures.
pub fn recover_signer(digest: &B256, signature: &[u8]) -> Result<Address, SignatureError> {
    RawSignature::parse(signature)?.recover(digest)
}

/// Returns whether `signature` over `digest` was produced by `expected`.
///
/// # Errors
///
/// Format errors propagate; a well-formed signature from someone else is `Ok(false)`.
pub fn verify_signer(
    digest: &B256,
    signature: &[u8],
    expected: Address,
) -> Result<bool, SignatureError> {
    Ok(recover_signer(digest, signature)? == expected)
}

/// Key of the used-signature registry.
///
/// `keccak256(abi.encode(contract, scope, r, s, chainId))`, where `scope` is
/// the escrow id for the state machine and the wallet nonce for wallets.
#[must_use]
pub fn signature_hash(
    contract: Address,
    scope: U256,
    signature: &RawSignature,
    chain_id: ChainId,
) -> B256 {
    keccak256((contract, scope, signature.r, signature.s, U256::from(chain_id)).abi_encode())
}

/// One slot of a multisig signature bundle.
///
/// An empty byte string is the "not signed" sentinel, distinct from a
/// signature that is present but bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureSlot<'a> {
    /// The owner has not signed.
    Empty,
    /// The owner's signature bytes, not yet validated.
    Provided(&'a [u8]),
}

impl<'a> From<&'a Bytes> for SignatureSlot<'a> {
    fn from(bytes: &'a Bytes) -> Self {
        if bytes.is_empty() {
            Self::Empty
        } else {
            Self::Provided(bytes.as_ref())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::{malleate, sign};
    use super::*;
    use alloy_signer_local::PrivateKeySigner;

    fn digest() -> B256 {
        keccak256(b"tri-escrow signature test")
    }

    #[test]
    fn recovers_canonical_signer() {
        let signer = PrivateKeySigner::random();
        let sig = sign(&signer, &digest());
        assert_eq!(recover_signer(&digest(), &sig).unwrap(), signer.address());
        assert!(verify_signer(&digest(), &sig, signer.address()).unwrap());
        assert!(!verify_signer(&digest(), &sig, Address::repeat_byte(7)).unwrap());
    }

    #[test]
    fn rejects_wrong_length() {
        let signer = PrivateKeySigner::random();
        let sig = sign(&signer, &digest());
        assert_eq!(
            recover_signer(&digest(), &sig[..64]),
            Err(SignatureError::SignatureLengthInvalid(64))
        );
        assert_eq!(
            recover_signer(&digest(), &[]),
            Err(SignatureError::SignatureLengthInvalid(0))
        );
    }

    #[test]
    fn rejects_high_s_twin() {
        let signer = PrivateKeySigner::random();
        let sig = sign(&signer, &digest());
        let twin = malleate(&sig);
        assert_eq!(
            recover_signer(&digest(), &twin),
            Err(SignatureError::SignatureSInvalid)
        );
    }

    #[test]
    fn rejects_bad_v() {
        let signer = PrivateKeySigner::random();
        let mut sig = sign(&signer, &digest()).to_vec();
        sig[64] = 1;
        assert_eq!(
            recover_signer(&digest(), &sig),
            Err(SignatureError::SignatureVInvalid(1))
        );
    }

    #[test]
    fn zero_r_does_not_recover() {
        let mut sig = [0u8; 65];
        sig[63] = 1;
        sig[64] = 27;
        assert_eq!(
            recover_signer(&digest(), &sig),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn empty_bytes_are_the_unsigned_sentinel() {
        let empty = Bytes::new();
        assert_eq!(SignatureSlot::from(&empty), SignatureSlot::Empty);
        let some = Bytes::from(vec![1u8]);
        assert!(matches!(SignatureSlot::from(&some), SignatureSlot::Provided(_)));
    }

    #[test]
    fn signature_hash_is_scoped() {
        let signer = PrivateKeySigner::random();
        let raw = RawSignature::parse(&sign(&signer, &digest())).unwrap();
        let contract = Address::repeat_byte(1);
        let a = signature_hash(contract, U256::from(1), &raw, 1);
        let b = signature_hash(contract, U256::from(2), &raw, 1);
        let c = signature_hash(contract, U256::from(1), &raw, 5);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
