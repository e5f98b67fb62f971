//! Error types for the escrow protocol.
//!
//! Every failure aborts the whole call and leaves balances and records as they
//! were. [`EscrowError::kind`] sorts failures into the five classes callers act
//! on differently: fix the input, use another signer, wait, or re-read state.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::escrow::{EscrowId, EscrowState};
use crate::signature::SignatureError;
use crate::timestamp::UnixTimestamp;
use crate::token::TokenError;

/// Errors returned by the escrow state machine, the wallet factory and settlement wallets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum EscrowError {
    // --- input validation ---
    /// Title is empty or longer than 100 characters.
    #[error("title must be 1 to 100 characters, got {0}")]
    InvalidTitle(usize),
    /// IPFS hash is empty or longer than 100 characters.
    #[error("IPFS hash must be 1 to 100 characters, got {0}")]
    InvalidIpfsHash(usize),
    /// Amount is below the decimals-aware minimum.
    #[error("amount {amount} is below the minimum {minimum}")]
    AmountTooSmall {
        /// Requested amount.
        amount: U256,
        /// Minimum for the token's decimals.
        minimum: U256,
    },
    /// Maturity exceeds the ten-year cap.
    #[error("maturity of {0} days exceeds the maximum")]
    MaturityTooLong(u64),
    /// Buyer and seller are the same address.
    #[error("buyer and seller must differ")]
    BuyerIsSeller,
    /// Arbiter is the buyer or the seller.
    #[error("arbiter must not be a party to the escrow")]
    ArbiterConflict,
    /// Arbiter is the fee receiver.
    #[error("arbiter must not be the fee receiver")]
    ArbiterIsFeeReceiver,
    /// A required address is zero.
    #[error("{0} must not be the zero address")]
    ZeroAddress(&'static str),
    /// Token decimals are outside `[6, 18]`.
    #[error("token decimals {0} outside the supported range")]
    UnsupportedDecimals(u8),

    // --- authorization ---
    /// Only the buyer may perform this action.
    #[error("caller {0} is not the buyer")]
    OnlyBuyer(Address),
    /// Only the arbiter may perform this action.
    #[error("caller {0} is not the arbiter")]
    OnlyArbiter(Address),
    /// Only the buyer or the seller may perform this action.
    #[error("caller {0} is neither buyer nor seller")]
    OnlyBuyerOrSeller(Address),
    /// Caller is not buyer, seller or arbiter.
    #[error("caller {0} is not a participant")]
    NotParticipant(Address),
    /// Only the seller may create the escrow directly.
    #[error("caller {0} is not the seller")]
    OnlySeller(Address),
    /// Only the escrow contract may deploy wallets.
    #[error("caller {0} is not the escrow contract")]
    OnlyEscrowContract(Address),
    /// A signature recovered to someone other than the claimed signer.
    #[error("signature recovered {recovered}, expected {expected}")]
    SignerMismatch {
        /// Address the message claims signed it.
        expected: Address,
        /// Address actually recovered.
        recovered: Address,
    },
    /// Fewer than two distinct owners approved the split.
    #[error("{valid} of {required} required owner signatures")]
    InsufficientSignatures {
        /// Valid owner signatures found.
        valid: usize,
        /// Threshold.
        required: usize,
    },
    /// The same owner approved in more than one slot.
    #[error("owner {0} signed more than once")]
    DuplicateSigner(Address),
    /// Address is not a wallet owner.
    #[error("{0} is not a wallet owner")]
    NotOwner(Address),

    // --- signature format ---
    /// Malformed, non-canonical or unrecoverable signature.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    // --- temporal ---
    /// `now >= deadline`.
    #[error("authorization expired at {0}")]
    DeadlineExpired(UnixTimestamp),
    /// Deadline beyond the one-day authorization window.
    #[error("authorization deadline {0} is too far in the future")]
    DeadlineTooFar(UnixTimestamp),
    /// The post-maturity grace period has not ended.
    #[error("grace period active until {0}")]
    GracePeriodActive(UnixTimestamp),
    /// Auto-release is not yet available.
    #[error("auto-release available after {0}")]
    ReleaseNotDue(UnixTimestamp),
    /// The dispute evidence window has not elapsed.
    #[error("evidence window open until {0}")]
    EvidenceWindowActive(UnixTimestamp),
    /// The emergency recovery delay has not elapsed.
    #[error("emergency recovery available at {0}")]
    RecoveryNotDue(UnixTimestamp),

    // --- state ---
    /// No escrow with this id.
    #[error("escrow {0} does not exist")]
    EscrowNotFound(EscrowId),
    /// Escrow is not in the state the transition requires.
    #[error("escrow {id} is {actual}, expected {expected}")]
    InvalidState {
        /// Escrow id.
        id: EscrowId,
        /// Required state.
        expected: EscrowState,
        /// Current state.
        actual: EscrowState,
    },
    /// Settlement requires a terminal escrow state.
    #[error("escrow {id} is {state}, not settled")]
    EscrowNotFinal {
        /// Escrow id.
        id: EscrowId,
        /// Current state.
        state: EscrowState,
    },
    /// The escrow has no arbiter, so disputes are unavailable.
    #[error("escrow {0} has no arbiter")]
    DisputesUnavailable(EscrowId),
    /// This role already submitted evidence.
    #[error("evidence already submitted by {0}")]
    EvidenceAlreadySubmitted(Address),
    /// This party already requested cancellation.
    #[error("cancellation already requested by {0}")]
    CancelAlreadyRequested(Address),
    /// The buyer has not requested cancellation.
    #[error("buyer has not requested cancellation")]
    CancelNotRequested,
    /// Signed nonce differs from the escrow's current nonce.
    #[error("nonce {provided} does not match current nonce {current}")]
    InvalidNonce {
        /// Nonce carried in the message.
        provided: U256,
        /// Nonce the escrow expects.
        current: U256,
    },
    /// The participant already consumed this nonce.
    #[error("nonce {0} already used")]
    NonceAlreadyUsed(U256),
    /// The exact signature was already consumed.
    #[error("signature already used")]
    SignatureAlreadyUsed,
    /// A wallet is already deployed at this address.
    #[error("wallet already deployed at {0}")]
    WalletAlreadyDeployed(Address),
    /// No wallet is deployed at this address.
    #[error("no wallet deployed at {0}")]
    WalletNotFound(Address),
    /// The wallet is not the custodian recorded for its escrow.
    #[error("wallet {0} is not bound to its escrow")]
    WalletMismatch(Address),
    /// `to` is not the recipient implied by the final state.
    #[error("recipient {provided} does not match {expected}")]
    RecipientMismatch {
        /// Recipient requested by the caller.
        provided: Address,
        /// Recipient implied by the escrow state.
        expected: Address,
    },
    /// Nothing left to transfer.
    #[error("wallet {0} holds nothing to split")]
    NothingToSplit(Address),
    /// A state-mutating call re-entered the contract.
    #[error("reentrant call")]
    Reentrancy,

    // --- token ---
    /// Token interaction failed.
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl EscrowError {
    /// The failure class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTitle(_)
            | Self::InvalidIpfsHash(_)
            | Self::AmountTooSmall { .. }
            | Self::MaturityTooLong(_)
            | Self::BuyerIsSeller
            | Self::ArbiterConflict
            | Self::ArbiterIsFeeReceiver
            | Self::ZeroAddress(_)
            | Self::UnsupportedDecimals(_) => ErrorKind::Validation,
            Self::OnlyBuyer(_)
            | Self::OnlyArbiter(_)
            | Self::OnlyBuyerOrSeller(_)
            | Self::NotParticipant(_)
            | Self::OnlySeller(_)
            | Self::OnlyEscrowContract(_)
            | Self::SignerMismatch { .. }
            | Self::InsufficientSignatures { .. }
            | Self::DuplicateSigner(_)
            | Self::NotOwner(_) => ErrorKind::Authorization,
            Self::Signature(_) => ErrorKind::Signature,
            Self::DeadlineExpired(_)
            | Self::DeadlineTooFar(_)
            | Self::GracePeriodActive(_)
            | Self::ReleaseNotDue(_)
            | Self::EvidenceWindowActive(_)
            | Self::RecoveryNotDue(_) => ErrorKind::Temporal,
            Self::EscrowNotFound(_)
            | Self::InvalidState { .. }
            | Self::EscrowNotFinal { .. }
            | Self::DisputesUnavailable(_)
            | Self::EvidenceAlreadySubmitted(_)
            | Self::CancelAlreadyRequested(_)
            | Self::CancelNotRequested
            | Self::InvalidNonce { .. }
            | Self::NonceAlreadyUsed(_)
            | Self::SignatureAlreadyUsed
            | Self::WalletAlreadyDeployed(_)
            | Self::WalletNotFound(_)
            | Self::WalletMismatch(_)
            | Self::RecipientMismatch { .. }
            | Self::NothingToSplit(_)
            | Self::Reentrancy => ErrorKind::State,
            Self::Token(_) => ErrorKind::Token,
        }
    }

    /// Stable error name for integrators, e.g. `"OnlyBuyer"` or `"SignatureSInvalid"`.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTitle(_) => "InvalidTitle",
            Self::InvalidIpfsHash(_) => "InvalidIpfsHash",
            Self::AmountTooSmall { .. } => "AmountTooSmall",
            Self::MaturityTooLong(_) => "MaturityTooLong",
            Self::BuyerIsSeller => "BuyerIsSeller",
            Self::ArbiterConflict => "ArbiterConflict",
            Self::ArbiterIsFeeReceiver => "ArbiterIsFeeReceiver",
            Self::ZeroAddress(_) => "ZeroAddress",
            Self::UnsupportedDecimals(_) => "UnsupportedDecimals",
            Self::OnlyBuyer(_) => "OnlyBuyer",
            Self::OnlyArbiter(_) => "OnlyArbiter",
            Self::OnlyBuyerOrSeller(_) => "OnlyBuyerOrSeller",
            Self::NotParticipant(_) => "NotParticipant",
            Self::OnlySeller(_) => "OnlySeller",
            Self::OnlyEscrowContract(_) => "OnlyEscrowContract",
            Self::SignerMismatch { .. } => "SignerMismatch",
            Self::InsufficientSignatures { .. } => "InsufficientSignatures",
            Self::DuplicateSigner(_) => "DuplicateSigner",
            Self::NotOwner(_) => "NotOwner",
            Self::Signature(SignatureError::SignatureLengthInvalid(_)) => "SignatureLengthInvalid",
            Self::Signature(SignatureError::SignatureSInvalid) => "SignatureSInvalid",
            Self::Signature(SignatureError::SignatureVInvalid(_)) => "SignatureVInvalid",
            Self::Signature(SignatureError::InvalidSignature) => "InvalidSignature",
            Self::DeadlineExpired(_) => "DeadlineExpired",
            Self::DeadlineTooFar(_) => "DeadlineTooFar",
            Self::GracePeriodActive(_) => "GracePeriodActive",
            Self::ReleaseNotDue(_) => "ReleaseNotDue",
            Self::EvidenceWindowActive(_) => "EvidenceWindowActive",
            Self::RecoveryNotDue(_) => "RecoveryNotDue",
            Self::EscrowNotFound(_) => "EscrowNotFound",
            Self::InvalidState { .. } => "InvalidState",
            Self::EscrowNotFinal { .. } => "EscrowNotFinal",
            Self::DisputesUnavailable(_) => "DisputesUnavailable",
            Self::EvidenceAlreadySubmitted(_) => "EvidenceAlreadySubmitted",
            Self::CancelAlreadyRequested(_) => "CancelAlreadyRequested",
            Self::CancelNotRequested => "CancelNotRequested",
            Self::InvalidNonce { .. } => "InvalidNonce",
            Self::NonceAlreadyUsed(_) => "NonceAlreadyUsed",
            Self::SignatureAlreadyUsed => "SignatureAlreadyUsed",
            Self::WalletAlreadyDeployed(_) => "WalletAlreadyDeployed",
            Self::WalletNotFound(_) => "WalletNotFound",
            Self::WalletMismatch(_) => "WalletMismatch",
            Self::RecipientMismatch { .. } => "RecipientMismatch",
            Self::NothingToSplit(_) => "NothingToSplit",
            Self::Reentrancy => "Reentrancy",
            Self::Token(e) => e.code(),
        }
    }
}

/// Failure classes.
///
/// Validation and signature failures need a corrected request; authorization
/// failures need a different signer; temporal failures clear by waiting;
/// state failures mean the caller should re-read the escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, rejected before any mutation.
    Validation,
    /// Wrong caller, wrong signer or too few approvals.
    Authorization,
    /// Malformed or non-canonical signature.
    Signature,
    /// Deadline or waiting period not satisfied.
    Temporal,
    /// Wrong escrow state or replayed authorization.
    State,
    /// Token transfer failure.
    Token,
}

impl ErrorKind {
    /// Returns the `snake_case` string representation matching the wire format.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Signature => "signature",
            Self::Temporal => "temporal",
            Self::State => "state",
            Self::Token => "token",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_errors_keep_their_names() {
        let err = EscrowError::from(SignatureError::SignatureSInvalid);
        assert_eq!(err.kind(), ErrorKind::Signature);
        assert_eq!(err.code(), "SignatureSInvalid");
    }

    #[test]
    fn role_errors_are_authorization() {
        for err in [
            EscrowError::OnlyBuyer(Address::ZERO),
            EscrowError::OnlyArbiter(Address::ZERO),
            EscrowError::OnlyBuyerOrSeller(Address::ZERO),
            EscrowError::NotParticipant(Address::ZERO),
        ] {
            assert_eq!(err.kind(), ErrorKind::Authorization);
        }
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Temporal).unwrap();
        assert_eq!(json, "\"temporal\"");
        assert_eq!(ErrorKind::Temporal.to_string(), "temporal");
    }
}
