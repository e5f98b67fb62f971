//! EIP-712 domains and typed messages.
//!
//! Two independent domains exist. The escrow domain binds confirm, cancel,
//! dispute and wallet-consent signatures to one escrow contract on one chain.
//! Each settlement wallet has its own domain with the wallet as
//! `verifyingContract`, so a split approval for one wallet never verifies for
//! another even when every message field matches.

use alloy_primitives::{Address, B256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};

use crate::chain::ChainId;
use crate::error::EscrowError;
use crate::timestamp::{DAY, UnixTimestamp};

/// EIP-712 `name` of the escrow contract.
pub const ESCROW_DOMAIN_NAME: &str = "TriEscrow";

/// EIP-712 `name` of every settlement wallet.
pub const WALLET_DOMAIN_NAME: &str = "TriEscrowSettlementWallet";

/// EIP-712 `version` of both domains.
pub const DOMAIN_VERSION: &str = "1";

/// Longest accepted distance between `now` and a signed `deadline`.
pub const MAX_AUTHORIZATION_WINDOW: u64 = DAY;

sol!(
    /// Buyer's authorization to mark the goods delivered.
    #[derive(Debug, PartialEq, Eq)]
    struct ConfirmDelivery {
        uint256 escrowId;
        address buyer;
        uint256 nonce;
        uint256 deadline;
    }

    /// Buyer's or seller's request to cancel.
    #[derive(Debug, PartialEq, Eq)]
    struct RequestCancel {
        uint256 escrowId;
        address requester;
        uint256 nonce;
        uint256 deadline;
    }

    /// Buyer's or seller's request to open a dispute.
    #[derive(Debug, PartialEq, Eq)]
    struct StartDispute {
        uint256 escrowId;
        address initiator;
        uint256 nonce;
        uint256 deadline;
    }

    /// A participant's consent that `wallet` custodies `escrowId`.
    #[derive(Debug, PartialEq, Eq)]
    struct WalletAuthorization {
        uint256 escrowId;
        address wallet;
        address participant;
    }

    /// Owner approval for a settlement wallet payout.
    ///
    /// Signed under the wallet's own domain.
    #[derive(Debug, PartialEq, Eq)]
    struct Split {
        uint256 escrowId;
        address token;
        address to;
        address feeTo;
        uint256 nonce;
    }
);

/// Domain of the escrow state machine.
#[must_use]
pub fn escrow_domain(
    name: &str,
    version: &str,
    chain_id: ChainId,
    escrow_contract: Address,
) -> Eip712Domain {
    eip712_domain! {
        name: name.to_owned(),
        version: version.to_owned(),
        chain_id: chain_id,
        verifying_contract: escrow_contract,
    }
}

/// Domain of one settlement wallet.
#[must_use]
pub fn wallet_domain(chain_id: ChainId, wallet: Address) -> Eip712Domain {
    eip712_domain! {
        name: WALLET_DOMAIN_NAME,
        version: DOMAIN_VERSION,
        chain_id: chain_id,
        verifying_contract: wallet,
    }
}

/// The digest a signer signs for `message` under `domain`.
#[must_use]
pub fn signing_digest<T: SolStruct>(message: &T, domain: &Eip712Domain) -> B256 {
    message.eip712_signing_hash(domain)
}

/// Validates a signed `deadline` against the block timestamp.
///
/// Expiry is strict: a deadline equal to `now` has already passed. Deadlines
/// more than [`MAX_AUTHORIZATION_WINDOW`] ahead are refused so a relayer
/// cannot hold a signature for long.
///
/// # Errors
///
/// Returns [`EscrowError::DeadlineExpired`] or [`EscrowError::DeadlineTooFar`].
pub fn check_deadline(now: UnixTimestamp, deadline: UnixTimestamp) -> Result<(), EscrowError> {
    if now >= deadline {
        return Err(EscrowError::DeadlineExpired(deadline));
    }
    if deadline > now + MAX_AUTHORIZATION_WINDOW {
        return Err(EscrowError::DeadlineTooFar(deadline));
    }
    Ok(())
}
