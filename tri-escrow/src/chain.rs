//! EVM chain primitives for the escrow ledger.
//!
//! - [`ChainId`] - EIP-155 numeric chain id bound into every EIP-712 domain
//! - [`caip2`] / [`parse_caip2`] - CAIP-2 formatting (`eip155:<id>`)
//! - [`Clock`] - source of block timestamps (system time or a manually advanced clock)
//! - [`CallContext`] - the `msg.sender` and block timestamp of one call

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::timestamp::UnixTimestamp;

/// An EIP-155 chain ID (e.g., 1 for Ethereum, 31337 for a local devnet).
pub type ChainId = u64;

/// Formats a chain ID as a CAIP-2 identifier.
///
/// Example: `caip2(8453)` returns `"eip155:8453"`.
#[must_use]
pub fn caip2(chain_id: ChainId) -> String {
    format!("eip155:{chain_id}")
}

/// Parses a CAIP-2 identifier into an EIP-155 chain ID.
///
/// Returns `None` if the input is not a valid `eip155:` prefixed string.
#[must_use]
pub fn parse_caip2(caip: &str) -> Option<ChainId> {
    caip.strip_prefix("eip155:").and_then(|s| s.parse().ok())
}

/// Source of block timestamps for the ledger.
///
/// The relay serves real traffic on [`Clock::System`]; tests and simulations
/// use [`Clock::Manual`] and advance it explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Clock {
    /// Wall-clock time of the host.
    #[default]
    System,
    /// A fixed timestamp, moved only by [`Clock::advance`] or [`Clock::set`].
    Manual {
        /// Current block timestamp.
        now: UnixTimestamp,
    },
}

impl Clock {
    /// A manual clock starting at `secs`.
    #[must_use]
    pub const fn manual(secs: u64) -> Self {
        Self::Manual {
            now: UnixTimestamp::from_secs(secs),
        }
    }

    /// The current block timestamp.
    #[must_use]
    pub fn now(&self) -> UnixTimestamp {
        match self {
            Self::System => UnixTimestamp::now(),
            Self::Manual { now } => *now,
        }
    }

    /// Moves a manual clock forward by `secs`. No-op on the system clock.
    pub fn advance(&mut self, secs: u64) {
        if let Self::Manual { now } = self {
            *now = *now + secs;
        }
    }

    /// Pins the clock to `at`, switching it to manual mode.
    pub fn set(&mut self, at: UnixTimestamp) {
        *self = Self::Manual { now: at };
    }
}

/// The caller and block timestamp of one ledger call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// `msg.sender`: the direct caller, or the relayer for signed calls.
    pub sender: Address,
    /// `block.timestamp` at which the call executes.
    pub now: UnixTimestamp,
}

impl CallContext {
    /// Creates a call context.
    #[must_use]
    pub const fn new(sender: Address, now: UnixTimestamp) -> Self {
        Self { sender, now }
    }
}
