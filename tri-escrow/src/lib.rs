#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Non-custodial escrow for ERC20 payments with 2-of-3 settlement wallets.
//!
//! A buyer pays a seller through an escrow that never holds the funds
//! itself. Each deal gets its own settlement wallet at a CREATE2 address
//! derived from the escrow id, so both parties can verify where the deposit
//! goes before it is made. The wallet releases funds only when two of its
//! three owners (buyer, seller, arbiter) sign off on the payout that the
//! escrow's final state dictates.
//!
//! Every transition can be called directly by the authorized party or
//! relayed as an EIP-712 signed meta-transaction. Signed transitions are
//! single-use: each carries the escrow nonce and a short deadline, and
//! its signature hash is recorded once consumed.
//!
//! # Modules
//!
//! - [`signature`] - Canonical secp256k1 signature parsing and signer recovery
//! - [`domain`] - EIP-712 domains and typed messages
//! - [`nonce`] - Replay protection for signed transitions
//! - [`wallet`] - Settlement wallets and their deterministic factory
//! - [`escrow`] - The escrow state machine, roles, fees and events
//! - [`ledger`] - A sequential, all-or-nothing ledger hosting one deployment
//! - [`token`] - The ERC20 surface the protocol consumes
//! - [`config`] - Deployment parameters
//! - [`chain`] - Chain ids, clocks and call context
//! - [`timestamp`] - Unix timestamps
//! - [`error`] - The error taxonomy
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation of transitions and splits

pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod lock;
pub mod nonce;
pub mod signature;
pub mod timestamp;
pub mod token;
pub mod wallet;

pub use config::ProtocolConfig;
pub use error::{ErrorKind, EscrowError};
pub use escrow::{EscrowStateMachine, SignedAuthorization};
pub use ledger::LocalChain;
