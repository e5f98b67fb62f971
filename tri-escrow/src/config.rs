//! Deployment parameters of an escrow contract.

use alloy_primitives::Address;
use alloy_sol_types::Eip712Domain;
use serde::{Deserialize, Serialize};

use crate::chain::ChainId;
use crate::domain::{DOMAIN_VERSION, ESCROW_DOMAIN_NAME, escrow_domain};

/// Where an escrow contract lives and who collects its fees.
///
/// # Example
///
/// ```rust
/// use tri_escrow::config::ProtocolConfig;
///
/// let config: ProtocolConfig = serde_json::from_str(r#"{
///     "chainId": 31337,
///     "escrowAddress": "0x00000000000000000000000000000000000000e5",
///     "factoryAddress": "0x00000000000000000000000000000000000000fa",
///     "feeTo": "0x00000000000000000000000000000000000000fe"
/// }"#).unwrap();
/// assert_eq!(config.name, "TriEscrow");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolConfig {
    /// EIP-712 domain name.
    #[serde(default = "default_name")]
    pub name: String,

    /// EIP-712 domain version.
    #[serde(default = "default_version")]
    pub version: String,

    /// EIP-155 chain id.
    pub chain_id: ChainId,

    /// Escrow contract address, the `verifyingContract` of its domain.
    pub escrow_address: Address,

    /// Wallet factory address, the CREATE2 deployer.
    pub factory_address: Address,

    /// Protocol fee receiver.
    pub fee_to: Address,
}

fn default_name() -> String {
    ESCROW_DOMAIN_NAME.to_owned()
}

fn default_version() -> String {
    DOMAIN_VERSION.to_owned()
}

/// Inconsistent deployment parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required address is zero.
    #[error("{0} must not be the zero address")]
    ZeroAddress(&'static str),
    /// Escrow contract and factory share an address.
    #[error("escrow and factory addresses must differ")]
    AddressCollision,
}

impl ProtocolConfig {
    /// Checks the addresses are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on a zero or shared address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.escrow_address == Address::ZERO {
            return Err(ConfigError::ZeroAddress("escrowAddress"));
        }
        if self.factory_address == Address::ZERO {
            return Err(ConfigError::ZeroAddress("factoryAddress"));
        }
        if self.fee_to == Address::ZERO {
            return Err(ConfigError::ZeroAddress("feeTo"));
        }
        if self.escrow_address == self.factory_address {
            return Err(ConfigError::AddressCollision);
        }
        Ok(())
    }

    /// The escrow contract's EIP-712 domain.
    #[must_use]
    pub fn escrow_domain(&self) -> Eip712Domain {
        escrow_domain(&self.name, &self.version, self.chain_id, self.escrow_address)
    }
}
