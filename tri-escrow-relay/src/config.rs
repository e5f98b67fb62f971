//! Relay server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4021
//! network = "eip155:31337"
//! relayer = "$RELAYER_ADDRESS"
//!
//! [protocol]
//! chainId = 31337
//! escrowAddress = "0x00000000000000000000000000000000000000e5"
//! factoryAddress = "0x00000000000000000000000000000000000000fa"
//! feeTo = "0x00000000000000000000000000000000000000fe"
//!
//! [clock]
//! mode = "manual"
//! now = "1700000000"
//!
//! [[tokens]]
//! address = "0x0000000000000000000000000000000000000070"
//! symbol = "USDC"
//! decimals = 6
//!
//! [tokens.balances]
//! "0x00000000000000000000000000000000000000b1" = "1000000000"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: Path to configuration file (default: `config.toml`)
//! - `HOST`: Override server bind address
//! - `PORT`: Override server port
//! - Any `$VAR` referenced in the config file

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tri_escrow::chain::{ChainId, Clock, parse_caip2};
use tri_escrow::config::ProtocolConfig;
use tri_escrow::token::{InMemoryBank, InMemoryToken};
use tri_escrow::{LocalChain, config};

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4021`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// CAIP-2 identifier of the served chain; must match `protocol.chainId`.
    #[serde(default = "default_network")]
    pub network: String,

    /// Address the relay submits transactions from.
    pub relayer: Address,

    /// The escrow deployment.
    pub protocol: ProtocolConfig,

    /// Block timestamp source (default: system time).
    #[serde(default)]
    pub clock: Clock,

    /// Tokens deployed at startup.
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,

    /// Exposes the `/dev` routes for creating escrows, funding and moving the clock.
    #[serde(default)]
    pub dev_routes: bool,
}

/// An ERC20 deployed on the local ledger at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token contract address.
    pub address: Address,

    /// Ticker.
    pub symbol: String,

    /// `decimals()`.
    pub decimals: u8,

    /// Initial balances.
    #[serde(default)]
    pub balances: HashMap<Address, U256>,
}

/// Inconsistent relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `network` is not an `eip155:` identifier.
    #[error("invalid CAIP-2 network identifier: {0}")]
    InvalidNetwork(String),

    /// `network` names a different chain than the protocol domain.
    #[error("network {network} does not match protocol chain id {chain_id}")]
    ChainMismatch {
        /// Configured network.
        network: String,
        /// `protocol.chainId`.
        chain_id: ChainId,
    },

    /// The relayer address is zero.
    #[error("relayer must not be the zero address")]
    ZeroRelayer,

    /// Two tokens share an address.
    #[error("token {0} is configured twice")]
    DuplicateToken(Address),

    /// Protocol parameters are unusable.
    #[error(transparent)]
    Protocol(#[from] config::ConfigError),
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

const fn default_port() -> u16 {
    4021
}

fn default_network() -> String {
    "eip155:31337".to_owned()
}

impl RelayConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// After loading, all string values with `$VAR` / `${VAR}` references
    /// are expanded from the process environment. `HOST` and `PORT` env vars
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let mut config = Self::parse(&content)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }

    /// Parses TOML text after environment expansion.
    ///
    /// # Errors
    ///
    /// Returns [`toml::de::Error`] if the text is not a valid configuration.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(&expand_env_vars(content))
    }

    /// Checks the relay and protocol sections agree.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first inconsistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chain_id = parse_caip2(&self.network)
            .ok_or_else(|| ConfigError::InvalidNetwork(self.network.clone()))?;
        if chain_id != self.protocol.chain_id {
            return Err(ConfigError::ChainMismatch {
                network: self.network.clone(),
                chain_id: self.protocol.chain_id,
            });
        }
        if self.relayer == Address::ZERO {
            return Err(ConfigError::ZeroRelayer);
        }
        let mut seen = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            if seen.contains(&token.address) {
                return Err(ConfigError::DuplicateToken(token.address));
            }
            seen.push(token.address);
        }
        self.protocol.validate()?;
        Ok(())
    }

    /// Token contracts with their initial balances.
    #[must_use]
    pub fn bank(&self) -> InMemoryBank {
        let mut bank = InMemoryBank::new();
        for cfg in &self.tokens {
            let mut token = InMemoryToken::new(cfg.symbol.clone(), cfg.decimals);
            for (owner, amount) in &cfg.balances {
                token.mint(*owner, *amount);
            }
            bank.deploy(cfg.address, token);
        }
        bank
    }

    /// Validates the configuration and deploys the ledger it describes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails.
    pub fn ledger(&self) -> Result<LocalChain<InMemoryBank>, ConfigError> {
        self.validate()?;
        Ok(LocalChain::new(&self.protocol, self.bank(), self.clock)?)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                break;
            }
            if !braced && !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Ok(val) = std::env::var(&var_name) {
            result.push_str(&val);
        } else {
            // Unresolved: keep the reference verbatim
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}
