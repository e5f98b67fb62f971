//! The narrow ERC20 surface the protocol consumes.
//!
//! The escrow contract pulls the deposit with `transferFrom` and the
//! settlement wallet pays out with `transfer`. Balances are assumed to change
//! by exactly the transferred amount: fee-on-transfer, rebasing and blocklist
//! tokens are unsupported.
//!
//! [`InMemoryToken`] and [`InMemoryBank`] back the local ledger and the tests.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};

/// Token-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// No token contract at this address.
    #[error("no token deployed at {0}")]
    UnknownToken(Address),
    /// `from` holds less than `amount`.
    #[error("balance {balance} of {owner} is below {amount}")]
    InsufficientBalance {
        /// Account being debited.
        owner: Address,
        /// Its balance.
        balance: U256,
        /// Requested amount.
        amount: U256,
    },
    /// `spender` is allowed less than `amount`.
    #[error("allowance {allowance} for {spender} is below {amount}")]
    InsufficientAllowance {
        /// Account spending on behalf of the owner.
        spender: Address,
        /// Remaining allowance.
        allowance: U256,
        /// Requested amount.
        amount: U256,
    },
    /// The token refused the transfer (returned `false`).
    #[error("token {0} rejected the transfer")]
    TransferRejected(Address),
}

impl TokenError {
    /// Stable error name.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownToken(_) => "UnknownToken",
            Self::InsufficientBalance { .. } => "InsufficientBalance",
            Self::InsufficientAllowance { .. } => "InsufficientAllowance",
            Self::TransferRejected(_) => "TransferRejected",
        }
    }
}

/// ERC20 calls used by the escrow and its wallets.
///
/// Implementations must be all-or-nothing per call: a failed transfer leaves
/// every balance and allowance unchanged.
pub trait Erc20 {
    /// `decimals()`.
    fn decimals(&self) -> u8;

    /// `balanceOf(owner)`.
    fn balance_of(&self, owner: Address) -> U256;

    /// `transfer(to, amount)` sent by `from`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the transfer cannot be made.
    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), TokenError>;

    /// `transferFrom(from, to, amount)` sent by `spender`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if balance or allowance is insufficient.
    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError>;
}

/// Resolves token addresses to token contracts.
pub trait TokenBank {
    /// The token deployed at `address`.
    fn token(&self, address: Address) -> Option<&dyn Erc20>;

    /// Mutable access to the token deployed at `address`.
    fn token_mut(&mut self, address: Address) -> Option<&mut dyn Erc20>;

    /// Like [`TokenBank::token`], failing with [`TokenError::UnknownToken`].
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::UnknownToken`] if nothing is deployed at `address`.
    fn require(&self, address: Address) -> Result<&dyn Erc20, TokenError> {
        self.token(address).ok_or(TokenError::UnknownToken(address))
    }

    /// Like [`TokenBank::token_mut`], failing with [`TokenError::UnknownToken`].
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::UnknownToken`] if nothing is deployed at `address`.
    fn require_mut(&mut self, address: Address) -> Result<&mut dyn Erc20, TokenError> {
        self.token_mut(address)
            .ok_or(TokenError::UnknownToken(address))
    }
}

/// A plain ERC20 ledger: balances and allowances, no hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryToken {
    /// Ticker, informational only.
    pub symbol: String,
    /// `decimals()`.
    pub decimals: u8,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

impl InMemoryToken {
    /// Creates a token with no supply.
    #[must_use]
    pub fn new(symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
            balances: HashMap::new(),
            allowances: HashMap::new(),
        }
    }

    /// Credits `amount` to `to`.
    pub fn mint(&mut self, to: Address, amount: U256) {
        let balance = self.balances.entry(to).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// `approve(spender, amount)` sent by `owner`.
    pub fn approve(&mut self, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((owner, spender), amount);
    }

    /// `allowance(owner, spender)`.
    #[must_use]
    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn debit_check(&self, owner: Address, amount: U256) -> Result<(), TokenError> {
        let balance = self.balance_of(owner);
        if balance < amount {
            return Err(TokenError::InsufficientBalance {
                owner,
                balance,
                amount,
            });
        }
        Ok(())
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) {
        let from_balance = self.balances.entry(from).or_default();
        *from_balance -= amount;
        let to_balance = self.balances.entry(to).or_default();
        *to_balance += amount;
    }
}

impl Erc20 for InMemoryToken {
    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn balance_of(&self, owner: Address) -> U256 {
        self.balances.get(&owner).copied().unwrap_or_default()
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), TokenError> {
        self.debit_check(from, amount)?;
        self.move_balance(from, to, amount);
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        let allowance = self.allowance(from, spender);
        if allowance < amount {
            return Err(TokenError::InsufficientAllowance {
                spender,
                allowance,
                amount,
            });
        }
        self.debit_check(from, amount)?;
        if allowance != U256::MAX {
            self.allowances.insert((from, spender), allowance - amount);
        }
        self.move_balance(from, to, amount);
        Ok(())
    }
}

/// Token contracts keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryBank {
    tokens: HashMap<Address, InMemoryToken>,
}

impl InMemoryBank {
    /// Creates an empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploys `token` at `address`, replacing anything already there.
    pub fn deploy(&mut self, address: Address, token: InMemoryToken) {
        self.tokens.insert(address, token);
    }

    /// Concrete access for minting and approvals.
    pub fn get_mut(&mut self, address: Address) -> Option<&mut InMemoryToken> {
        self.tokens.get_mut(&address)
    }

    /// Concrete read access.
    #[must_use]
    pub fn get(&self, address: Address) -> Option<&InMemoryToken> {
        self.tokens.get(&address)
    }
}

impl TokenBank for InMemoryBank {
    fn token(&self, address: Address) -> Option<&dyn Erc20> {
        self.tokens.get(&address).map(|t| t as &dyn Erc20)
    }

    fn token_mut(&mut self, address: Address) -> Option<&mut dyn Erc20> {
        self.tokens.get_mut(&address).map(|t| t as &mut dyn Erc20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::repeat_byte(0xA1);
    const BOB: Address = Address::repeat_byte(0xB0);
    const ESCROW: Address = Address::repeat_byte(0xE5);

    #[test]
    fn transfer_moves_exact_amount() {
        let mut token = InMemoryToken::new("USDC", 6);
        token.mint(ALICE, U256::from(100));
        token.transfer(ALICE, BOB, U256::from(40)).unwrap();
        assert_eq!(token.balance_of(ALICE), U256::from(60));
        assert_eq!(token.balance_of(BOB), U256::from(40));
    }

    #[test]
    fn failed_transfer_changes_nothing() {
        let mut token = InMemoryToken::new("USDC", 6);
        token.mint(ALICE, U256::from(10));
        let err = token.transfer(ALICE, BOB, U256::from(11)).unwrap_err();
        assert_eq!(err.code(), "InsufficientBalance");
        assert_eq!(token.balance_of(ALICE), U256::from(10));
        assert_eq!(token.balance_of(BOB), U256::ZERO);
    }

    #[test]
    fn transfer_from_spends_allowance() {
        let mut token = InMemoryToken::new("USDC", 6);
        token.mint(ALICE, U256::from(100));
        assert!(matches!(
            token.transfer_from(ESCROW, ALICE, BOB, U256::from(1)),
            Err(TokenError::InsufficientAllowance { .. })
        ));
        token.approve(ALICE, ESCROW, U256::from(70));
        token
            .transfer_from(ESCROW, ALICE, BOB, U256::from(50))
            .unwrap();
        assert_eq!(token.allowance(ALICE, ESCROW), U256::from(20));
        assert_eq!(token.balance_of(BOB), U256::from(50));
    }

    #[test]
    fn bank_reports_unknown_tokens() {
        let mut bank = InMemoryBank::new();
        assert_eq!(
            bank.require(ALICE).err(),
            Some(TokenError::UnknownToken(ALICE))
        );
        bank.deploy(ALICE, InMemoryToken::new("DAI", 18));
        assert_eq!(bank.require(ALICE).unwrap().decimals(), 18);
    }
}
