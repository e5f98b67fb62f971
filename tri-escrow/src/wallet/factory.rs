//! Deterministic wallet deployment.
//!
//! Wallet addresses follow CREATE2: `keccak256(0xff ++ factory ++ salt ++
//! initCodeHash)[12..]`, with `salt = keccak256(abi.encode(escrowId))` and an
//! init code that pins both the wallet code and the escrow contract. Anyone
//! can compute the address of escrow `n` before it exists and check that the
//! deposit target is the expected code.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, keccak256};
use alloy_sol_types::SolValue;

use super::{SettlementWallet, WalletParams};
use crate::error::EscrowError;
use crate::escrow::EscrowId;

/// Creation code identifier of the settlement wallet.
pub const SETTLEMENT_WALLET_CODE: &[u8] = b"TriEscrowSettlementWallet/1";

/// `keccak256` of [`SETTLEMENT_WALLET_CODE`].
#[must_use]
pub fn settlement_wallet_code_hash() -> B256 {
    keccak256(SETTLEMENT_WALLET_CODE)
}

/// Init code hash of a wallet bound to `escrow_contract`.
#[must_use]
pub fn init_code_hash(escrow_contract: Address) -> B256 {
    keccak256((settlement_wallet_code_hash(), escrow_contract).abi_encode())
}

/// CREATE2 salt of escrow `escrow_id`.
#[must_use]
pub fn wallet_salt(escrow_id: EscrowId) -> B256 {
    keccak256(escrow_id.as_u256().abi_encode())
}

/// Address the wallet of `escrow_id` will have once deployed by `factory`.
#[must_use]
pub fn predict_wallet_address(
    factory: Address,
    escrow_contract: Address,
    escrow_id: EscrowId,
) -> Address {
    factory.create2(wallet_salt(escrow_id).0, init_code_hash(escrow_contract).0)
}

/// Deploys and owns the settlement wallets of one escrow contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletFactory {
    address: Address,
    escrow_contract: Address,
    wallets: HashMap<Address, SettlementWallet>,
}

impl WalletFactory {
    /// A factory at `address` that only `escrow_contract` may deploy through.
    #[must_use]
    pub fn new(address: Address, escrow_contract: Address) -> Self {
        Self {
            address,
            escrow_contract,
            wallets: HashMap::new(),
        }
    }

    /// Factory address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The escrow contract allowed to deploy.
    #[must_use]
    pub const fn escrow_contract(&self) -> Address {
        self.escrow_contract
    }

    /// Address of escrow `escrow_id`'s wallet, deployed or not.
    #[must_use]
    pub fn predict(&self, escrow_id: EscrowId) -> Address {
        predict_wallet_address(self.address, self.escrow_contract, escrow_id)
    }

    /// Deploys the wallet for `params.escrow_id`.
    ///
    /// # Errors
    ///
    /// [`EscrowError::OnlyEscrowContract`] for any other caller;
    /// [`EscrowError::WalletAlreadyDeployed`] if the address is taken.
    pub fn deploy(&mut self, caller: Address, params: WalletParams) -> Result<Address, EscrowError> {
        if caller != self.escrow_contract {
            return Err(EscrowError::OnlyEscrowContract(caller));
        }
        let address = self.predict(params.escrow_id);
        if self.wallets.contains_key(&address) {
            return Err(EscrowError::WalletAlreadyDeployed(address));
        }
        let wallet = SettlementWallet::new(address, self.escrow_contract, params);
        self.wallets.insert(address, wallet);

        #[cfg(feature = "telemetry")]
        tracing::debug!(wallet = %address, "settlement wallet deployed");

        Ok(address)
    }

    /// Whether a wallet lives at `address`.
    #[must_use]
    pub fn is_deployed(&self, address: Address) -> bool {
        self.wallets.contains_key(&address)
    }

    /// The wallet at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::WalletNotFound`] if nothing is deployed there.
    pub fn wallet(&self, address: Address) -> Result<&SettlementWallet, EscrowError> {
        self.wallets
            .get(&address)
            .ok_or(EscrowError::WalletNotFound(address))
    }

    /// Mutable access to the wallet at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::WalletNotFound`] if nothing is deployed there.
    pub fn wallet_mut(&mut self, address: Address) -> Result<&mut SettlementWallet, EscrowError> {
        self.wallets
            .get_mut(&address)
            .ok_or(EscrowError::WalletNotFound(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FACTORY: Address = Address::repeat_byte(0xFA);
    const ESCROW: Address = Address::repeat_byte(0xE5);

    fn params(id: u64) -> WalletParams {
        WalletParams {
            escrow_id: EscrowId(id),
            token: Address::repeat_byte(0x70),
            buyer: Address::repeat_byte(0xB1),
            seller: Address::repeat_byte(0x5E),
            arbiter: Address::repeat_byte(0xA7),
            fee_to: Address::repeat_byte(0xFE),
            chain_id: 31_337,
        }
    }

    #[test]
    fn prediction_is_pure_and_unique() {
        let a = predict_wallet_address(FACTORY, ESCROW, EscrowId(0));
        assert_eq!(a, predict_wallet_address(FACTORY, ESCROW, EscrowId(0)));
        assert_ne!(a, predict_wallet_address(FACTORY, ESCROW, EscrowId(1)));
        assert_ne!(a, predict_wallet_address(Address::repeat_byte(1), ESCROW, EscrowId(0)));
        assert_ne!(a, predict_wallet_address(FACTORY, Address::repeat_byte(1), EscrowId(0)));
    }

    #[test]
    fn salt_is_keccak_of_abi_encoded_id() {
        let mut word = [0u8; 32];
        word[31] = 7;
        assert_eq!(wallet_salt(EscrowId(7)), keccak256(word));
    }

    #[test]
    fn deploys_at_predicted_address() {
        let mut factory = WalletFactory::new(FACTORY, ESCROW);
        let predicted = factory.predict(EscrowId(0));
        assert!(!factory.is_deployed(predicted));
        let deployed = factory.deploy(ESCROW, params(0)).unwrap();
        assert_eq!(deployed, predicted);
        assert_eq!(factory.wallet(deployed).unwrap().escrow_id(), EscrowId(0));
    }

    #[test]
    fn only_escrow_contract_deploys() {
        let mut factory = WalletFactory::new(FACTORY, ESCROW);
        let stranger = Address::repeat_byte(0x99);
        assert_eq!(
            factory.deploy(stranger, params(0)),
            Err(EscrowError::OnlyEscrowContract(stranger))
        );
    }

    #[test]
    fn redeploy_is_rejected() {
        let mut factory = WalletFactory::new(FACTORY, ESCROW);
        let address = factory.deploy(ESCROW, params(0)).unwrap();
        assert_eq!(
            factory.deploy(ESCROW, params(0)),
            Err(EscrowError::WalletAlreadyDeployed(address))
        );
    }
}
