//! Shared fixture: one escrow deployment with a 6-decimal token and three
//! funded, key-backed participants.

#![allow(dead_code)]

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolStruct;
use tri_escrow::chain::Clock;
use tri_escrow::domain::{ConfirmDelivery, RequestCancel, StartDispute, signing_digest};
use tri_escrow::escrow::{EscrowDeal, EscrowId, NewEscrow};
use tri_escrow::signature::SECP256K1N;
use tri_escrow::timestamp::{HOUR, UnixTimestamp};
use tri_escrow::token::{Erc20, InMemoryBank, InMemoryToken};
use tri_escrow::{LocalChain, ProtocolConfig, SignedAuthorization};

pub const ESCROW: Address = Address::repeat_byte(0xE5);
pub const FACTORY: Address = Address::repeat_byte(0xFA);
pub const FEE_TO: Address = Address::repeat_byte(0xFE);
pub const TOKEN: Address = Address::repeat_byte(0x70);
pub const RELAYER: Address = Address::repeat_byte(0x4E);
pub const STRANGER: Address = Address::repeat_byte(0x99);
pub const CHAIN_ID: u64 = 31_337;
pub const GENESIS: u64 = 1_700_000_000;

/// 10 USDC.
pub const AMOUNT: u64 = 10_000_000;

pub fn config() -> ProtocolConfig {
    ProtocolConfig {
        name: "TriEscrow".into(),
        version: "1".into(),
        chain_id: CHAIN_ID,
        escrow_address: ESCROW,
        factory_address: FACTORY,
        fee_to: FEE_TO,
    }
}

pub struct Harness {
    pub chain: LocalChain<InMemoryBank>,
    pub buyer: PrivateKeySigner,
    pub seller: PrivateKeySigner,
    pub arbiter: PrivateKeySigner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&config())
    }

    pub fn with_config(config: &ProtocolConfig) -> Self {
        let buyer = PrivateKeySigner::random();
        let seller = PrivateKeySigner::random();
        let arbiter = PrivateKeySigner::random();

        let mut usdc = InMemoryToken::new("USDC", 6);
        usdc.mint(buyer.address(), U256::from(100 * AMOUNT));
        usdc.approve(buyer.address(), config.escrow_address, U256::MAX);
        let mut bank = InMemoryBank::new();
        bank.deploy(TOKEN, usdc);

        let chain = LocalChain::new(config, bank, Clock::manual(GENESIS)).unwrap();
        Self {
            chain,
            buyer,
            seller,
            arbiter,
        }
    }

    pub fn now(&self) -> UnixTimestamp {
        self.chain.now()
    }

    pub fn advance(&mut self, secs: u64) {
        self.chain.clock_mut().advance(secs);
    }

    pub fn params(&self, amount: u64, maturity_days: u64) -> NewEscrow {
        NewEscrow {
            token: TOKEN,
            buyer: self.buyer.address(),
            seller: self.seller.address(),
            amount: U256::from(amount),
            maturity_days,
            arbiter: self.arbiter.address(),
            title: "Refurbished laptop".into(),
            ipfs_hash: "QmTermsOfSale".into(),
        }
    }

    /// The seller's consent to the wallet of the next escrow id.
    pub fn seller_consent(&self) -> Bytes {
        let id = self.chain.machine().next_escrow_id();
        let digest = self
            .chain
            .machine()
            .wallet_authorization_digest(id, self.seller.address())
            .unwrap();
        sign(&self.seller, &digest)
    }

    /// Seller creates; buyer has not paid yet.
    pub fn create(&mut self, amount: u64, maturity_days: u64) -> EscrowId {
        let params = self.params(amount, maturity_days);
        let consent = self.seller_consent();
        self.chain
            .create_escrow(self.seller.address(), params, &consent)
            .unwrap()
    }

    /// Seller creates, buyer deposits.
    pub fn funded(&mut self, amount: u64, maturity_days: u64) -> EscrowId {
        let id = self.create(amount, maturity_days);
        self.chain.deposit(self.buyer.address(), id).unwrap();
        id
    }

    pub fn deal(&self, id: EscrowId) -> EscrowDeal {
        self.chain.escrow(id).unwrap().clone()
    }

    pub fn balance(&self, owner: Address) -> U256 {
        self.chain.bank().get(TOKEN).unwrap().balance_of(owner)
    }

    pub fn authorize<T: SolStruct>(
        &self,
        signer: &PrivateKeySigner,
        message: &T,
        nonce: U256,
    ) -> SignedAuthorization {
        let digest = signing_digest(message, self.chain.machine().domain());
        SignedAuthorization {
            signer: signer.address(),
            nonce,
            deadline: self.deadline(),
            signature: sign(signer, &digest),
        }
    }

    pub fn deadline(&self) -> UnixTimestamp {
        self.now() + HOUR
    }

    pub fn confirm_auth(&self, id: EscrowId, signer: &PrivateKeySigner) -> SignedAuthorization {
        let nonce = self.deal(id).nonce;
        let message = ConfirmDelivery {
            escrowId: id.as_u256(),
            buyer: signer.address(),
            nonce,
            deadline: U256::from(self.deadline().as_secs()),
        };
        self.authorize(signer, &message, nonce)
    }

    pub fn cancel_auth(&self, id: EscrowId, signer: &PrivateKeySigner) -> SignedAuthorization {
        let nonce = self.deal(id).nonce;
        let message = RequestCancel {
            escrowId: id.as_u256(),
            requester: signer.address(),
            nonce,
            deadline: U256::from(self.deadline().as_secs()),
        };
        self.authorize(signer, &message, nonce)
    }

    pub fn dispute_auth(&self, id: EscrowId, signer: &PrivateKeySigner) -> SignedAuthorization {
        let nonce = self.deal(id).nonce;
        let message = StartDispute {
            escrowId: id.as_u256(),
            initiator: signer.address(),
            nonce,
            deadline: U256::from(self.deadline().as_secs()),
        };
        self.authorize(signer, &message, nonce)
    }

    /// Split approvals over `to` from the chosen owners, in slot order
    /// (buyer, seller, arbiter).
    pub fn split_sigs(&self, id: EscrowId, to: Address, approve: [bool; 3]) -> [Bytes; 3] {
        let wallet = self.chain.wallet(self.deal(id).wallet).unwrap();
        let digest = wallet.split_digest(to);
        let owners = [&self.buyer, &self.seller, &self.arbiter];
        let mut sigs = [Bytes::new(), Bytes::new(), Bytes::new()];
        for (slot, (owner, yes)) in sigs.iter_mut().zip(owners.into_iter().zip(approve)) {
            if yes {
                *slot = sign(owner, &digest);
            }
        }
        sigs
    }
}

pub fn sign(signer: &PrivateKeySigner, digest: &B256) -> Bytes {
    Bytes::from(signer.sign_hash_sync(digest).unwrap().as_bytes().to_vec())
}

/// `(r, n - s, v ^ 1)`: verifies mathematically but is not canonical.
pub fn malleate(signature: &[u8]) -> Bytes {
    let s = U256::from_be_slice(&signature[32..64]);
    let mut out = signature.to_vec();
    out[32..64].copy_from_slice(&(SECP256K1N - s).to_be_bytes::<32>());
    out[64] = if signature[64] == 27 { 28 } else { 27 };
    Bytes::from(out)
}
