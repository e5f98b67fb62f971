//! Settlement wallets: deterministic addresses and the 2-of-3 split.

mod common;

use alloy_primitives::{Bytes, U256};
use common::{AMOUNT, ESCROW, FACTORY, FEE_TO, Harness, RELAYER, STRANGER, TOKEN};
use tri_escrow::EscrowError;
use tri_escrow::escrow::EscrowEvent;
use tri_escrow::wallet::{THRESHOLD, predict_wallet_address};

#[test]
fn wallet_address_is_known_before_creation() {
    let mut h = Harness::new();
    let next = h.chain.machine().next_escrow_id();
    let predicted = predict_wallet_address(FACTORY, ESCROW, next);
    let id = h.create(AMOUNT, 30);
    assert_eq!(id, next);
    assert_eq!(h.deal(id).wallet, predicted);

    let wallet = h.chain.wallet(predicted).unwrap();
    assert_eq!(wallet.escrow_id(), id);
    assert_eq!(wallet.escrow_contract(), ESCROW);
    assert_eq!(
        wallet.owners(),
        [h.buyer.address(), h.seller.address(), h.arbiter.address()]
    );
    assert_eq!(wallet.threshold(), THRESHOLD);
    assert_eq!(wallet.fee_to(), FEE_TO);
}

#[test]
fn any_two_owners_can_settle() {
    for approve in [[true, true, false], [true, false, true], [false, true, true]] {
        let mut h = Harness::new();
        let id = h.funded(AMOUNT, 30);
        h.chain.confirm_delivery(h.buyer.address(), id).unwrap();
        let seller = h.seller.address();
        let sigs = h.split_sigs(id, seller, approve);
        let wallet = h.deal(id).wallet;
        h.chain.execute_split(RELAYER, wallet, seller, &sigs).unwrap();
        assert_eq!(h.balance(seller), U256::from(9_900_000u64), "{approve:?}");
    }
}

#[test]
fn all_three_owners_also_settle() {
    let mut h = Harness::new();
    let id = h.funded(AMOUNT, 30);
    h.chain.confirm_delivery(h.buyer.address(), id).unwrap();
    let seller = h.seller.address();
    let sigs = h.split_sigs(id, seller, [true, true, true]);
    let wallet = h.deal(id).wallet;
    assert_eq!(h.chain.machine().wallet_signature_count(wallet, seller, &sigs), Ok(3));
    h.chain.execute_split(RELAYER, wallet, seller, &sigs).unwrap();
}

#[test]
fn fewer_than_two_owners_cannot_settle() {
    let mut h = Harness::new();
    let id = h.funded(AMOUNT, 30);
    h.chain.confirm_delivery(h.buyer.address(), id).unwrap();
    let seller = h.seller.address();
    let wallet = h.deal(id).wallet;

    let one = h.split_sigs(id, seller, [false, true, false]);
    assert_eq!(
        h.chain.execute_split(RELAYER, wallet, seller, &one),
        Err(EscrowError::InsufficientSignatures {
            valid: 1,
            required: 2
        })
    );
    let none = h.split_sigs(id, seller, [false, false, false]);
    assert!(matches!(
        h.chain.execute_split(RELAYER, wallet, seller, &none),
        Err(EscrowError::InsufficientSignatures { valid: 0, .. })
    ));
    assert_eq!(h.balance(wallet), U256::from(AMOUNT));
}

#[test]
fn one_owner_in_two_slots_counts_once() {
    let mut h = Harness::new();
    let id = h.funded(AMOUNT, 30);
    h.chain.confirm_delivery(h.buyer.address(), id).unwrap();
    let seller = h.seller.address();
    let wallet = h.deal(id).wallet;

    let sigs = h.split_sigs(id, seller, [false, true, false]);
    let doubled = [Bytes::new(), sigs[1].clone(), sigs[1].clone()];
    assert_eq!(
        h.chain.execute_split(RELAYER, wallet, seller, &doubled),
        Err(EscrowError::DuplicateSigner(seller))
    );
    assert_eq!(h.chain.machine().wallet_signature_count(wallet, seller, &doubled), Ok(1));
}

#[test]
fn approvals_bind_the_recipient() {
    let mut h = Harness::new();
    let id = h.funded(AMOUNT, 30);
    h.chain.confirm_delivery(h.buyer.address(), id).unwrap();
    let wallet = h.deal(id).wallet;
    let seller = h.seller.address();

    // Owners approve paying a stranger; the state says seller.
    let sigs = h.split_sigs(id, STRANGER, [true, true, false]);
    assert_eq!(
        h.chain.execute_split(RELAYER, wallet, STRANGER, &sigs),
        Err(EscrowError::RecipientMismatch {
            provided: STRANGER,
            expected: seller,
        })
    );
    // Same approvals replayed against the right recipient do not verify.
    assert!(matches!(
        h.chain.execute_split(RELAYER, wallet, seller, &sigs),
        Err(EscrowError::SignerMismatch { .. })
    ));
}

#[test]
fn open_escrow_cannot_be_split() {
    let mut h = Harness::new();
    let id = h.funded(AMOUNT, 30);
    let seller = h.seller.address();
    let sigs = h.split_sigs(id, seller, [true, true, true]);
    let wallet = h.deal(id).wallet;
    assert!(matches!(
        h.chain.execute_split(RELAYER, wallet, seller, &sigs),
        Err(EscrowError::EscrowNotFinal { .. })
    ));
    assert!(matches!(
        h.chain.split_authorization_digest(wallet, seller),
        Err(EscrowError::EscrowNotFinal { .. })
    ));
}

#[test]
fn second_split_has_nothing_to_move() {
    let mut h = Harness::new();
    let id = h.funded(AMOUNT, 30);
    h.chain.confirm_delivery(h.buyer.address(), id).unwrap();
    let seller = h.seller.address();
    let wallet = h.deal(id).wallet;

    let sigs = h.split_sigs(id, seller, [true, true, false]);
    let receipt = h.chain.execute_split(RELAYER, wallet, seller, &sigs).unwrap();
    assert_eq!(receipt.nonce, U256::ZERO);
    assert_eq!(h.chain.wallet(wallet).unwrap().nonce(), U256::from(1));
    assert!(h.chain.events().iter().any(|event| matches!(
        event,
        EscrowEvent::SplitExecuted { recipient, .. } if *recipient == seller
    )));

    let again = h.split_sigs(id, seller, [true, true, false]);
    assert_eq!(
        h.chain.execute_split(RELAYER, wallet, seller, &again),
        Err(EscrowError::NothingToSplit(wallet))
    );
}

#[test]
fn fee_is_charged_once_per_escrow() {
    let mut h = Harness::new();
    let id = h.funded(AMOUNT, 30);
    h.chain.confirm_delivery(h.buyer.address(), id).unwrap();
    let seller = h.seller.address();
    let wallet = h.deal(id).wallet;

    let sigs = h.split_sigs(id, seller, [true, true, false]);
    h.chain.execute_split(RELAYER, wallet, seller, &sigs).unwrap();
    assert_eq!(h.balance(FEE_TO), U256::from(100_000u64));

    // Someone sends more tokens to the settled wallet.
    h.chain
        .bank_mut()
        .get_mut(TOKEN)
        .unwrap()
        .mint(wallet, U256::from(50_000u64));
    let sigs = h.split_sigs(id, seller, [true, true, false]);
    let receipt = h.chain.execute_split(RELAYER, wallet, seller, &sigs).unwrap();
    assert_eq!(receipt.nonce, U256::from(1));
    assert_eq!(receipt.fee, U256::ZERO);
    assert_eq!(receipt.amount, U256::from(50_000u64));
    assert_eq!(h.balance(seller), U256::from(9_950_000u64));
    assert_eq!(h.balance(FEE_TO), U256::from(100_000u64));
    assert_eq!(h.chain.wallet(wallet).unwrap().fee_paid(), U256::from(100_000u64));
}

#[test]
fn authorization_digest_matches_what_owners_sign() {
    let mut h = Harness::new();
    let id = h.funded(AMOUNT, 30);
    h.chain.confirm_delivery(h.buyer.address(), id).unwrap();
    let wallet = h.deal(id).wallet;

    let digest = h
        .chain
        .split_authorization_digest(wallet, h.arbiter.address())
        .unwrap();
    assert_eq!(
        digest,
        h.chain.wallet(wallet).unwrap().split_digest(h.seller.address())
    );
    assert_eq!(
        h.chain.split_authorization_digest(wallet, STRANGER),
        Err(EscrowError::NotOwner(STRANGER))
    );
    assert_eq!(h.chain.wallet_balance(wallet), Ok(U256::from(AMOUNT)));
}

#[test]
fn approvals_for_one_wallet_fail_on_another() {
    let mut h = Harness::new();
    let first = h.funded(AMOUNT, 30);
    let second = h.funded(AMOUNT, 30);
    let buyer = h.buyer.address();
    h.chain.confirm_delivery(buyer, first).unwrap();
    h.chain.confirm_delivery(buyer, second).unwrap();

    let seller = h.seller.address();
    let for_first = h.split_sigs(first, seller, [true, true, false]);
    let (first_wallet, second_wallet) = (h.deal(first).wallet, h.deal(second).wallet);
    assert!(matches!(
        h.chain.execute_split(RELAYER, second_wallet, seller, &for_first),
        Err(EscrowError::SignerMismatch { .. })
    ));
    h.chain
        .execute_split(RELAYER, first_wallet, seller, &for_first)
        .unwrap();
}

#[test]
fn unknown_wallet_is_reported() {
    let mut h = Harness::new();
    let sigs = [Bytes::new(), Bytes::new(), Bytes::new()];
    assert_eq!(
        h.chain.execute_split(RELAYER, STRANGER, STRANGER, &sigs),
        Err(EscrowError::WalletNotFound(STRANGER))
    );
}
