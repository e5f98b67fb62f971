//! Axum route handlers for the relay service.
//!
//! Signed routes take a participant's [`SignedAuthorization`] and submit it
//! with the relay's own address as the transaction sender. The participant
//! never pays for or sends the call.
//!
//! The `/dev` routes drive a local ledger directly: they act as whichever
//! `sender` the body names, so they are only mounted when enabled in config.

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tri_escrow::chain::{ChainId, caip2};
use tri_escrow::escrow::{DisputeOutcome, EscrowDeal, EscrowEvent, EscrowId, NewEscrow};
use tri_escrow::timestamp::UnixTimestamp;
use tri_escrow::token::InMemoryBank;
use tri_escrow::wallet::SplitReceipt;
use tri_escrow::{EscrowError, LocalChain, SignedAuthorization};

use crate::error::RelayError;

/// The ledger served by this relay.
pub type SharedLedger = Arc<Mutex<LocalChain<InMemoryBank>>>;

/// Shared application state for the relay service.
#[derive(Debug, Clone)]
pub struct RelayState {
    ledger: SharedLedger,
    relayer: Address,
}

impl RelayState {
    /// Serves `ledger`, submitting signed calls from `relayer`.
    #[must_use]
    pub fn new(ledger: LocalChain<InMemoryBank>, relayer: Address) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            relayer,
        }
    }

    /// The ledger handle.
    #[must_use]
    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    /// Sender of relayed transactions.
    #[must_use]
    pub const fn relayer(&self) -> Address {
        self.relayer
    }
}

/// `GET /domain` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainInfo {
    /// EIP-712 `name`.
    pub name: String,
    /// EIP-712 `version`.
    pub version: String,
    /// EIP-155 chain id.
    pub chain_id: ChainId,
    /// CAIP-2 network.
    pub network: String,
    /// Escrow contract.
    pub verifying_contract: Address,
    /// `DOMAIN_SEPARATOR()`.
    pub separator: B256,
    /// Relay's transaction sender.
    pub relayer: Address,
    /// Current block timestamp.
    pub now: UnixTimestamp,
}

/// `GET /wallets/{address}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    /// Wallet address.
    pub address: Address,
    /// Escrow id the wallet custodies.
    pub escrow_id: EscrowId,
    /// Held token.
    pub token: Address,
    /// Fee receiver.
    pub fee_to: Address,
    /// Buyer, seller and arbiter, in signature-slot order.
    pub owners: [Address; 3],
    /// Approvals needed for a split.
    pub threshold: usize,
    /// Nonce the next split approvals must sign.
    pub nonce: U256,
    /// Protocol fee already paid out.
    pub fee_paid: U256,
    /// Current token balance.
    pub balance: U256,
}

/// `POST /wallets/{address}/split` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRequest {
    /// Payout recipient.
    pub to: Address,
    /// Buyer, seller and arbiter approvals; `0x` for a missing slot.
    pub signatures: [Bytes; 3],
}

/// Filter for `GET /events`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    /// Only events of this escrow.
    pub escrow_id: Option<u64>,
}

/// `GET /health`.
pub async fn get_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /domain`: The escrow EIP-712 domain signers must use.
pub async fn get_domain(State(state): State<RelayState>) -> Json<DomainInfo> {
    let ledger = state.ledger.lock().await;
    let machine = ledger.machine();
    let domain = machine.domain();
    Json(DomainInfo {
        name: domain.name.as_deref().unwrap_or_default().to_owned(),
        version: domain.version.as_deref().unwrap_or_default().to_owned(),
        chain_id: machine.chain_id(),
        network: caip2(machine.chain_id()),
        verifying_contract: machine.address(),
        separator: machine.domain_separator(),
        relayer: state.relayer,
        now: ledger.now(),
    })
}

/// `GET /escrows/next-id`: The id the next created escrow will get.
pub async fn get_next_id(State(state): State<RelayState>) -> Json<serde_json::Value> {
    let next = state.ledger.lock().await.machine().next_escrow_id();
    Json(serde_json::json!({ "nextEscrowId": next }))
}

/// `GET /escrows/{id}`: The escrow record.
///
/// # Errors
///
/// Returns 404 for unknown ids.
pub async fn get_escrow(
    State(state): State<RelayState>,
    Path(id): Path<u64>,
) -> Result<Json<EscrowDeal>, RelayError> {
    let ledger = state.ledger.lock().await;
    Ok(Json(ledger.escrow(EscrowId(id))?.clone()))
}

/// `GET /escrows/{id}/nonces/{participant}/{nonce}`: `isNonceUsed`.
pub async fn get_nonce_used(
    State(state): State<RelayState>,
    Path((id, participant, nonce)): Path<(u64, Address, u64)>,
) -> Json<serde_json::Value> {
    let used = state.ledger.lock().await.machine().is_nonce_used(
        EscrowId(id),
        participant,
        U256::from(nonce),
    );
    Json(serde_json::json!({ "used": used }))
}

/// `GET /escrows/{id}/wallet-digest/{participant}`: What `participant`
/// signs to consent to the escrow's settlement wallet.
///
/// # Errors
///
/// Returns 404 for ids that are neither recorded nor next.
pub async fn get_wallet_digest(
    State(state): State<RelayState>,
    Path((id, participant)): Path<(u64, Address)>,
) -> Result<Json<serde_json::Value>, RelayError> {
    let digest = state
        .ledger
        .lock()
        .await
        .machine()
        .wallet_authorization_digest(EscrowId(id), participant)?;
    Ok(Json(serde_json::json!({ "digest": digest })))
}

/// `POST /escrows/{id}/confirm-delivery`: Relays the buyer's confirmation.
///
/// # Errors
///
/// Returns the ledger's rejection.
pub async fn post_confirm_delivery(
    State(state): State<RelayState>,
    Path(id): Path<u64>,
    Json(auth): Json<SignedAuthorization>,
) -> Result<Json<EscrowDeal>, RelayError> {
    relay_signed(&state, id, &auth, "confirmDelivery", LocalChain::confirm_delivery_signed).await
}

/// `POST /escrows/{id}/request-cancel`: Relays a cancel request.
///
/// # Errors
///
/// Returns the ledger's rejection.
pub async fn post_request_cancel(
    State(state): State<RelayState>,
    Path(id): Path<u64>,
    Json(auth): Json<SignedAuthorization>,
) -> Result<Json<EscrowDeal>, RelayError> {
    relay_signed(&state, id, &auth, "requestCancel", LocalChain::request_cancel_signed).await
}

/// `POST /escrows/{id}/start-dispute`: Relays a dispute opening.
///
/// # Errors
///
/// Returns the ledger's rejection.
pub async fn post_start_dispute(
    State(state): State<RelayState>,
    Path(id): Path<u64>,
    Json(auth): Json<SignedAuthorization>,
) -> Result<Json<EscrowDeal>, RelayError> {
    relay_signed(&state, id, &auth, "startDispute", LocalChain::start_dispute_signed).await
}

/// `POST /escrows/{id}/auto-release`: Releases a matured escrow to the
/// seller once the auto-release delay has passed. Anyone may trigger it.
///
/// # Errors
///
/// Returns the ledger's rejection.
pub async fn post_auto_release(
    State(state): State<RelayState>,
    Path(id): Path<u64>,
) -> Result<Json<EscrowDeal>, RelayError> {
    let id = EscrowId(id);
    let mut ledger = state.ledger.lock().await;
    ledger.auto_release(state.relayer, id)?;
    tracing::info!(escrow_id = %id, "relayed autoRelease");
    Ok(Json(ledger.escrow(id)?.clone()))
}

type SignedCall = fn(
    &mut LocalChain<InMemoryBank>,
    Address,
    EscrowId,
    &SignedAuthorization,
) -> Result<(), EscrowError>;

async fn relay_signed(
    state: &RelayState,
    id: u64,
    auth: &SignedAuthorization,
    operation: &'static str,
    call: SignedCall,
) -> Result<Json<EscrowDeal>, RelayError> {
    let id = EscrowId(id);
    let mut ledger = state.ledger.lock().await;
    call(&mut ledger, state.relayer, id, auth)?;
    tracing::info!(escrow_id = %id, signer = %auth.signer, nonce = %auth.nonce, "relayed {operation}");
    Ok(Json(ledger.escrow(id)?.clone()))
}

/// `GET /wallets/{address}`: Settlement wallet summary.
///
/// # Errors
///
/// Returns 404 if no wallet is deployed at `address`.
pub async fn get_wallet(
    State(state): State<RelayState>,
    Path(address): Path<Address>,
) -> Result<Json<WalletInfo>, RelayError> {
    let ledger = state.ledger.lock().await;
    let wallet = ledger.wallet(address)?;
    Ok(Json(WalletInfo {
        address,
        escrow_id: wallet.escrow_id(),
        token: wallet.token(),
        fee_to: wallet.fee_to(),
        owners: wallet.owners(),
        threshold: wallet.threshold(),
        nonce: wallet.nonce(),
        fee_paid: wallet.fee_paid(),
        balance: ledger.wallet_balance(address)?,
    }))
}

/// `GET /wallets/{address}/digest/{signer}`: What `signer` signs to
/// approve the wallet's split as its escrow currently stands.
///
/// # Errors
///
/// Returns 404 for unknown wallets, 403 for non-owners and 409 before
/// the escrow is final.
pub async fn get_split_digest(
    State(state): State<RelayState>,
    Path((address, signer)): Path<(Address, Address)>,
) -> Result<Json<serde_json::Value>, RelayError> {
    let digest = state
        .ledger
        .lock()
        .await
        .split_authorization_digest(address, signer)?;
    Ok(Json(serde_json::json!({ "digest": digest })))
}

/// `POST /wallets/{address}/split`: Submits 2-of-3 approvals and pays out.
///
/// # Errors
///
/// Returns the wallet's rejection.
pub async fn post_split(
    State(state): State<RelayState>,
    Path(address): Path<Address>,
    Json(body): Json<SplitRequest>,
) -> Result<Json<SplitReceipt>, RelayError> {
    let receipt = state.ledger.lock().await.execute_split(
        state.relayer,
        address,
        body.to,
        &body.signatures,
    )?;
    tracing::info!(
        escrow_id = %receipt.escrow_id,
        wallet = %address,
        recipient = %receipt.recipient,
        amount = %receipt.amount,
        fee = %receipt.fee,
        "relayed split"
    );
    Ok(Json(receipt))
}

/// `GET /events`: The event log, oldest first.
pub async fn get_events(
    State(state): State<RelayState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<EscrowEvent>> {
    let ledger = state.ledger.lock().await;
    let events = ledger
        .events()
        .iter()
        .filter(|e| query.escrow_id.is_none_or(|id| e.escrow_id() == EscrowId(id)))
        .cloned()
        .collect();
    Json(events)
}

/// `POST /dev/escrows` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Seller for `createEscrow`, buyer when `deposit` is set.
    pub sender: Address,
    /// Deal parameters.
    pub escrow: NewEscrow,
    /// Seller's consent over the predicted wallet.
    pub seller_signature: Bytes,
    /// Use `createEscrowAndDeposit`.
    #[serde(default)]
    pub deposit: bool,
}

/// Body of direct `/dev` calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectCall {
    /// `msg.sender`.
    pub sender: Address,
    /// Evidence or resolution hash, where the call takes one.
    #[serde(default)]
    pub ipfs_hash: Option<String>,
    /// Arbiter ruling, for `arbiter-decision`.
    #[serde(default)]
    pub outcome: Option<DisputeOutcome>,
}

/// `POST /dev/tokens/{token}/approve` body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    /// Token holder granting the allowance to the escrow contract.
    pub owner: Address,
    /// Allowance.
    pub amount: U256,
    /// Also mint `amount` to `owner` first.
    #[serde(default)]
    pub mint: bool,
}

/// `POST /dev/clock/advance` body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdvanceRequest {
    /// Seconds to move the manual clock forward.
    pub seconds: u64,
}

/// `POST /dev/escrows`: `createEscrow` or `createEscrowAndDeposit`.
///
/// # Errors
///
/// Returns the ledger's rejection.
pub async fn post_dev_create(
    State(state): State<RelayState>,
    Json(body): Json<CreateRequest>,
) -> Result<Json<EscrowDeal>, RelayError> {
    let mut ledger = state.ledger.lock().await;
    let id = if body.deposit {
        ledger.create_escrow_and_deposit(body.sender, body.escrow, &body.seller_signature)?
    } else {
        ledger.create_escrow(body.sender, body.escrow, &body.seller_signature)?
    };
    Ok(Json(ledger.escrow(id)?.clone()))
}

/// `POST /dev/escrows/{id}/{call}`: Unsigned calls sent directly by a participant.
///
/// `call` is one of `deposit`, `confirm-delivery`, `request-cancel`,
/// `cancel-by-timeout`, `start-dispute`, `dispute-message`,
/// `arbiter-decision` or `resolve-stale-dispute`.
///
/// # Errors
///
/// Returns the ledger's rejection, or 404 for an unknown `call`.
pub async fn post_dev_call(
    State(state): State<RelayState>,
    Path((id, call)): Path<(u64, String)>,
    Json(body): Json<DirectCall>,
) -> Result<Json<EscrowDeal>, RelayError> {
    let id = EscrowId(id);
    let hash = body.ipfs_hash.as_deref().unwrap_or_default();
    let mut ledger = state.ledger.lock().await;
    match call.as_str() {
        "deposit" => ledger.deposit(body.sender, id)?,
        "confirm-delivery" => ledger.confirm_delivery(body.sender, id)?,
        "request-cancel" => ledger.request_cancel(body.sender, id)?,
        "cancel-by-timeout" => ledger.cancel_by_timeout(body.sender, id)?,
        "start-dispute" => ledger.start_dispute(body.sender, id)?,
        "dispute-message" => ledger.submit_dispute_message(body.sender, id, hash)?,
        "arbiter-decision" => {
            let outcome = body.outcome.ok_or(RelayError::MissingField("outcome"))?;
            ledger.submit_arbiter_decision(body.sender, id, outcome, hash)?;
        }
        "resolve-stale-dispute" => ledger.resolve_stale_dispute(body.sender, id)?,
        _ => return Err(RelayError::UnknownCall(call.clone())),
    }
    Ok(Json(ledger.escrow(id)?.clone()))
}

/// `POST /dev/tokens/{token}/approve`: Approves the escrow contract to pull
/// `amount` from `owner`.
///
/// # Errors
///
/// Returns 422 for unknown tokens.
pub async fn post_dev_approve(
    State(state): State<RelayState>,
    Path(token): Path<Address>,
    Json(body): Json<ApproveRequest>,
) -> Result<Json<serde_json::Value>, RelayError> {
    let mut ledger = state.ledger.lock().await;
    let spender = ledger.machine().address();
    let contract = ledger
        .bank_mut()
        .get_mut(token)
        .ok_or(EscrowError::Token(tri_escrow::token::TokenError::UnknownToken(token)))?;
    if body.mint {
        contract.mint(body.owner, body.amount);
    }
    contract.approve(body.owner, spender, body.amount);
    Ok(Json(serde_json::json!({
        "owner": body.owner,
        "spender": spender,
        "allowance": contract.allowance(body.owner, spender),
    })))
}

/// `POST /dev/clock/advance`: Moves a manual clock forward.
pub async fn post_dev_advance(
    State(state): State<RelayState>,
    Json(body): Json<AdvanceRequest>,
) -> Json<serde_json::Value> {
    let mut ledger = state.ledger.lock().await;
    ledger.clock_mut().advance(body.seconds);
    Json(serde_json::json!({ "now": ledger.now() }))
}

/// Creates an Axum [`axum::Router`] with all relay endpoints.
///
/// Endpoints:
/// - `GET /health`: liveness
/// - `GET /domain`: escrow EIP-712 domain
/// - `GET /escrows/next-id`: next escrow id
/// - `GET /escrows/{id}`: escrow record
/// - `GET /escrows/{id}/nonces/{participant}/{nonce}`: nonce consumption
/// - `GET /escrows/{id}/wallet-digest/{participant}`: wallet consent digest
/// - `POST /escrows/{id}/confirm-delivery`: relay a signed confirmation
/// - `POST /escrows/{id}/request-cancel`: relay a signed cancel request
/// - `POST /escrows/{id}/start-dispute`: relay a signed dispute
/// - `POST /escrows/{id}/auto-release`: release a matured escrow
/// - `GET /wallets/{address}`: settlement wallet summary
/// - `GET /wallets/{address}/digest/{signer}`: split approval digest
/// - `POST /wallets/{address}/split`: execute a split
/// - `GET /events`: event log
///
/// With `dev_routes`, also `POST /dev/escrows`, `POST /dev/escrows/{id}/{call}`,
/// `POST /dev/tokens/{token}/approve` and `POST /dev/clock/advance`.
pub fn relay_router(state: RelayState, dev_routes: bool) -> axum::Router {
    let router = axum::Router::new()
        .route("/health", get(get_health))
        .route("/domain", get(get_domain))
        .route("/escrows/next-id", get(get_next_id))
        .route("/escrows/{id}", get(get_escrow))
        .route("/escrows/{id}/nonces/{participant}/{nonce}", get(get_nonce_used))
        .route("/escrows/{id}/wallet-digest/{participant}", get(get_wallet_digest))
        .route("/escrows/{id}/confirm-delivery", post(post_confirm_delivery))
        .route("/escrows/{id}/request-cancel", post(post_request_cancel))
        .route("/escrows/{id}/start-dispute", post(post_start_dispute))
        .route("/escrows/{id}/auto-release", post(post_auto_release))
        .route("/wallets/{address}", get(get_wallet))
        .route("/wallets/{address}/digest/{signer}", get(get_split_digest))
        .route("/wallets/{address}/split", post(post_split))
        .route("/events", get(get_events));

    let router = if dev_routes {
        router
            .route("/dev/escrows", post(post_dev_create))
            .route("/dev/escrows/{id}/{call}", post(post_dev_call))
            .route("/dev/tokens/{token}/approve", post(post_dev_approve))
            .route("/dev/clock/advance", post(post_dev_advance))
    } else {
        router
    };

    router.with_state(state)
}
