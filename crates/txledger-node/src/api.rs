use crate::signature::Ed25519Verifier;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;
use txledger_core::{Block, SyncReport, SyncService, Transaction, TransactionStore, TxStatus};
use txledger_storage::{SledStore, SledTransactionStore};

pub type Service = SyncService<SledStore, SledTransactionStore, Ed25519Verifier>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Head {
    height: u64,
    hash: String,
    length: usize,
}

#[derive(Serialize)]
struct Validity {
    valid: bool,
}

#[derive(Serialize)]
struct Synced {
    synced: bool,
    block: Option<Block>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyIn {
    transaction: Transaction,
    signature: String,
    public_key: String,
}

#[derive(Serialize)]
struct Verified {
    verified: bool,
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("request failed: {err:#}");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        error!("worker task failed: {err}");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, "worker task failed".into())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/chain", get(chain))
        .route("/chain/head", get(head))
        .route("/chain/valid", get(valid))
        .route("/transactions", get(list_transactions).post(enqueue_transaction))
        .route("/tx", post(sync_transaction))
        .route("/sync", post(sync_pending))
        .route("/verify", post(verify_transaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn chain(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.service.chain().snapshot().as_ref().clone())
}

async fn head(State(state): State<AppState>) -> ApiResult<Head> {
    let chain = state.service.chain();
    let latest = chain
        .latest()
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(Head {
        height: latest.index,
        hash: latest.hash,
        length: chain.len(),
    }))
}

async fn valid(State(state): State<AppState>) -> Json<Validity> {
    Json(Validity {
        valid: state.service.chain().is_valid(),
    })
}

async fn list_transactions(State(state): State<AppState>) -> ApiResult<Vec<Transaction>> {
    Ok(Json(state.service.transactions().list_all()?))
}

async fn enqueue_transaction(
    State(state): State<AppState>,
    Json(mut tx): Json<Transaction>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    if !tx.has_id() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "transaction has no id".into()));
    }
    tx.status = Some(TxStatus::Pending);
    state.service.transactions().put(&tx)?;
    Ok((StatusCode::CREATED, Json(tx)))
}

// Mining is CPU-bound; keep it off the async workers.
async fn sync_transaction(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> ApiResult<Synced> {
    let service = state.service.clone();
    let synced = tokio::task::spawn_blocking(move || {
        let synced = service.sync_transaction(&tx);
        Synced {
            synced,
            block: synced.then(|| service.chain().find_transaction(&tx.id)).flatten(),
        }
    })
    .await?;
    Ok(Json(synced))
}

async fn sync_pending(State(state): State<AppState>) -> ApiResult<SyncReport> {
    let service = state.service.clone();
    let report = tokio::task::spawn_blocking(move || service.sync_pending()).await?;
    Ok(Json(report))
}

async fn verify_transaction(
    State(state): State<AppState>,
    Json(body): Json<VerifyIn>,
) -> ApiResult<Verified> {
    let service = state.service.clone();
    let verified = tokio::task::spawn_blocking(move || {
        service.verify_transaction(&body.transaction, &body.signature, &body.public_key)
    })
    .await?;
    Ok(Json(Verified { verified }))
}
