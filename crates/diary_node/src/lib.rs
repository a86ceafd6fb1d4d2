//! Local development node for the mood diary: plays the chain, the diary
//! contract and the FHE relayer behind one HTTP API.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use diary_api::DiaryContext;
use shared::{
    domain::{Address, TxHash},
    error::{ApiError, ErrorCode},
    protocol::{
        CallerQuery, CanDecryptResponse, DeploymentSummary, EntryCountResponse, HandleResponse,
        NetworkKeyResponse, SignedTransaction, SubmitTransactionResponse, TxReceipt,
        UserDecryptHttpRequest, UserDecryptHttpResponse,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

pub mod config;

use config::{load_or_create_network_key, prepare_database_url, Settings};

const MAX_REQUEST_BYTES: usize = 256 * 1024;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Clone)]
pub struct AppState {
    pub api: DiaryContext,
}

/// Opens storage and the network key described by `settings` and makes sure
/// the configured diary is deployed.
pub async fn bootstrap(settings: &Settings) -> anyhow::Result<AppState> {
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let network_key = load_or_create_network_key(&settings.network_key_path)?;
    let api = DiaryContext::new(storage, network_key, settings.chain_id);

    let deployment = diary_api::deploy(&api, settings.diary_address, &settings.chain_name)
        .await
        .map_err(|err| anyhow::anyhow!("failed to deploy diary: {}", err.message))?;
    info!(
        "node: diary ready address={} chain_id={} chain={}",
        deployment.address, deployment.chain_id, deployment.chain_name
    );
    Ok(AppState { api })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/keys/network", get(http_network_key))
        .route("/v1/deployments", get(http_deployments))
        .route("/v1/diaries/:address/entry-count", get(http_entry_count))
        .route(
            "/v1/diaries/:address/encrypted-trend",
            get(http_encrypted_trend),
        )
        .route(
            "/v1/diaries/:address/my-trend-handle",
            get(http_my_trend_handle),
        )
        .route("/v1/diaries/:address/can-decrypt", get(http_can_decrypt))
        .route("/v1/transactions", post(http_submit_transaction))
        .route("/v1/transactions/:tx_hash", get(http_transaction_receipt))
        .route("/v1/user-decrypt", post(http_user_decrypt))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            error!("node: health check failed err={err}");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

async fn http_network_key(State(state): State<Arc<AppState>>) -> Json<NetworkKeyResponse> {
    Json(diary_api::network_key(&state.api))
}

async fn http_deployments(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<DeploymentSummary>> {
    diary_api::deployments(&state.api)
        .await
        .map(Json)
        .map_err(api_failure)
}

async fn http_entry_count(
    State(state): State<Arc<AppState>>,
    Path(address): Path<Address>,
) -> ApiResult<EntryCountResponse> {
    let entry_count = diary_api::entry_count(&state.api, address)
        .await
        .map_err(api_failure)?;
    Ok(Json(EntryCountResponse { entry_count }))
}

async fn http_encrypted_trend(
    State(state): State<Arc<AppState>>,
    Path(address): Path<Address>,
) -> ApiResult<HandleResponse> {
    let handle = diary_api::encrypted_trend(&state.api, address)
        .await
        .map_err(api_failure)?;
    Ok(Json(HandleResponse { handle }))
}

async fn http_my_trend_handle(
    State(state): State<Arc<AppState>>,
    Path(address): Path<Address>,
    Query(q): Query<CallerQuery>,
) -> ApiResult<HandleResponse> {
    let handle = diary_api::my_trend_handle(&state.api, address, q.caller)
        .await
        .map_err(api_failure)?;
    Ok(Json(HandleResponse { handle }))
}

async fn http_can_decrypt(
    State(state): State<Arc<AppState>>,
    Path(address): Path<Address>,
    Query(q): Query<CallerQuery>,
) -> ApiResult<CanDecryptResponse> {
    let can_decrypt = diary_api::can_decrypt_trend(&state.api, address, q.caller)
        .await
        .map_err(api_failure)?;
    Ok(Json(CanDecryptResponse { can_decrypt }))
}

async fn http_submit_transaction(
    State(state): State<Arc<AppState>>,
    Json(signed): Json<SignedTransaction>,
) -> ApiResult<SubmitTransactionResponse> {
    diary_api::submit_transaction(&state.api, signed)
        .await
        .map(Json)
        .map_err(api_failure)
}

async fn http_transaction_receipt(
    State(state): State<Arc<AppState>>,
    Path(tx_hash): Path<TxHash>,
) -> ApiResult<TxReceipt> {
    diary_api::transaction_receipt(&state.api, tx_hash)
        .await
        .map(Json)
        .map_err(api_failure)
}

async fn http_user_decrypt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UserDecryptHttpRequest>,
) -> ApiResult<UserDecryptHttpResponse> {
    diary_api::user_decrypt(&state.api, request)
        .await
        .map(Json)
        .map_err(api_failure)
}

fn api_failure(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Reverted => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
