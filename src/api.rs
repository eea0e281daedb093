//! HTTP API
//!
//! - GET  /health                  - Liveness
//! - GET  /metrics                 - Prometheus metrics
//! - GET  /bridge/status/{tx_hash} - One request by source tx hash
//! - GET  /bridge/pending          - Requests in pending or processing
//! - GET  /bridge/history?limit=   - Most recent requests
//! - GET  /bridge/user/{address}?limit= - Requests sent or received by an address
//! - GET  /bridge/stats            - Totals, route pairs and completed volume
//! - GET  /bridge/info             - Chain ids, bridge addresses and stats
//! - POST /bridge/recover          - Manually reprocess a source transaction

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::db::{BridgeRequest, BridgeStats};
use crate::metrics;
use crate::recovery::{RecoveryError, RecoveryOutcome};
use crate::service::{
    BridgeInfo, BridgeService, DEFAULT_HISTORY_LIMIT, DEFAULT_USER_HISTORY_LIMIT,
};
use crate::types::ChainName;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] eyre::Report),
}

impl From<RecoveryError> for ApiError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::Internal(report) => ApiError::Internal(report),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(e) => {
                error!(error = %format!("{:#}", e), "API request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            ApiError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverRequest {
    pub tx_hash: String,
    pub from_chain: String,
}

#[derive(Serialize)]
pub struct PendingResponse {
    pub count: usize,
    pub requests: Vec<BridgeRequest>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn prometheus_metrics() -> Response {
    match metrics::gather_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response(),
    }
}

async fn get_status(
    State(service): State<Arc<BridgeService>>,
    Path(tx_hash): Path<String>,
) -> ApiResult<BridgeRequest> {
    service
        .get_status(&tx_hash)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no bridge request for {}", tx_hash)))
}

async fn get_pending(State(service): State<Arc<BridgeService>>) -> ApiResult<PendingResponse> {
    let requests = service.get_all_pending().await?;
    Ok(Json(PendingResponse {
        count: requests.len(),
        requests,
    }))
}

async fn get_history(
    State(service): State<Arc<BridgeService>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<BridgeRequest>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(service.get_history(limit).await?))
}

async fn get_user_history(
    State(service): State<Arc<BridgeService>>,
    Path(address): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<BridgeRequest>> {
    let limit = query.limit.unwrap_or(DEFAULT_USER_HISTORY_LIMIT);
    Ok(Json(service.get_user_history(&address, limit).await?))
}

async fn get_stats(State(service): State<Arc<BridgeService>>) -> ApiResult<BridgeStats> {
    Ok(Json(service.get_stats().await?))
}

async fn get_info(State(service): State<Arc<BridgeService>>) -> ApiResult<BridgeInfo> {
    Ok(Json(service.get_info().await?))
}

async fn recover(
    State(service): State<Arc<BridgeService>>,
    Json(body): Json<RecoverRequest>,
) -> ApiResult<RecoveryOutcome> {
    let chain: ChainName = body
        .from_chain
        .parse()
        .map_err(|e: eyre::Report| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(service.recover(&body.tx_hash, chain).await?))
}

pub fn router(service: Arc<BridgeService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/bridge/status/{tx_hash}", get(get_status))
        .route("/bridge/pending", get(get_pending))
        .route("/bridge/history", get(get_history))
        .route("/bridge/user/{address}", get(get_user_history))
        .route("/bridge/stats", get(get_stats))
        .route("/bridge/info", get(get_info))
        .route("/bridge/recover", post(recover))
        .with_state(service)
}

/// Start the API server
pub async fn start_api_server(addr: SocketAddr, service: Arc<BridgeService>) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server started");

    metrics::set_up(true);

    axum::serve(listener, router(service)).await?;
    Ok(())
}
