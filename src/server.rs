//! HTTP surface for the external shell/UI.
//!
//! This module exposes the engine over a local HTTP server:
//! - Cached state reads (`GET /state`) that never block on network I/O
//! - Forced cycles (`POST /cycle`) that wait for the produced summary
//! - Mode switches and category curation
//!
//! # Architecture
//!
//! ```text
//! Shell/UI ──→ GET /state ───→ summary cache (no I/O)
//!          ──→ POST /cycle ──→ scheduler actor ──→ collect → classify → summarize
//! ```

use crate::categories::Category;
use crate::config::Mode;
use crate::error::EngineError;
use crate::scheduler::{ConnectionStatus, EngineHandle, Nudge};
use crate::summarizer::Summary;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub instance_id: String,
}

/// Error response.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Deserialize)]
struct CycleRequest {
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: String,
}

#[derive(Serialize)]
struct ModeResponse {
    mode: Mode,
}

#[derive(Serialize)]
struct BulkResponse {
    applied: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(error: &EngineError) -> ApiError {
    let (status, code) = match error {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
        EngineError::EngineGone(_) => (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_GONE"),
        EngineError::CollectorUnavailable(_) | EngineError::CollectorEmpty => {
            (StatusCode::BAD_GATEWAY, "COLLECTOR")
        }
        EngineError::SummarizerUnavailable(_) => (StatusCode::BAD_GATEWAY, "SUMMARIZER"),
        EngineError::Discovery(_) => (StatusCode::BAD_GATEWAY, "DISCOVERY"),
        EngineError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG"),
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

fn parse_mode(raw: &str) -> Result<Mode, ApiError> {
    raw.parse::<Mode>().map_err(|e| api_error(&e))
}

/// GET /health
async fn health(State(handle): State<EngineHandle>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: handle.instance_id().to_string(),
    })
}

/// GET /state: the latest completed cycle summary, or null before the
/// first cycle. Always a cache read.
async fn get_state(State(handle): State<EngineHandle>) -> Json<Option<Summary>> {
    Json(handle.latest_summary().await)
}

/// GET /state/daily
async fn get_daily_state(State(handle): State<EngineHandle>) -> Json<Option<Summary>> {
    Json(handle.latest_daily_summary().await)
}

/// GET /nudge: the most recent intervention, for shells that poll.
async fn get_nudge(State(handle): State<EngineHandle>) -> Json<Option<Nudge>> {
    Json(handle.last_nudge().await)
}

/// POST /cycle: run a cycle now (optionally under a specific mode) and
/// return the produced summary; a fallback summary is still a success.
async fn post_cycle(
    State(handle): State<EngineHandle>,
    body: Option<Json<CycleRequest>>,
) -> Result<Json<Summary>, ApiError> {
    let mode = match body.and_then(|Json(request)| request.mode) {
        Some(raw) => Some(parse_mode(&raw)?),
        None => None,
    };
    let summary = handle
        .run_cycle_now(mode)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(summary))
}

/// POST /cycle/daily
async fn post_daily_cycle(
    State(handle): State<EngineHandle>,
) -> Result<Json<Summary>, ApiError> {
    let summary = handle.run_daily_now().await.map_err(|e| api_error(&e))?;
    Ok(Json(summary))
}

/// GET /mode
async fn get_mode(State(handle): State<EngineHandle>) -> Json<ModeResponse> {
    Json(ModeResponse {
        mode: handle.current_mode().await,
    })
}

/// POST /mode
async fn post_mode(
    State(handle): State<EngineHandle>,
    Json(request): Json<ModeRequest>,
) -> Result<StatusCode, ApiError> {
    let mode = parse_mode(&request.mode)?;
    handle.set_mode(mode).await.map_err(|e| api_error(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /categories
async fn get_categories(State(handle): State<EngineHandle>) -> Json<Vec<Category>> {
    Json(handle.categories().all().await)
}

/// POST /categories: insert or replace one record.
async fn post_category(
    State(handle): State<EngineHandle>,
    Json(record): Json<Category>,
) -> Result<StatusCode, ApiError> {
    handle
        .categories()
        .update(record)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /categories/bulk: all-or-nothing batch.
async fn post_categories_bulk(
    State(handle): State<EngineHandle>,
    Json(records): Json<Vec<Category>>,
) -> Result<Json<BulkResponse>, ApiError> {
    let applied = handle
        .categories()
        .bulk_update(records)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(BulkResponse { applied }))
}

/// GET /status: connectivity of the tracker and model endpoints.
async fn get_status(State(handle): State<EngineHandle>) -> Json<ConnectionStatus> {
    Json(handle.check_connections().await)
}

fn router(handle: EngineHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state))
        .route("/state/daily", get(get_daily_state))
        .route("/nudge", get(get_nudge))
        .route("/cycle", post(post_cycle))
        .route("/cycle/daily", post(post_daily_cycle))
        .route("/mode", get(get_mode).post(post_mode))
        .route("/categories", get(get_categories).post(post_category))
        .route("/categories/bulk", post(post_categories_bulk))
        .route("/status", get(get_status))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(handle)
}

/// Run the HTTP server. Binds to 127.0.0.1 only; pass port 0 for a random
/// port. Returns the bound address and a shutdown trigger.
pub async fn run(
    handle: EngineHandle,
    port: u16,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(handle);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("engine surface listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("server shutdown signal received");
            })
            .await
        {
            tracing::error!("server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
