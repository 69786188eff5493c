//! HTTP API for the operator dashboard.
//!
//! - `GET /health` liveness of the engine process
//! - `GET /api/snapshot` latest published snapshot
//! - `GET /api/stats` ingest and engine counters
//! - `POST /api/ingest` one node message, same JSON as the UDP datagrams
//! - `POST /api/calibrate` re-sample the ambient audio baseline
//!
//! ```text
//! nodes ──UDP──→ engine thread ──snapshot──→ GET /api/snapshot ──→ dashboard
//!                     ↑
//!          POST /api/calibrate
//! ```

use crate::core::audio::Baseline;
use crate::ingest::types::IngestError;
use crate::runtime::{CalibrationRequestError, EngineClient};
use crate::snapshot::EngineSnapshot;
use crate::stats::StatsSnapshot;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (port 0 for random)
    pub bind: SocketAddr,
}

impl ServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self { bind }
    }

    /// Loopback on the given port.
    pub fn localhost(port: u16) -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }
}

/// Shared server state
pub struct ServerState {
    engine: EngineClient,
    host: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub host: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct CalibrateResponse {
    pub status: String,
    pub baseline: Baseline,
}

fn api_error(status: StatusCode, code: &str, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        host: state.host.clone(),
    })
}

/// GET /api/snapshot
async fn snapshot(State(state): State<Arc<ServerState>>) -> Json<EngineSnapshot> {
    Json(state.engine.latest().as_ref().clone())
}

/// GET /api/stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<StatsSnapshot> {
    Json(state.engine.stats().stats())
}

/// POST /api/ingest
async fn ingest(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    match state.engine.submit_bytes(&body) {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                status: "accepted".to_string(),
            }),
        )),
        Err(e @ IngestError::Malformed(_)) => {
            Err(api_error(StatusCode::BAD_REQUEST, "MALFORMED_MESSAGE", e))
        }
        Err(e @ IngestError::QueueFull) => {
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL", e))
        }
        Err(e) => Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "ENGINE_STOPPED", e)),
    }
}

/// POST /api/calibrate
async fn calibrate(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<CalibrateResponse>, ApiError> {
    match state.engine.calibrate().await {
        Ok(baseline) => Ok(Json(CalibrateResponse {
            status: "success".to_string(),
            baseline,
        })),
        Err(CalibrationRequestError::Failed(e)) => Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "CALIBRATION_FAILED",
            e,
        )),
        Err(e @ CalibrationRequestError::Busy) => {
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL", e))
        }
        Err(e) => Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "ENGINE_STOPPED", e)),
    }
}

/// Build the router without binding.
pub fn router(engine: EngineClient) -> Router {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let state = Arc::new(ServerState { engine, host });

    Router::new()
        .route("/health", get(health))
        .route("/api/snapshot", get(snapshot))
        .route("/api/stats", get(stats))
        .route("/api/ingest", post(ingest))
        .route("/api/calibrate", post(calibrate))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                    HeaderValue::from_static("http://localhost:3000"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    engine: EngineClient,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(engine);

    let listener = TcpListener::bind(config.bind).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Dashboard API listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
