//! HTTP surface of a node: join relay, status, key reads and metrics.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use raftbench_core::{metrics, BenchDb, Consensus, CoreError, JoinRequest, MembershipGate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{classify::ServerErrorsFailureClass, trace::TraceLayer};
use tracing::{error, info, info_span, warn, Span};

use crate::error::NodeResult;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub consensus: Arc<dyn Consensus>,
    pub db: Arc<BenchDb>,
    pub gate: Arc<MembershipGate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub members: usize,
}

/// Body of `GET /`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub members: usize,
    pub quorum: usize,
    pub gate_released: bool,
    pub write_count: u64,
    pub store_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key: u64,
    pub size: usize,
}

/// Error body `{"error": ...}` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        let status = match e {
            CoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
            CoreError::NotStarted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Builds the node's router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/join", post(join_handler))
        .route("/keys/:key", get(key_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(|response: &Response, latency: std::time::Duration, _span: &Span| {
                    let status = response.status();
                    let latency_ms = latency.as_millis() as u64;
                    if status.is_server_error() {
                        error!(status = %status, latency_ms, "request failed with server error");
                    } else if status.is_client_error() {
                        warn!(status = %status, latency_ms, "request failed with client error");
                    } else {
                        tracing::debug!(status = %status, latency_ms, "request completed");
                    }
                })
                .on_failure(
                    |failure_class: ServerErrorsFailureClass, latency: std::time::Duration, _span: &Span| {
                        error!(failure_class = ?failure_class, latency_ms = latency.as_millis() as u64, "request failed");
                    },
                ),
        )
}

/// Relays a join request into the consensus layer and feeds the gate.
async fn join_handler(
    State(state): State<AppState>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> Result<Json<JoinResponse>, ApiError> {
    let Json(request) = payload
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid join request: {}", e)))?;

    let members = state.consensus.add_member(request).await?;
    state.gate.observe(members);

    Ok(Json(JoinResponse { members }))
}

async fn status_handler(State(state): State<AppState>) -> Json<NodeStatus> {
    let stats = state.db.stats();
    Json(NodeStatus {
        name: state.consensus.name().to_string(),
        members: state.consensus.member_count(),
        quorum: state.gate.target(),
        gate_released: state.gate.is_released(),
        write_count: stats.write_count,
        store_len: state.db.len(),
    })
}

async fn key_handler(
    State(state): State<AppState>,
    Path(key): Path<u64>,
) -> Result<Json<KeyInfo>, ApiError> {
    match state.db.try_get(key) {
        Some(value) => Ok(Json(KeyInfo {
            key,
            size: value.len(),
        })),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("key {} not found", key),
        )),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        Body::from(metrics::export_prometheus()),
    )
}

/// Serves `app` on `listener` until SIGINT/SIGTERM.
pub async fn serve(listener: TcpListener, app: Router) -> NodeResult<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM signal, initiating graceful shutdown");
        }
    }
}
