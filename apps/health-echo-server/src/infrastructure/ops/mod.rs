//! Ops HTTP Endpoint
//!
//! Plain HTTP view of the health registry and the Prometheus metrics, for
//! orchestrators and scrapers that do not speak gRPC.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health report (503 unless the server is serving)
//! - `GET /healthz` - Liveness probe (always OK while the process runs)
//! - `GET /readyz` - Readiness probe (overall status is `SERVING`)
//! - `GET /metrics` - Prometheus metrics in text format

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::health::{HealthRegistry, OVERALL_SERVICE, ServingStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall server status.
    pub status: ServingStatus,
    /// Server version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Status of every known service, keyed by name (`""` is the server).
    pub services: BTreeMap<String, ServingStatus>,
    /// Open health watch subscriptions.
    pub watchers: usize,
}

// =============================================================================
// State
// =============================================================================

/// Shared state for the ops server.
pub struct OpsState {
    version: String,
    started_at: Instant,
    registry: Arc<HealthRegistry>,
}

impl OpsState {
    /// Create ops state over the shared registry.
    #[must_use]
    pub fn new(version: impl Into<String>, registry: Arc<HealthRegistry>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            registry,
        }
    }

    fn report(&self) -> HealthResponse {
        let services = self.registry.snapshot();
        let status = services
            .get(OVERALL_SERVICE)
            .copied()
            .unwrap_or_default();

        HealthResponse {
            status,
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            services,
            watchers: self.registry.subscriber_count(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Ops HTTP server.
pub struct OpsServer {
    port: u16,
    state: Arc<OpsState>,
    cancel: CancellationToken,
}

impl OpsServer {
    /// Create a new ops server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<OpsState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the ops server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `OpsServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), OpsServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| OpsServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Ops server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| OpsServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Ops server stopped");
        Ok(())
    }
}

/// Build the ops router.
pub fn router(state: Arc<OpsState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<OpsState>>) -> impl IntoResponse {
    let response = state.report();
    let status_code = if response.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<OpsState>>) -> impl IntoResponse {
    if state.registry.check(OVERALL_SERVICE).is_serving() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Ops server errors.
#[derive(Debug, thiserror::Error)]
pub enum OpsServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    fn state_with(status: ServingStatus) -> (Arc<OpsState>, Arc<HealthRegistry>) {
        let registry = Arc::new(HealthRegistry::new());
        registry.set_status(OVERALL_SERVICE, status);
        let state = Arc::new(OpsState::new("0.1.0", Arc::clone(&registry)));
        (state, registry)
    }

    async fn get_path(state: Arc<OpsState>, path: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (state, _registry) = state_with(ServingStatus::NotServing);
        let (status, body) = get_path(state, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_follows_overall_status() {
        let (state, registry) = state_with(ServingStatus::Serving);
        let (status, body) = get_path(Arc::clone(&state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");

        registry.set_status(OVERALL_SERVICE, ServingStatus::NotServing);
        let (status, body) = get_path(state, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");
    }

    #[tokio::test]
    async fn health_report_lists_services_and_watchers() {
        let (state, registry) = state_with(ServingStatus::Serving);
        registry.set_status("grpc.examples.echo.Echo", ServingStatus::NotServing);
        let _subscription = registry.subscribe(OVERALL_SERVICE);

        let (status, body) = get_path(state, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "SERVING");
        assert_eq!(json["version"], "0.1.0");
        assert_eq!(json["services"][""], "SERVING");
        assert_eq!(json["services"]["grpc.examples.echo.Echo"], "NOT_SERVING");
        assert_eq!(json["watchers"], 1);
    }

    #[tokio::test]
    async fn health_report_is_unavailable_when_not_serving() {
        let (state, _registry) = state_with(ServingStatus::NotServing);
        let (status, _body) = get_path(state, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn bind_error_names_port() {
        let err = OpsServerError::BindFailed(8081, "address in use".to_string());
        assert_eq!(err.to_string(), "failed to bind to port 8081: address in use");
    }
}
