#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Health/Echo Server - gRPC Echo and Health Checking
//!
//! A gRPC server hosting a unary echo service next to the standard
//! `grpc.health.v1.Health` protocol. Health `Watch` streams are
//! change-driven: a subscriber gets the current status once, then one
//! message per real transition, until it disconnects or the server stops.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Health status model
//!   - `health`: serving status values, the status registry, subscriptions
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `HealthProbe` for pluggable health evaluators
//!   - `services`: echo, health check/watch, probe-driven health monitor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `grpc`: tonic adapters, call trace layer, reflection, server lifecycle
//!   - `config`: configuration from the environment
//!   - `ops`: HTTP liveness/readiness/health/metrics endpoint
//!   - `metrics`, `telemetry`: Prometheus metrics, logging and OTLP tracing
//!
//! # Data Flow
//!
//! ```text
//! HealthProbe ──► HealthMonitor ──┐
//!                                 ▼
//! main (seed / shutdown) ──► HealthRegistry ──► Check
//!                                 │
//!                                 └──► StatusSubscription ──► Watch task ──► client
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Health status model with no transport dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::health::{
    HealthRegistry, OVERALL_SERVICE, ServingStatus, StatusSubscription, service_key,
};

// Application services and ports
pub use application::ports::HealthProbe;
pub use application::services::{
    EchoMessage, EchoService, HealthMonitor, HealthService, MonitorSettings,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServerConfig, ServerSettings};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{
    ECHO_SERVICE_NAME, GrpcServer, GrpcServerSettings, HEALTH_SERVICE_NAME, ServerError,
    WatchSettings, bind_listener, proto, seed_registry,
};

// Ops server
pub use infrastructure::ops::{OpsServer, OpsServerError, OpsState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
