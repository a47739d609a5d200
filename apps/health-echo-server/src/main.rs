//! Health/Echo Server Binary
//!
//! Starts the gRPC echo and health checking server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin health-echo-server
//! ```
//!
//! # Environment Variables
//!
//! - `HEALTH_ECHO_GRPC_HOST`: gRPC bind host (default: 0.0.0.0)
//! - `HEALTH_ECHO_GRPC_PORT`: gRPC server port (default: 50051)
//! - `HEALTH_ECHO_OPS_PORT`: Ops HTTP port, 0 disables it (default: 8081)
//! - `HEALTH_ECHO_REFLECTION`: Register server reflection (default: true)
//! - `HEALTH_ECHO_TRACE_HEALTH_CHECKS`: Trace health RPCs too (default: false)
//! - `HEALTH_ECHO_WATCH_BUFFER`: Per-watch send buffer (default: 16)
//! - `HEALTH_ECHO_PROBE_INTERVAL_MS`: Health probe interval (default: 5000)
//! - `HEALTH_ECHO_PROBE_TIMEOUT_MS`: Health probe timeout (default: 1000)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: health-echo-server)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use health_echo_server::infrastructure::telemetry;
use health_echo_server::{
    GrpcServer, HealthMonitor, HealthRegistry, OpsServer, OpsState, ServerConfig, ServingStatus,
    bind_listener, init_metrics, seed_registry,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (logging + optional OTLP export)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        span_export = telemetry_guard.exporting(),
        "Starting health/echo server"
    );

    let _metrics_handle = init_metrics();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let grpc_addr = config.server.grpc_addr();
    let listener = bind_listener(grpc_addr).await.inspect_err(|e| {
        tracing::error!(error = %e, "Cannot start gRPC server");
    })?;

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(HealthRegistry::new());
    seed_registry(&registry);

    // Spawn health monitor
    let monitor = HealthMonitor::new(Arc::clone(&registry), config.monitor);
    tokio::spawn(monitor.run(shutdown_token.clone()));

    // Spawn ops server
    if config.server.ops_enabled() {
        let ops_state = Arc::new(OpsState::new(
            env!("CARGO_PKG_VERSION"),
            Arc::clone(&registry),
        ));
        let ops_server = OpsServer::new(config.server.ops_port, ops_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = ops_server.run().await {
                tracing::error!(error = %e, "Ops server error");
            }
        });
    }

    // Spawn gRPC server
    let grpc_server = GrpcServer::new(Arc::clone(&registry), config.grpc, shutdown_token.clone());
    let mut grpc_task = tokio::spawn(grpc_server.serve(listener));

    tracing::info!(addr = %grpc_addr, "Health/echo server ready");

    tokio::select! {
        () = await_signal() => {}
        result = &mut grpc_task => {
            shutdown_token.cancel();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("gRPC server failed"),
                Err(e) => Err(e).context("gRPC server task panicked"),
            };
        }
    }

    // Watchers see NOT_SERVING before their streams are closed.
    let updated = registry.set_all(ServingStatus::NotServing);
    tracing::info!(services = updated, "Published NOT_SERVING");
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, grpc_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "gRPC server error during shutdown"),
        Ok(Err(e)) => tracing::error!(error = %e, "gRPC server task panicked"),
        Err(_) => tracing::warn!("gRPC server did not stop within the shutdown timeout"),
    }

    tracing::info!("Health/echo server stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        grpc_addr = %config.server.grpc_addr(),
        ops_port = config.server.ops_port,
        reflection = config.grpc.reflection,
        trace_health_checks = config.grpc.trace_health_checks,
        "Configuration loaded"
    );
    tracing::debug!(
        watch_buffer = config.grpc.watch.buffer,
        probe_interval_ms = config.monitor.probe_interval.as_millis(),
        probe_timeout_ms = config.monitor.probe_timeout.as_millis(),
        "Tuning"
    );
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
