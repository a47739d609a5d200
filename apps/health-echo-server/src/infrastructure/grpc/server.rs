//! gRPC Server Frontend
//!
//! Binds the listener, registers the echo, health and reflection services
//! behind the call trace layer, and serves until the shutdown token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::server::NamedService;
use tonic::transport::Server;

use super::echo::EchoGrpcService;
use super::health::{HealthGrpcService, WatchSettings};
use super::proto::FILE_DESCRIPTOR_SET;
use super::proto::grpc::examples::echo::echo_server::EchoServer;
use super::proto::grpc::health::v1::health_server::HealthServer;
use super::trace::CallTraceLayer;
use crate::application::services::{EchoService, HealthService};
use crate::domain::health::{HealthRegistry, OVERALL_SERVICE, ServingStatus};

/// Fully-qualified name of the echo service, as used for health checks.
pub const ECHO_SERVICE_NAME: &str = <EchoServer<EchoGrpcService> as NamedService>::NAME;

/// Fully-qualified name of the health service.
pub const HEALTH_SERVICE_NAME: &str = <HealthServer<HealthGrpcService> as NamedService>::NAME;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while running the gRPC server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind gRPC listener on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The reflection service could not be built from the descriptor set.
    #[error("failed to build reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// The transport failed while serving.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

// =============================================================================
// Settings
// =============================================================================

/// Settings for the gRPC server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrpcServerSettings {
    /// Register the server reflection service (v1 and v1alpha).
    pub reflection: bool,
    /// Trace `grpc.health.v1.Health` calls as well.
    pub trace_health_checks: bool,
    /// Watch stream settings.
    pub watch: WatchSettings,
}

impl Default for GrpcServerSettings {
    fn default() -> Self {
        Self {
            reflection: true,
            trace_health_checks: false,
            watch: WatchSettings::default(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Bind a TCP listener for the gRPC server.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is unavailable.
pub async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Mark the overall server and the echo service as serving.
pub fn seed_registry(registry: &HealthRegistry) {
    registry.set_status(OVERALL_SERVICE, ServingStatus::Serving);
    registry.set_status(ECHO_SERVICE_NAME, ServingStatus::Serving);
}

/// gRPC server hosting the echo and health services.
#[derive(Debug)]
pub struct GrpcServer {
    registry: Arc<HealthRegistry>,
    settings: GrpcServerSettings,
    shutdown: CancellationToken,
}

impl GrpcServer {
    /// Create a server over the shared registry.
    ///
    /// Cancelling `shutdown` stops accepting calls and ends every open
    /// watch stream.
    #[must_use]
    pub const fn new(
        registry: Arc<HealthRegistry>,
        settings: GrpcServerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            settings,
            shutdown,
        }
    }

    /// Serve on an already-bound listener until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if reflection cannot be built or the transport fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().ok();

        let echo = EchoServer::new(EchoGrpcService::new(EchoService::new()));
        let health = HealthServer::new(HealthGrpcService::new(
            HealthService::new(self.registry),
            self.settings.watch,
            self.shutdown.clone(),
        ));

        let (reflection_v1, reflection_v1alpha) = if self.settings.reflection {
            let v1 = tonic_reflection::server::Builder::configure()
                .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
                .build_v1()?;
            let v1alpha = tonic_reflection::server::Builder::configure()
                .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
                .build_v1alpha()?;
            (Some(v1), Some(v1alpha))
        } else {
            (None, None)
        };

        tracing::info!(
            addr = ?local_addr,
            reflection = self.settings.reflection,
            trace_health_checks = self.settings.trace_health_checks,
            "gRPC server listening"
        );

        Server::builder()
            .layer(CallTraceLayer::new(self.settings.trace_health_checks))
            .add_service(echo)
            .add_service(health)
            .add_optional_service(reflection_v1)
            .add_optional_service(reflection_v1alpha)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                self.shutdown.cancelled_owned(),
            )
            .await?;

        tracing::info!("gRPC server stopped");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
