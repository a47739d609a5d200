//! Health gRPC Adapter
//!
//! Implements `grpc.health.v1.Health` on top of [`HealthService`].
//!
//! # Watch Delivery
//!
//! Each `Watch` call spawns one delivery task that owns the call's
//! [`StatusSubscription`] and the sending half of a bounded channel; the
//! receiving half is the gRPC response stream. The task pushes the current
//! status, then one message per transition, and exits when:
//!
//! 1. the client goes away (the response stream is dropped, closing the
//!    channel), even if no transition ever happens
//! 2. a send fails
//! 3. the server shuts down (the cancellation token fires), including while
//!    the task waits for buffer space behind a client that stopped reading
//!
//! Exiting affects only that one watcher.

use std::pin::Pin;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use super::proto::grpc::health::v1::{
    HealthCheckRequest, HealthCheckResponse, health_check_response, health_server::Health,
};
use crate::application::services::HealthService;
use crate::domain::health::{ServingStatus, StatusSubscription};
use crate::infrastructure::metrics;

// =============================================================================
// Type Aliases
// =============================================================================

type WatchItem = Result<HealthCheckResponse, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

// =============================================================================
// Settings
// =============================================================================

/// Settings for watch streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    /// Capacity of each watcher's outbound buffer. Must be non-zero.
    pub buffer: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { buffer: 16 }
    }
}

// =============================================================================
// Service
// =============================================================================

/// gRPC adapter for the health service.
#[derive(Debug, Clone)]
pub struct HealthGrpcService {
    service: HealthService,
    settings: WatchSettings,
    shutdown: CancellationToken,
}

impl HealthGrpcService {
    /// Create a new adapter. Watch streams end when `shutdown` is cancelled.
    #[must_use]
    pub const fn new(
        service: HealthService,
        settings: WatchSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            settings,
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl Health for HealthGrpcService {
    type WatchStream = BoxedStream<HealthCheckResponse>;

    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let req = request.into_inner();
        let status = self.service.check(Some(req.service.as_str()));
        Ok(Response::new(status_response(status)))
    }

    async fn watch(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let req = request.into_inner();
        let subscription = self.service.watch(Some(req.service.as_str()));

        let (tx, rx) = mpsc::channel(self.settings.buffer);
        tokio::spawn(deliver(subscription, tx, self.shutdown.clone()));

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as Self::WatchStream))
    }
}

// =============================================================================
// Delivery Task
// =============================================================================

/// Why a watch delivery task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchExit {
    ClientGone,
    SendFailed,
    Shutdown,
    RegistryClosed,
}

/// Releases per-watcher resources on every exit path.
struct WatcherGuard {
    id: Uuid,
    service: String,
    opened_at: Instant,
    delivered: u64,
}

impl WatcherGuard {
    fn open(service: &str) -> Self {
        let guard = Self {
            id: Uuid::new_v4(),
            service: service.to_string(),
            opened_at: Instant::now(),
            delivered: 0,
        };
        metrics::watch_opened();
        tracing::debug!(watcher_id = %guard.id, service = %guard.service, "Watch stream opened");
        guard
    }
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        metrics::watch_closed();
        tracing::debug!(
            watcher_id = %self.id,
            service = %self.service,
            delivered = self.delivered,
            open_ms = self.opened_at.elapsed().as_millis(),
            "Watch stream closed"
        );
    }
}

async fn deliver(
    mut subscription: StatusSubscription,
    tx: mpsc::Sender<WatchItem>,
    shutdown: CancellationToken,
) -> WatchExit {
    let mut guard = WatcherGuard::open(subscription.service());

    let exit = loop {
        let next = tokio::select! {
            biased;
            () = tx.closed() => break WatchExit::ClientGone,
            next = subscription.next_transition() => next,
            () = shutdown.cancelled() => break WatchExit::Shutdown,
        };

        let Some(status) = next else {
            break WatchExit::RegistryClosed;
        };

        // Waiting for buffer space still yields to shutdown.
        let permit = tokio::select! {
            biased;
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break WatchExit::SendFailed,
            },
            () = shutdown.cancelled() => break WatchExit::Shutdown,
        };

        permit.send(Ok(status_response(status)));
        guard.delivered += 1;
        metrics::record_watch_update(status);
    };

    tracing::trace!(watcher_id = %guard.id, exit = ?exit, "Watch delivery finished");
    exit
}

// =============================================================================
// Conversion Functions
// =============================================================================

const fn status_to_proto(status: ServingStatus) -> health_check_response::ServingStatus {
    match status {
        ServingStatus::Unknown => health_check_response::ServingStatus::Unknown,
        ServingStatus::Serving => health_check_response::ServingStatus::Serving,
        ServingStatus::NotServing => health_check_response::ServingStatus::NotServing,
    }
}

fn status_response(status: ServingStatus) -> HealthCheckResponse {
    HealthCheckResponse {
        status: status_to_proto(status).into(),
    }
}

// =============================================================================
// Tests
// =============================================================================
