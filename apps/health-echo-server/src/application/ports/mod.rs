//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `HealthProbe`: evaluates the health of something the process depends
//!   on (a database, a downstream service). Bound to a service name in the
//!   [`HealthMonitor`](crate::application::services::HealthMonitor).

use async_trait::async_trait;

use crate::domain::health::ServingStatus;

/// A live health evaluation for one dependency.
///
/// Implementations should be cheap and should not retry; the monitor
/// already bounds each call with a timeout and calls again on the next
/// tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Evaluate the dependency and report its status.
    async fn probe(&self) -> ServingStatus;
}
