//! Health Service
//!
//! Transport-agnostic health queries over the [`HealthRegistry`].
//!
//! - `check` answers from the registry's current value: no blocking, no
//!   side effects, constant time.
//! - `watch` hands out a [`StatusSubscription`] that yields the current
//!   status first and then one value per real transition.

use std::sync::Arc;

use crate::domain::health::{HealthRegistry, ServingStatus, StatusSubscription, service_key};

/// Health check and watch operations.
#[derive(Debug, Clone)]
pub struct HealthService {
    registry: Arc<HealthRegistry>,
}

impl HealthService {
    /// Create a health service backed by the given registry.
    #[must_use]
    pub const fn new(registry: Arc<HealthRegistry>) -> Self {
        Self { registry }
    }

    /// Current status of a service, or of the whole process when `service`
    /// is `None` or empty. Unknown names report `Unknown`.
    #[must_use]
    pub fn check(&self, service: Option<&str>) -> ServingStatus {
        self.registry.check(service_key(service))
    }

    /// Subscribe to status transitions of a service.
    #[must_use]
    pub fn watch(&self, service: Option<&str>) -> StatusSubscription {
        self.registry.subscribe(service_key(service))
    }

    /// The registry this service reads from.
    #[must_use]
    pub const fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }
}
