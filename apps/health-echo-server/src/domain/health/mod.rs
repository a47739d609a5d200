//! Health Status Types
//!
//! The serving status reported for the whole process or for a named
//! sub-service, plus the registry that holds the authoritative value.
//!
//! # Service Names
//!
//! The empty name ([`OVERALL_SERVICE`]) stands for the whole process.
//! Any other name identifies a sub-service, conventionally the fully
//! qualified gRPC service name (e.g. `grpc.examples.echo.Echo`).

mod registry;

pub use registry::{HealthRegistry, StatusSubscription};

use serde::Serialize;

/// Service name that denotes the overall process status.
pub const OVERALL_SERVICE: &str = "";

// =============================================================================
// Serving Status
// =============================================================================

/// Reported health of a service.
///
/// These three variants are the only values ever delivered to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    /// Status has not been determined, or the service is not registered.
    #[default]
    Unknown,
    /// The service is able to handle requests.
    Serving,
    /// The service is registered but unable to handle requests.
    NotServing,
}

impl ServingStatus {
    /// Get the canonical upper-case name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Serving => "SERVING",
            Self::NotServing => "NOT_SERVING",
        }
    }

    /// Check if this status means the service can take traffic.
    #[must_use]
    pub const fn is_serving(&self) -> bool {
        matches!(self, Self::Serving)
    }
}

impl std::fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve an optional service name to the name used for lookups.
///
/// A missing name and an empty name both mean the overall process.
#[must_use]
pub fn service_key(service: Option<&str>) -> &str {
    service.unwrap_or(OVERALL_SERVICE)
}

// =============================================================================
// Tests
// =============================================================================
