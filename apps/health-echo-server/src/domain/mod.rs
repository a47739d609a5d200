//! Domain Layer - Core health types and state.
//!
//! This layer contains the health status model and the authoritative
//! status registry. Nothing here knows about gRPC or HTTP.

/// Health status values, the status registry and per-watcher subscriptions.
pub mod health;
