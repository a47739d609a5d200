//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the transport-agnostic services (echo, health
//! check/watch, health monitoring) and the port through which external
//! health evaluators plug in.

/// Port interfaces for external health evaluators.
pub mod ports;

/// Application services for echo, health queries and health monitoring.
pub mod services;
