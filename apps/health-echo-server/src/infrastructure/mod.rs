//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer exposes the application services over gRPC and HTTP and
//! wires up the ambient concerns (configuration, logging, metrics).

/// gRPC frontend: echo and health adapters, call tracing, server lifecycle.
pub mod grpc;

/// Configuration loaded from the environment.
pub mod config;

/// Ops HTTP endpoint (liveness, readiness, health report, metrics).
pub mod ops;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
