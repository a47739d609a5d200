//! gRPC Server
//!
//! Exposes the echo and health services over a single listener.
//!
//! # Architecture
//!
//! - `echo`: `grpc.examples.echo.Echo` adapter over `EchoService`
//! - `health`: `grpc.health.v1.Health` adapter over `HealthService`; each
//!   `Watch` call runs one delivery task that pushes transitions into the
//!   response stream until the client leaves or the server shuts down
//! - `trace`: tower layer that observes every call boundary
//! - `server`: listener binding, service registration, reflection, serving

pub mod echo;
pub mod health;
pub mod server;
pub mod trace;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod grpc {
        pub mod health {
            pub mod v1 {
                include!(concat!(env!("OUT_DIR"), "/grpc.health.v1.rs"));
            }
        }

        pub mod examples {
            pub mod echo {
                include!(concat!(env!("OUT_DIR"), "/grpc.examples.echo.rs"));
            }
        }
    }

    /// Encoded descriptor set for every compiled proto, served by reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/health_echo_descriptor.pb"));
}

pub use echo::EchoGrpcService;
pub use health::{HealthGrpcService, WatchSettings};
pub use server::{
    ECHO_SERVICE_NAME, GrpcServer, GrpcServerSettings, HEALTH_SERVICE_NAME, ServerError,
    bind_listener, seed_registry,
};
pub use trace::{CallTraceLayer, CallTraceService, TracedBody};
