//! Application Services
//!
//! Services that orchestrate domain logic independently of the transport.
//!
//! - `EchoService`: identity over an opaque message
//! - `HealthService`: point-in-time checks and change-driven subscriptions
//! - `HealthMonitor`: periodic evaluation of bound `HealthProbe`s

mod echo;
mod health;
mod monitor;

pub use echo::{EchoMessage, EchoService};
pub use health::HealthService;
pub use monitor::{HealthMonitor, MonitorSettings};
