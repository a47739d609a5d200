//! Configuration Module
//!
//! Configuration loading for the server process.

mod settings;

pub use settings::{ConfigError, ServerConfig, ServerSettings};
