//! Server Configuration Settings
//!
//! Configuration types for the server, loaded from environment variables.
//! Malformed numbers and booleans fall back to their defaults; values that
//! parse but make no sense (a zero watch buffer, a zero probe interval, an
//! unparseable bind host) are rejected.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::application::services::MonitorSettings;
use crate::infrastructure::grpc::{GrpcServerSettings, WatchSettings};

/// Listener settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// gRPC bind host.
    pub grpc_host: IpAddr,
    /// gRPC server port.
    pub grpc_port: u16,
    /// Ops HTTP port (0 = disabled).
    pub ops_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            grpc_port: 50051,
            ops_port: 8081,
        }
    }
}

impl ServerSettings {
    /// Socket address the gRPC listener binds.
    #[must_use]
    pub const fn grpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.grpc_host, self.grpc_port)
    }

    /// Whether the ops HTTP server should run.
    #[must_use]
    pub const fn ops_enabled(&self) -> bool {
        self.ops_port != 0
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// gRPC frontend settings.
    pub grpc: GrpcServerSettings,
    /// Health monitor timing.
    pub monitor: MonitorSettings,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds a semantically invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a key holds a semantically invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let grpc_host: IpAddr = match lookup("HEALTH_ECHO_GRPC_HOST") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "HEALTH_ECHO_GRPC_HOST".to_string(),
                    value: raw.clone(),
                })?,
            None => defaults.server.grpc_host,
        };

        let server = ServerSettings {
            grpc_host,
            grpc_port: parse_u16(&lookup, "HEALTH_ECHO_GRPC_PORT", defaults.server.grpc_port),
            ops_port: parse_u16(&lookup, "HEALTH_ECHO_OPS_PORT", defaults.server.ops_port),
        };

        let watch_buffer = parse_usize(
            &lookup,
            "HEALTH_ECHO_WATCH_BUFFER",
            defaults.grpc.watch.buffer,
        );
        if watch_buffer == 0 {
            return Err(ConfigError::MustBePositive(
                "HEALTH_ECHO_WATCH_BUFFER".to_string(),
            ));
        }

        let grpc = GrpcServerSettings {
            reflection: parse_bool(&lookup, "HEALTH_ECHO_REFLECTION", defaults.grpc.reflection),
            trace_health_checks: parse_bool(
                &lookup,
                "HEALTH_ECHO_TRACE_HEALTH_CHECKS",
                defaults.grpc.trace_health_checks,
            ),
            watch: WatchSettings {
                buffer: watch_buffer,
            },
        };

        let monitor = MonitorSettings {
            probe_interval: parse_duration_millis(
                &lookup,
                "HEALTH_ECHO_PROBE_INTERVAL_MS",
                defaults.monitor.probe_interval,
            ),
            probe_timeout: parse_duration_millis(
                &lookup,
                "HEALTH_ECHO_PROBE_TIMEOUT_MS",
                defaults.monitor.probe_timeout,
            ),
        };
        if monitor.probe_interval.is_zero() {
            return Err(ConfigError::MustBePositive(
                "HEALTH_ECHO_PROBE_INTERVAL_MS".to_string(),
            ));
        }

        Ok(Self {
            server,
            grpc,
            monitor,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variable holds a value that cannot be used.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Variable must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    MustBePositive(String),
}

fn parse_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key)
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
