//! Health Monitor
//!
//! Periodically evaluates bound [`HealthProbe`]s and writes the results into
//! the [`HealthRegistry`]. This is the only writer of probe-driven status;
//! watchers see a transition only when a probe result differs from the
//! stored value.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;

use crate::application::ports::HealthProbe;
use crate::domain::health::{HealthRegistry, ServingStatus};

/// Monitor timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Time between evaluation rounds.
    pub probe_interval: Duration,
    /// Upper bound for a single probe call. Exceeding it counts as
    /// `NotServing`.
    pub probe_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(1),
        }
    }
}

struct ProbeBinding {
    service: String,
    probe: Arc<dyn HealthProbe>,
}

/// Drives registry status from health probes.
pub struct HealthMonitor {
    registry: Arc<HealthRegistry>,
    settings: MonitorSettings,
    bindings: Vec<ProbeBinding>,
}

impl HealthMonitor {
    /// Create a monitor with no probes bound.
    #[must_use]
    pub const fn new(registry: Arc<HealthRegistry>, settings: MonitorSettings) -> Self {
        Self {
            registry,
            settings,
            bindings: Vec::new(),
        }
    }

    /// Bind a probe to a service name.
    #[must_use]
    pub fn with_probe(mut self, service: impl Into<String>, probe: Arc<dyn HealthProbe>) -> Self {
        self.bindings.push(ProbeBinding {
            service: service.into(),
            probe,
        });
        self
    }

    /// Number of bound probes.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.bindings.len()
    }

    /// Run one evaluation round over all probes concurrently.
    ///
    /// Returns the number of services whose status changed.
    pub async fn evaluate(&self) -> usize {
        let probe_timeout = self.settings.probe_timeout;
        let results = join_all(self.bindings.iter().map(|binding| async move {
            let status = timeout(probe_timeout, binding.probe.probe())
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!(
                        service = %binding.service,
                        timeout_ms = probe_timeout.as_millis(),
                        "Health probe timed out"
                    );
                    ServingStatus::NotServing
                });
            (binding, status)
        }))
        .await;

        let mut changed = 0;
        for (binding, status) in results {
            if self.registry.set_status(&binding.service, status) {
                changed += 1;
                tracing::info!(service = %binding.service, status = %status, "Health status changed");
            }
        }
        changed
    }

    /// Evaluate probes every `probe_interval` until cancelled.
    ///
    /// Returns immediately when no probes are bound.
    pub async fn run(self, cancel: CancellationToken) {
        if self.bindings.is_empty() {
            tracing::debug!("No health probes bound, monitor idle");
            return;
        }

        tracing::info!(
            probes = self.bindings.len(),
            interval_ms = self.settings.probe_interval.as_millis(),
            "Health monitor started"
        );

        let mut ticker = tokio::time::interval(self.settings.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.evaluate().await;
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
