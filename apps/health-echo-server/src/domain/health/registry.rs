//! Health Status Registry
//!
//! Authoritative holder of per-service serving status.
//!
//! # Design
//!
//! Each service name maps to a `tokio::sync::watch` sender holding the
//! current status. Writes go through [`HealthRegistry::set_status`], which
//! only notifies receivers when the stored value actually changes, so every
//! subscriber observes the same sequence of transitions.
//!
//! A [`StatusSubscription`] remembers the last status it handed out and only
//! yields a new value when the published status differs from it. If a status
//! flips and flips back before the subscriber looks, the subscriber sees
//! nothing: it was never told about the intermediate value.
//!
//! Watching a name nobody has set creates a placeholder entry so that a later
//! registration reaches the watcher. Placeholders stay `UNKNOWN`, are skipped
//! by [`HealthRegistry::set_all`] and [`HealthRegistry::snapshot`], and are
//! removed when their last subscription is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::watch;

use super::ServingStatus;

type ServiceMap = HashMap<String, ServiceEntry>;

#[derive(Debug)]
struct ServiceEntry {
    tx: watch::Sender<ServingStatus>,
    /// Set once the name has been given a status through `set_status`.
    registered: bool,
}

impl ServiceEntry {
    fn placeholder() -> Self {
        Self {
            tx: watch::Sender::new(ServingStatus::Unknown),
            registered: false,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Per-service health status with change notification.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    services: Arc<RwLock<ServiceMap>>,
}

impl HealthRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status of a service, registering it if needed.
    ///
    /// Returns `true` if the stored status changed (and subscribers were
    /// notified), `false` if it already had this value.
    pub fn set_status(&self, service: &str, status: ServingStatus) -> bool {
        {
            let services = self.services.read();
            if let Some(entry) = services.get(service).filter(|e| e.registered) {
                return publish(&entry.tx, status);
            }
        }

        let mut services = self.services.write();
        let entry = services
            .entry(service.to_string())
            .or_insert_with(ServiceEntry::placeholder);
        entry.registered = true;
        publish(&entry.tx, status)
    }

    /// Apply one status to every registered service.
    ///
    /// Returns the number of services whose status changed.
    pub fn set_all(&self, status: ServingStatus) -> usize {
        self.services
            .read()
            .values()
            .filter(|e| e.registered)
            .filter(|e| publish(&e.tx, status))
            .count()
    }

    /// Get the current status of a service.
    ///
    /// Unregistered services report [`ServingStatus::Unknown`].
    #[must_use]
    pub fn check(&self, service: &str) -> ServingStatus {
        self.services
            .read()
            .get(service)
            .filter(|e| e.registered)
            .map_or(ServingStatus::Unknown, |e| *e.tx.borrow())
    }

    /// Open a subscription to a service's status.
    ///
    /// Subscribing to an unregistered name starts it at
    /// [`ServingStatus::Unknown`]; a later [`set_status`](Self::set_status)
    /// for that name reaches the subscriber.
    #[must_use]
    pub fn subscribe(&self, service: &str) -> StatusSubscription {
        let rx = {
            let services = self.services.read();
            services.get(service).map(|e| e.tx.subscribe())
        };

        let rx = rx.unwrap_or_else(|| {
            self.services
                .write()
                .entry(service.to_string())
                .or_insert_with(ServiceEntry::placeholder)
                .tx
                .subscribe()
        });

        StatusSubscription {
            service: service.to_string(),
            rx,
            last_delivered: None,
            services: Arc::downgrade(&self.services),
        }
    }

    /// Snapshot of every registered service and its status.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ServingStatus> {
        self.services
            .read()
            .iter()
            .filter(|(_, e)| e.registered)
            .map(|(name, e)| (name.clone(), *e.tx.borrow()))
            .collect()
    }

    /// Number of live subscriptions across all services.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.services
            .read()
            .values()
            .map(|e| e.tx.receiver_count())
            .sum()
    }
}

fn publish(tx: &watch::Sender<ServingStatus>, status: ServingStatus) -> bool {
    tx.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    })
}

// =============================================================================
// Subscription
// =============================================================================

/// One watcher's view of a service's status.
#[derive(Debug)]
pub struct StatusSubscription {
    service: String,
    rx: watch::Receiver<ServingStatus>,
    last_delivered: Option<ServingStatus>,
    services: Weak<RwLock<ServiceMap>>,
}

impl StatusSubscription {
    /// Wait for the next status this subscriber has not yet seen.
    ///
    /// The first call resolves immediately with the current status. Later
    /// calls resolve only when the published status differs from the last
    /// one returned. Returns `None` once the registry has been dropped.
    ///
    /// Cancel-safe: dropping the future loses no transition.
    pub async fn next_transition(&mut self) -> Option<ServingStatus> {
        loop {
            if self.last_delivered.is_some() {
                self.rx.changed().await.ok()?;
            }

            let current = *self.rx.borrow_and_update();
            if self.last_delivered != Some(current) {
                self.last_delivered = Some(current);
                return Some(current);
            }
        }
    }

    /// Service name this subscription watches.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Last status returned by [`next_transition`](Self::next_transition).
    #[must_use]
    pub const fn last_delivered(&self) -> Option<ServingStatus> {
        self.last_delivered
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        let Some(services) = self.services.upgrade() else {
            return;
        };

        // Our own receiver is still alive here, so a count of one means last.
        let mut services = services.write();
        if services
            .get(&self.service)
            .is_some_and(|e| !e.registered && e.tx.receiver_count() <= 1)
        {
            services.remove(&self.service);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
