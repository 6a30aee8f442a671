//! Connectivity monitor.
//!
//! Holds the current online/offline flag. The host platform (or the health
//! probe below) reports changes; the repository and sync worker read it and
//! the worker wakes up as soon as the device comes back online.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::gateway::RemoteGateway;

#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates the flag. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn went_online(&self) -> bool {
        self.set_online(true)
    }

    pub fn went_offline(&self) -> bool {
        self.set_online(false)
    }

    /// Receiver notified on every change of the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Polls `gateway.health()` every `interval` and updates the flag.
    ///
    /// For hosts without a platform connectivity signal. The probe stops
    /// when the returned handle is dropped.
    pub fn spawn_probe(&self, gateway: Arc<dyn RemoteGateway>, interval: Duration) -> ProbeHandle {
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let healthy = gateway.health().await;
                debug!(healthy, "Health probe");
                monitor.set_online(healthy);
            }
        });
        ProbeHandle { task }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Running health probe. Aborted on drop.
pub struct ProbeHandle {
    task: JoinHandle<()>,
}

impl ProbeHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGateway;

    #[test]
    fn test_set_online_reports_changes() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());
        assert!(monitor.went_online());
        assert!(!monitor.went_online());
        assert!(monitor.is_online());
        assert!(monitor.went_offline());
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        monitor.went_online();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let monitor = ConnectivityMonitor::new(false);
        let clone = monitor.clone();
        clone.went_online();
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_follows_gateway_health() {
        let gateway = Arc::new(FakeGateway::new());
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        let _probe = monitor.spawn_probe(gateway.clone(), Duration::from_secs(15));

        rx.changed().await.unwrap();
        assert!(monitor.is_online());

        gateway.set_healthy(false);
        rx.changed().await.unwrap();
        assert!(!monitor.is_online());
    }
}
