//! Online/offline tracking for the page.
//!
//! Going offline registers the background-sync tag; coming back online
//! hands the pending tags to the caller, which fires them at the worker.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::worker::SyncRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    Online,
    Offline,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

pub struct ConnectivityMonitor {
    tx: watch::Sender<Connectivity>,
    sync: Arc<SyncRegistry>,
    sync_tag: String,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity, sync: Arc<SyncRegistry>, sync_tag: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx,
            sync,
            sync_tag: sync_tag.into(),
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }

    /// Record the latest check. Returns the sync tags to fire when this
    /// call moved the page from offline to online, otherwise nothing.
    pub fn set(&self, next: Connectivity) -> Vec<String> {
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if !changed {
            return Vec::new();
        }

        info!(state = %next, "Connectivity changed");
        match next {
            Connectivity::Offline => {
                self.sync.register(&self.sync_tag);
                Vec::new()
            }
            Connectivity::Online => self.sync.take_pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> (ConnectivityMonitor, Arc<SyncRegistry>) {
        let registry = Arc::new(SyncRegistry::new());
        let monitor = ConnectivityMonitor::new(Connectivity::Online, registry.clone(), "sync-favorites");
        (monitor, registry)
    }

    #[test]
    fn test_offline_registers_sync() {
        let (monitor, registry) = monitor();
        assert!(monitor.set(Connectivity::Offline).is_empty());
        assert!(registry.is_pending("sync-favorites"));
        assert_eq!(monitor.current(), Connectivity::Offline);
    }

    #[test]
    fn test_reconnect_fires_pending_once() {
        let (monitor, registry) = monitor();
        monitor.set(Connectivity::Offline);
        monitor.set(Connectivity::Offline);

        assert_eq!(monitor.set(Connectivity::Online), vec!["sync-favorites"]);
        assert!(monitor.set(Connectivity::Online).is_empty());
        assert!(!registry.is_pending("sync-favorites"));
    }

    #[test]
    fn test_staying_online_fires_nothing() {
        let (monitor, _) = monitor();
        assert!(monitor.set(Connectivity::Online).is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let (monitor, _) = monitor();
        let mut rx = monitor.subscribe();
        monitor.set(Connectivity::Offline);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Connectivity::Offline);
    }
}
