//! Pages controlled by the worker.
//!
//! Each open page gets an unbounded message channel. Delivery is
//! best-effort: a page that has dropped its receiver just misses the message.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    /// Matches every type in `match_all`.
    All,
}

/// Messages the worker posts to its pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Re-run the page's data refresh routine.
    Refresh,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: Url,
    pub client_type: ClientType,
    pub controlled: bool,
}

struct ClientSlot {
    info: ClientInfo,
    tx: mpsc::UnboundedSender<ClientMessage>,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ClientId, ClientSlot>>,
    next_id: AtomicU64,
    /// Set once the worker has claimed its pages; later pages start controlled.
    claimed: AtomicBool,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly opened page and hand back its message receiver.
    pub fn open(
        &self,
        url: Url,
        client_type: ClientType,
    ) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let info = ClientInfo {
            id,
            url,
            client_type,
            controlled: self.claimed.load(Ordering::SeqCst),
        };
        self.lock().insert(id, ClientSlot { info, tx });
        (id, rx)
    }

    pub fn close(&self, id: ClientId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Take control of every open page without waiting for a reload.
    pub fn claim(&self) -> usize {
        self.claimed.store(true, Ordering::SeqCst);
        let mut clients = self.lock();
        for slot in clients.values_mut() {
            slot.info.controlled = true;
        }
        clients.len()
    }

    /// Controlled clients of the given type, in id order.
    pub fn match_all(&self, client_type: ClientType) -> Vec<ClientInfo> {
        self.lock()
            .values()
            .filter(|slot| slot.info.controlled)
            .filter(|slot| client_type == ClientType::All || slot.info.client_type == client_type)
            .map(|slot| slot.info.clone())
            .collect()
    }

    /// Returns false when the client is gone or no longer listening.
    pub fn post_message(&self, id: ClientId, message: ClientMessage) -> bool {
        let clients = self.lock();
        let Some(slot) = clients.get(&id) else {
            debug!(client = %id, "Message target no longer open");
            return false;
        };
        match slot.tx.send(message) {
            Ok(()) => true,
            Err(_) => {
                debug!(client = %id, "Client is not listening, message dropped");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ClientId, ClientSlot>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
