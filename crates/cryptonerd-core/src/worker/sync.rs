//! Background sync: tell open pages to refresh once connectivity returns.

use std::sync::Mutex;

use tracing::{debug, info};

use super::context::WorkerContext;
use crate::clients::{ClientMessage, ClientType};
use crate::error::WorkerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    /// Tag not handled by this worker.
    Ignored,
    /// `notified` of `targeted` window clients accepted the message.
    Refreshed { targeted: usize, notified: usize },
}

pub async fn handle_sync(ctx: &WorkerContext, tag: &str) -> Result<SyncReport, WorkerError> {
    if tag != ctx.config.sync_tag {
        debug!(tag, "Ignoring unknown sync tag");
        return Ok(SyncReport::Ignored);
    }

    ctx.sync_work.flush().await?;

    let clients = ctx.clients.match_all(ClientType::Window);
    let targeted = clients.len();
    let notified = clients
        .iter()
        .filter(|client| ctx.clients.post_message(client.id, ClientMessage::Refresh))
        .count();

    info!(tag, targeted, notified, "Background sync complete");
    Ok(SyncReport::Refreshed { targeted, notified })
}

/// Platform side of background sync: tags registered while offline, fired
/// once the network is back.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    pending: Mutex<Vec<String>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an already pending tag is a no-op.
    pub fn register(&self, tag: &str) {
        let mut pending = self.lock();
        if !pending.iter().any(|t| t == tag) {
            debug!(tag, "Background sync registered");
            pending.push(tag.to_string());
        }
    }

    pub fn is_pending(&self, tag: &str) -> bool {
        self.lock().iter().any(|t| t == tag)
    }

    /// Tags to fire now, in registration order.
    pub fn take_pending(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
