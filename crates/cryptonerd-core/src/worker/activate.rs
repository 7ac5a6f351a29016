//! Activate: sweep stale cache generations, then claim open pages.

use futures::future::join_all;
use tracing::{debug, info};

use super::context::WorkerContext;
use crate::error::WorkerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub removed: Vec<String>,
    pub claimed: usize,
}

pub async fn handle_activate(ctx: &WorkerContext) -> Result<ActivationReport, WorkerError> {
    let removed = sweep_stale_caches(ctx).await?;
    let claimed = ctx.clients.claim();
    info!(removed = removed.len(), claimed, "Worker activated");
    Ok(ActivationReport { removed, claimed })
}

/// Delete every cache instance not named by the current version. All
/// deletions are awaited before returning.
pub async fn sweep_stale_caches(ctx: &WorkerContext) -> Result<Vec<String>, WorkerError> {
    let current = ctx.cache_version();
    let stale: Vec<String> = ctx
        .storage
        .keys()
        .await?
        .into_iter()
        .filter(|name| name != current)
        .collect();

    let deletions = stale.iter().map(|name| async move {
        let deleted = ctx.storage.delete(name).await?;
        debug!(cache = %name, deleted, "Swept stale cache");
        Ok::<_, WorkerError>(name.clone())
    });

    join_all(deletions).await.into_iter().collect()
}
