//! Install: prime the current cache generation with the asset manifest.
//!
//! All-or-nothing. Entries are fetched and written into a staging instance
//! (`<version>.installing`) that is renamed to the version name only once
//! every manifest entry is in it. One failed or non-2xx fetch fails the whole
//! install; an interrupted install leaves only the staging instance behind,
//! which the next install replaces and the activation sweep removes.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::context::WorkerContext;
use crate::cache::CacheEntry;
use crate::error::WorkerError;
use crate::http::{Request, RequestKey};

const STAGING_SUFFIX: &str = ".installing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_version: String,
    pub cached: usize,
}

pub fn staging_name(version: &str) -> String {
    format!("{}{}", version, STAGING_SUFFIX)
}

pub async fn handle_install(ctx: &WorkerContext) -> Result<InstallReport, WorkerError> {
    let version = ctx.cache_version();
    let staging = staging_name(version);
    if ctx.storage.delete(&staging).await? {
        debug!(cache = %staging, "Removed leftovers of an interrupted install");
    }
    ctx.storage.open(&staging).await?;

    let committed = async {
        let entries = prime(ctx).await?;
        let cached = entries.len();
        ctx.storage.put_all(&staging, entries).await?;
        ctx.storage.rename(&staging, version).await?;
        Ok::<_, WorkerError>(cached)
    }
    .await;

    match committed {
        Ok(cached) => {
            info!(cache = version, entries = cached, "Asset manifest cached");
            Ok(InstallReport {
                cache_version: version.to_string(),
                cached,
            })
        }
        Err(e) => {
            discard(ctx, &staging).await;
            Err(e)
        }
    }
}

/// Whether the current version holds a completed install: the instance
/// exists and every manifest entry is in it.
pub async fn is_installed(ctx: &WorkerContext) -> Result<bool, WorkerError> {
    let version = ctx.cache_version();
    if !ctx.storage.has(version).await? {
        return Ok(false);
    }
    for path in ctx.config.asset_manifest.paths() {
        let key = RequestKey::get(&manifest_url(ctx, path)?);
        if ctx.storage.lookup(version, &key).await?.is_none() {
            warn!(cache = version, path = %path, "Cache is missing a manifest entry");
            return Ok(false);
        }
    }
    Ok(true)
}

fn manifest_url(ctx: &WorkerContext, path: &str) -> Result<url::Url, WorkerError> {
    ctx.config
        .resolve(path)
        .map_err(|e| WorkerError::InvalidRequest(format!("{}: {}", path, e)))
}

/// Fetch every manifest entry concurrently; any failure fails the batch.
async fn prime(ctx: &WorkerContext) -> Result<Vec<CacheEntry>, WorkerError> {
    let mut requests = Vec::with_capacity(ctx.config.asset_manifest.len());
    for path in ctx.config.asset_manifest.paths() {
        requests.push(Request::get(manifest_url(ctx, path)?));
    }

    let fetches = requests.iter().map(|request| async move {
        let response = ctx
            .fetcher
            .fetch(request)
            .await
            .map_err(|e| install_failed(request, e))?;
        if !response.is_ok() {
            let body = String::from_utf8_lossy(&response.body);
            return Err(install_failed(
                request,
                WorkerError::from_status(response.status, &body),
            ));
        }
        Ok::<_, WorkerError>(CacheEntry::new(RequestKey::get(&request.url), response))
    });

    join_all(fetches).await.into_iter().collect()
}

fn install_failed(request: &Request, source: WorkerError) -> WorkerError {
    WorkerError::InstallFailed {
        url: request.url.to_string(),
        source: Box::new(source),
    }
}

async fn discard(ctx: &WorkerContext, staging: &str) {
    if let Err(e) = ctx.storage.delete(staging).await {
        warn!(cache = staging, error = %e, "Failed to remove staging cache after failed install");
    }
}
