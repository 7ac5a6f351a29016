//! Fetch interception.
//!
//! Every request from a controlled page lands here and is classified into
//! exactly one strategy, checked in this order:
//!
//! 1. cross-origin: not intercepted at all
//! 2. navigation / HTML: network-first, offline page on failure
//! 3. same-origin API: network-only, cache fallback, never written to cache
//! 4. anything else same-origin: cache-first with background fill

use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, warn};

use super::context::WorkerContext;
use crate::cache::{CacheEntry, CacheStorage};
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::http::{Request, RequestKey, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Left to the platform's default network handling.
    Passthrough,
    Navigation,
    Api,
    StaticAsset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchDisposition {
    Passthrough,
    Respond(Response),
}

impl FetchDisposition {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchDisposition::Respond(response) => Some(response),
            FetchDisposition::Passthrough => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchDisposition::Respond(response) => Some(response),
            FetchDisposition::Passthrough => None,
        }
    }
}

pub fn classify(config: &WorkerConfig, request: &Request) -> Route {
    if !config.is_same_origin(&request.url) {
        return Route::Passthrough;
    }
    if request.is_navigation() || (request.method == Method::GET && request.accepts_html()) {
        Route::Navigation
    } else if request.url.path().starts_with(&config.api_prefix) {
        Route::Api
    } else {
        Route::StaticAsset
    }
}

pub async fn handle_fetch(
    ctx: &WorkerContext,
    request: Request,
) -> Result<FetchDisposition, WorkerError> {
    let route = classify(&ctx.config, &request);
    debug!(url = %request.url, method = %request.method, ?route, "Routing request");

    let response = match route {
        Route::Passthrough => return Ok(FetchDisposition::Passthrough),
        Route::Navigation => network_first(ctx, &request).await?,
        Route::Api => network_with_cache_fallback(ctx, &request).await?,
        Route::StaticAsset => cache_first(ctx, &request).await?,
    };
    Ok(FetchDisposition::Respond(response))
}

/// Navigations are never cached; the offline page stands in when the
/// network is unreachable.
async fn network_first(ctx: &WorkerContext, request: &Request) -> Result<Response, WorkerError> {
    match ctx.fetcher.fetch(request).await {
        Ok(response) => Ok(response),
        Err(e) => {
            debug!(url = %request.url, error = %e, "Navigation failed, serving offline page");
            let offline = offline_page_key(&ctx.config)?;
            match cached(ctx, &offline).await {
                Some(entry) => Ok(entry.to_response()),
                None => Err(WorkerError::OfflinePageMissing(ctx.config.offline_page.clone())),
            }
        }
    }
}

/// API responses may be per-session and go stale quickly, so they are read
/// from the cache only as a last resort and never written to it.
async fn network_with_cache_fallback(
    ctx: &WorkerContext,
    request: &Request,
) -> Result<Response, WorkerError> {
    match ctx.fetcher.fetch(request).await {
        Ok(response) => Ok(response),
        Err(e) => {
            debug!(url = %request.url, error = %e, "API request failed, trying cache");
            let key = request.key();
            match cached(ctx, &key).await {
                Some(entry) => Ok(entry.to_response()),
                None => Err(WorkerError::CacheMiss(key)),
            }
        }
    }
}

async fn cache_first(ctx: &WorkerContext, request: &Request) -> Result<Response, WorkerError> {
    let key = request.key();
    if key.is_cacheable() {
        if let Some(entry) = cached(ctx, &key).await {
            debug!(key = %key, "Cache hit");
            return Ok(entry.to_response());
        }
    }

    match ctx.fetcher.fetch(request).await {
        Ok(response) => {
            if key.is_cacheable() && response.is_cacheable() {
                fill_in_background(ctx, key, response.clone());
            }
            Ok(response)
        }
        Err(e) if is_image(&ctx.config, request) => {
            debug!(url = %request.url, error = %e, "Image fetch failed, using fallback icon");
            let icon = RequestKey::get(&resolve(&ctx.config, &ctx.config.fallback_icon)?);
            match cached(ctx, &icon).await {
                Some(entry) => Ok(entry.to_response()),
                None => Err(WorkerError::CacheMiss(icon)),
            }
        }
        Err(e) => Err(e),
    }
}

fn fill_in_background(ctx: &WorkerContext, key: RequestKey, response: Response) {
    let storage: Arc<dyn CacheStorage> = Arc::clone(&ctx.storage);
    let version = ctx.config.cache_version.clone();
    let label = format!("cache-fill {}", key);
    ctx.tasks.spawn(label, async move {
        storage.put(&version, CacheEntry::new(key, response)).await
    });
}

/// Only the current generation is consulted. Lookup failures count as misses.
async fn cached(ctx: &WorkerContext, key: &RequestKey) -> Option<CacheEntry> {
    match ctx.storage.lookup(ctx.cache_version(), key).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
            None
        }
    }
}

fn offline_page_key(config: &WorkerConfig) -> Result<RequestKey, WorkerError> {
    Ok(RequestKey::get(&resolve(config, &config.offline_page)?))
}

fn resolve(config: &WorkerConfig, path: &str) -> Result<url::Url, WorkerError> {
    config
        .resolve(path)
        .map_err(|e| WorkerError::InvalidRequest(format!("{}: {}", path, e)))
}

fn is_image(config: &WorkerConfig, request: &Request) -> bool {
    let path = request.url.path();
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((_, ext)) => config
            .image_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn config() -> WorkerConfig {
        WorkerConfig::default()
            .with_origin("https://crypto.example")
            .unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_classify_navigation() {
        let config = config();
        let nav = Request::navigate(url("https://crypto.example/coins"));
        assert_eq!(classify(&config, &nav), Route::Navigation);

        let html = Request::get(url("https://crypto.example/offline")).with_header("accept", "text/html");
        assert_eq!(classify(&config, &html), Route::Navigation);
    }

    #[test]
    fn test_html_accept_wins_over_api_prefix() {
        let config = config();
        let request = Request::get(url("https://crypto.example/api/proxy"))
            .with_header("accept", "text/html");
        assert_eq!(classify(&config, &request), Route::Navigation);
    }

    #[test]
    fn test_non_get_with_html_accept_is_not_navigation() {
        let config = config();
        let request = Request::get(url("https://crypto.example/api/proxy"))
            .with_method(Method::POST)
            .with_header("accept", "text/html");
        assert_eq!(classify(&config, &request), Route::Api);
    }

    #[test]
    fn test_classify_api_and_static() {
        let config = config();
        let api = Request::get(url(
            "https://crypto.example/api/proxy?endpoint=/v1/cryptocurrency/listings/latest",
        ))
        .with_header("accept", "application/json");
        assert_eq!(classify(&config, &api), Route::Api);

        // Missing Accept header falls through on origin/path alone
        let asset = Request::get(url("https://crypto.example/_next/static/app.js"));
        assert_eq!(classify(&config, &asset), Route::StaticAsset);

        // "/api" without the trailing slash is not the API prefix
        let lookalike = Request::get(url("https://crypto.example/apiary.png"));
        assert_eq!(classify(&config, &lookalike), Route::StaticAsset);
    }

    #[test]
    fn test_cross_origin_passthrough() {
        let config = config();
        let upstream = Request::get(url("https://pro-api.coinmarketcap.com/v1/x"));
        assert_eq!(classify(&config, &upstream), Route::Passthrough);

        let nav = Request::navigate(url("https://www.tradingview.com/"));
        assert_eq!(classify(&config, &nav), Route::Passthrough);
    }

    #[test]
    fn test_is_image() {
        let config = config();
        let check = |s: &str| is_image(&config, &Request::get(url(s)));
        assert!(check("https://crypto.example/icons/btc.png"));
        assert!(check("https://crypto.example/logo.SVG"));
        assert!(check("https://crypto.example/photo.jpeg?v=3"));
        assert!(!check("https://crypto.example/app.js"));
        assert!(!check("https://crypto.example/png"));
        assert!(!check("https://crypto.example/images.png/"));
    }
}
