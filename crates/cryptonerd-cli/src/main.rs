//! cryptonerd - command-line driver for the CryptoNerd offline worker.
//!
//! Runs the caching worker against a dashboard origin: install its asset
//! manifest, route individual requests through it, inspect the on-disk
//! cache, and run a page client that keeps favorites fresh across network
//! drops.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cryptonerd_core::cache::{CacheStorage, DiskCacheStorage};
use cryptonerd_core::clients::ClientType;
use cryptonerd_core::config::WorkerConfig;
use cryptonerd_core::error::WorkerError;
use cryptonerd_core::http::{Request, Response};
use cryptonerd_core::net::{Fetcher, HttpFetcher};
use cryptonerd_core::page::{
    Connectivity, ConnectivityMonitor, FavoritesStore, PageClient, RefreshKind, RefreshSchedule,
    Refresher,
};
use cryptonerd_core::worker::activate::sweep_stale_caches;
use cryptonerd_core::worker::{
    FetchDisposition, LifecycleState, ServiceWorker, SyncRegistry, WorkerContext,
};

// ============================================================================
// Constants
// ============================================================================

/// Environment override for the dashboard origin
const ORIGIN_ENV: &str = "CRYPTONERD_ORIGIN";

/// Environment override for the cache store root
const CACHE_DIR_ENV: &str = "CRYPTONERD_CACHE_DIR";

/// Default seconds between connectivity checks in `watch`
const DEFAULT_CHECK_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "cryptonerd", version, about = "Offline caching worker for the CryptoNerd dashboard")]
struct Cli {
    /// Dashboard origin, e.g. https://cryptonerd.example
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Root directory of the cache store
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install the asset manifest and activate the current cache version
    Install,
    /// Route one request through the worker
    Fetch {
        /// Origin-relative path, e.g. /api/proxy?endpoint=/v1/global-metrics/quotes/latest
        path: String,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
        /// Accept header to send
        #[arg(long)]
        accept: Option<String>,
    },
    /// List cache instances with entry counts and ages
    Caches,
    /// Delete every cache instance except the current version
    Sweep,
    /// Manage favorite coins
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
    /// Run a page client: scheduled refreshes, connectivity checks and
    /// background sync on reconnect
    Watch {
        /// Seconds between connectivity checks
        #[arg(long, default_value_t = DEFAULT_CHECK_SECS)]
        check_secs: u64,
    },
}

#[derive(Subcommand)]
enum FavoritesAction {
    List,
    Add { symbol: String },
    Remove { symbol: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    if let Command::Favorites { action } = &cli.command {
        return favorites(action);
    }

    let config = load_config(cli.origin.as_deref())?;
    let cache_dir = match cli.cache_dir.or_else(|| std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from)) {
        Some(dir) => dir,
        None => WorkerConfig::cache_dir()?,
    };
    debug!(origin = %config.origin, cache_dir = %cache_dir.display(), "Starting worker");

    let storage = Arc::new(DiskCacheStorage::new(cache_dir)?);
    let fetcher = Arc::new(HttpFetcher::new(config.origin.clone())?);
    let ctx = WorkerContext::new(config, storage, fetcher);
    let worker = ServiceWorker::resume(ctx).await?;

    match cli.command {
        Command::Install => install(&worker).await,
        Command::Fetch { path, navigate, accept } => {
            fetch(&worker, &path, navigate, accept.as_deref()).await
        }
        Command::Caches => caches(&worker).await,
        Command::Sweep => sweep(&worker).await,
        Command::Watch { check_secs } => watch_page(Arc::new(worker), check_secs).await,
        Command::Favorites { .. } => Ok(()),
    }
}

/// File config, then environment, then command line.
fn load_config(origin: Option<&str>) -> Result<WorkerConfig> {
    let mut config = WorkerConfig::load()?;
    if let Ok(env_origin) = std::env::var(ORIGIN_ENV) {
        config = config.with_origin(&env_origin)?;
    }
    if let Some(origin) = origin {
        config = config.with_origin(origin)?;
    }
    Ok(config)
}

async fn install(worker: &ServiceWorker) -> Result<()> {
    match worker.state() {
        LifecycleState::Active => {
            println!("{} already installed and active", worker.context().cache_version());
            return Ok(());
        }
        LifecycleState::Waiting => {
            // Installed earlier but stale generations could not be swept
            let activated = worker.on_activate().await?;
            println!(
                "{} already installed, removed {} stale cache(s)",
                worker.context().cache_version(),
                activated.removed.len()
            );
            return Ok(());
        }
        _ => {}
    }
    let (installed, activated) = worker.start().await?;
    println!(
        "Installed {} ({} entries), removed {} stale cache(s)",
        installed.cache_version,
        installed.cached,
        activated.removed.len()
    );
    Ok(())
}

async fn fetch(worker: &ServiceWorker, path: &str, navigate: bool, accept: Option<&str>) -> Result<()> {
    let ctx = worker.context();
    let url = ctx
        .config
        .resolve(path)
        .with_context(|| format!("Invalid path: {}", path))?;
    let mut request = if navigate { Request::navigate(url) } else { Request::get(url) };
    if let Some(accept) = accept {
        request = request.with_header("accept", accept);
    }

    let (response, source) = match worker.on_fetch(request.clone()).await? {
        FetchDisposition::Respond(response) => {
            let source = if response.from_cache { "cache" } else { "network" };
            (response, source)
        }
        FetchDisposition::Passthrough => (ctx.fetcher.fetch(&request).await?, "passthrough"),
    };
    print_response(&response, source);

    // Let any cache fill finish before the process exits
    ctx.tasks.settle().await;
    report_task_failures(worker);
    Ok(())
}

fn print_response(response: &Response, source: &str) {
    println!(
        "{} {}  source={}  {} bytes",
        response.status,
        response.status_text,
        source,
        response.body.len()
    );
    if let Some(content_type) = response.header("content-type") {
        println!("content-type: {}", content_type);
    }
}

async fn caches(worker: &ServiceWorker) -> Result<()> {
    let ctx = worker.context();
    let names = ctx.storage.keys().await?;
    if names.is_empty() {
        println!("No cache instances");
        return Ok(());
    }
    for name in names {
        let entries = ctx.storage.entries(&name).await?;
        let newest = entries.iter().max_by_key(|entry| entry.stored_at);
        let marker = if name == ctx.cache_version() { "*" } else { " " };
        println!(
            "{} {:<24} {:>5} entries  updated {}",
            marker,
            name,
            entries.len(),
            newest.map(|entry| entry.age_display()).unwrap_or_else(|| "never".to_string())
        );
    }
    Ok(())
}

async fn sweep(worker: &ServiceWorker) -> Result<()> {
    let removed = sweep_stale_caches(worker.context()).await?;
    if removed.is_empty() {
        println!("Nothing to sweep");
    } else {
        for name in removed {
            println!("Removed {}", name);
        }
    }
    Ok(())
}

fn favorites(action: &FavoritesAction) -> Result<()> {
    let mut store = FavoritesStore::open_default()?;
    match action {
        FavoritesAction::List => {
            if store.is_empty() {
                println!("No favorites");
            }
            for symbol in store.symbols() {
                println!("{}", symbol);
            }
            return Ok(());
        }
        FavoritesAction::Add { symbol } => {
            if !store.add(symbol) {
                println!("{} is already a favorite", symbol.to_ascii_uppercase());
                return Ok(());
            }
        }
        FavoritesAction::Remove { symbol } => {
            if !store.remove(symbol) {
                println!("{} is not a favorite", symbol.to_ascii_uppercase());
                return Ok(());
            }
        }
    }
    store.save()?;
    println!("Saved {}", store.path().display());
    Ok(())
}

// ============================================================================
// Page client
// ============================================================================

/// Refreshes dashboard data by routing API requests through the worker,
/// the way the dashboard page does.
struct DashboardRefresher {
    worker: Arc<ServiceWorker>,
    favorites: Mutex<FavoritesStore>,
}

impl DashboardRefresher {
    async fn request(&self, path: &str) -> Result<Response, WorkerError> {
        let url = self
            .worker
            .context()
            .config
            .resolve(path)
            .map_err(|e| WorkerError::InvalidRequest(e.to_string()))?;
        let request = Request::get(url).with_header("accept", "application/json");
        let response = match self.worker.on_fetch(request.clone()).await? {
            FetchDisposition::Respond(response) => response,
            FetchDisposition::Passthrough => self.worker.context().fetcher.fetch(&request).await?,
        };
        if !response.is_ok() {
            let body = String::from_utf8_lossy(&response.body);
            return Err(WorkerError::from_status(response.status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl Refresher for DashboardRefresher {
    async fn refresh(&self, kind: RefreshKind) -> Result<(), WorkerError> {
        let path = match kind {
            RefreshKind::Favorites => {
                let mut favorites = self.favorites.lock().await;
                // Pick up edits made by `favorites add/remove` while running
                *favorites = FavoritesStore::load(favorites.path().to_path_buf());
                if favorites.is_empty() {
                    debug!("No favorites to refresh");
                    return Ok(());
                }
                format!(
                    "/api/proxy?endpoint=/v2/cryptocurrency/quotes/latest&symbol={}",
                    favorites.symbols().join(",")
                )
            }
            RefreshKind::Global => "/api/proxy?endpoint=/v1/global-metrics/quotes/latest".to_string(),
        };

        let response = self.request(&path).await?;
        let data: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| WorkerError::InvalidResponse(e.to_string()))?;
        info!(
            ?kind,
            from_cache = response.from_cache,
            fields = data.as_object().map(|o| o.len()).unwrap_or(0),
            "Dashboard data refreshed"
        );
        Ok(())
    }
}

/// A successful fetch of the origin root means the dashboard is reachable.
async fn check_connectivity(ctx: &WorkerContext) -> Connectivity {
    match ctx.fetcher.fetch(&Request::get(ctx.config.origin.clone())).await {
        Ok(_) => Connectivity::Online,
        Err(e) => {
            debug!(error = %e, "Connectivity check failed");
            Connectivity::Offline
        }
    }
}

async fn watch_page(worker: Arc<ServiceWorker>, check_secs: u64) -> Result<()> {
    if !worker.state().is_active() {
        warn!("Worker is not installed; run `cryptonerd install` first. Requests will bypass the cache");
    }
    let ctx = Arc::clone(worker.context());

    let (page_id, messages) = ctx.clients.open(ctx.config.origin.clone(), ClientType::Window);
    let refresher = DashboardRefresher {
        worker: Arc::clone(&worker),
        favorites: Mutex::new(FavoritesStore::open_default()?),
    };
    let page = PageClient::new(refresher, messages, RefreshSchedule::from_config(&ctx.config));
    let (stop_tx, stop_rx) = watch::channel(false);
    let page_task = tokio::spawn(page.run(stop_rx));

    let monitor = ConnectivityMonitor::new(
        Connectivity::Online,
        Arc::new(SyncRegistry::new()),
        ctx.config.sync_tag.clone(),
    );
    let mut ticker = tokio::time::interval(Duration::from_secs(check_secs.max(1)));
    info!(origin = %ctx.config.origin, check_secs, "Watching; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for tag in monitor.set(check_connectivity(&ctx).await) {
                    match worker.on_sync(&tag).await {
                        Ok(report) => debug!(?report, "Background sync fired"),
                        Err(e) => warn!(tag = %tag, error = %e, "Background sync failed"),
                    }
                }
                report_task_failures(&worker);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    let _ = stop_tx.send(true);
    page_task.await.context("Page client panicked")?;
    ctx.clients.close(page_id);
    ctx.tasks.settle().await;
    report_task_failures(&worker);
    Ok(())
}

/// Failures were already logged when they happened; this just keeps a tally.
fn report_task_failures(worker: &ServiceWorker) {
    let outcomes = worker.context().tasks.drain_outcomes();
    let failed = outcomes.iter().filter(|outcome| !outcome.is_ok()).count();
    if failed > 0 {
        warn!(failed, total = outcomes.len(), "Some cache writes did not complete");
    }
}
