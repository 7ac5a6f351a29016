//! Shared fixtures: a scripted network and a worker wired to it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use cryptonerd_core::cache::{CacheEntry, CacheStorage, MemoryCacheStorage};
use cryptonerd_core::config::WorkerConfig;
use cryptonerd_core::error::{CacheError, WorkerError};
use cryptonerd_core::http::{Request, RequestKey, Response, ResponseType};
use cryptonerd_core::net::Fetcher;
use cryptonerd_core::worker::{ServiceWorker, WorkerContext};

pub const ORIGIN: &str = "https://crypto.example";

pub const VERSION: &str = "cryptonerd-v1";

/// Serves scripted responses by path; unknown paths are 404. While offline
/// every fetch is rejected.
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    calls: Mutex<Vec<String>>,
    total: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
        })
    }

    /// A network that serves every path in the default manifest.
    pub fn with_manifest(config: &WorkerConfig) -> Arc<Self> {
        let network = Self::new();
        for path in config.asset_manifest.paths() {
            network.serve(path, Response::new(200, format!("asset {}", path)));
        }
        network
    }

    pub fn serve(&self, path: &str, response: Response) {
        self.routes.lock().unwrap().insert(path.to_string(), response);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, WorkerError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let path = request.url.path().to_string();
        self.calls.lock().unwrap().push(path.clone());

        if !self.online.load(Ordering::SeqCst) {
            return Err(WorkerError::Network("network unreachable".into()));
        }

        let response = self
            .routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found"));
        let same_origin = request.url.origin() == url(ORIGIN).origin();
        Ok(response
            .with_url(request.url.clone())
            .with_type(if same_origin { ResponseType::Basic } else { ResponseType::Cors }))
    }
}

pub fn config() -> WorkerConfig {
    WorkerConfig::default().with_origin(ORIGIN).unwrap()
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn at(path: &str) -> Url {
    url(ORIGIN).join(path).unwrap()
}

pub struct Harness {
    pub worker: ServiceWorker,
    pub network: Arc<FakeNetwork>,
    pub storage: Arc<MemoryCacheStorage>,
}

impl Harness {
    pub fn new(config: WorkerConfig, network: Arc<FakeNetwork>) -> Self {
        let storage = Arc::new(MemoryCacheStorage::new());
        Self::with_storage(config, network, storage)
    }

    pub fn with_storage(
        config: WorkerConfig,
        network: Arc<FakeNetwork>,
        storage: Arc<MemoryCacheStorage>,
    ) -> Self {
        let ctx = WorkerContext::new(
            config,
            storage.clone() as Arc<dyn CacheStorage>,
            network.clone() as Arc<dyn Fetcher>,
        );
        Self {
            worker: ServiceWorker::new(ctx),
            network,
            storage,
        }
    }

    /// A worker that has installed and activated against a healthy network.
    pub async fn started() -> Self {
        let config = config();
        let network = FakeNetwork::with_manifest(&config);
        let harness = Self::new(config, network);
        harness.worker.start().await.unwrap();
        harness
    }
}

/// In-memory store whose lookups and writes can be switched to fail, like a
/// disk that is full or corrupt.
#[derive(Default)]
pub struct FailingStorage {
    inner: MemoryCacheStorage,
    fail_lookups: AtomicBool,
    fail_puts: AtomicBool,
}

impl FailingStorage {
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryCacheStorage {
        &self.inner
    }

    fn broken() -> CacheError {
        CacheError::Io(std::io::Error::other("disk full"))
    }
}

#[async_trait]
impl CacheStorage for FailingStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.delete(name).await
    }

    async fn lookup(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Self::broken());
        }
        self.inner.lookup(name, key).await
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::broken());
        }
        self.inner.put(name, entry).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        self.inner.entries(name).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), CacheError> {
        self.inner.rename(from, to).await
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::broken());
        }
        self.inner.put_all(name, entries).await
    }
}

/// A started worker on top of a `FailingStorage` that is still healthy.
pub async fn started_on_failing_storage() -> (ServiceWorker, Arc<FakeNetwork>, Arc<FailingStorage>) {
    let config = config();
    let network = FakeNetwork::with_manifest(&config);
    let storage = Arc::new(FailingStorage::default());
    let ctx = WorkerContext::new(
        config,
        storage.clone() as Arc<dyn CacheStorage>,
        network.clone() as Arc<dyn Fetcher>,
    );
    let worker = ServiceWorker::new(ctx);
    worker.start().await.unwrap();
    (worker, network, storage)
}
