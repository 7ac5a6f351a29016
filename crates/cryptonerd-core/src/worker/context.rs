use std::sync::Arc;

use async_trait::async_trait;

use super::tasks::BackgroundTasks;
use crate::cache::CacheStorage;
use crate::clients::ClientRegistry;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::net::Fetcher;

/// Queued resynchronization run when connectivity returns, before pages
/// are told to refresh.
#[async_trait]
pub trait SyncWork: Send + Sync {
    async fn flush(&self) -> Result<(), WorkerError>;
}

/// Nothing is queued while offline today; the hook exists for write queues.
pub struct NoQueuedWork;

#[async_trait]
impl SyncWork for NoQueuedWork {
    async fn flush(&self) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Everything a handler needs, built once when the worker starts.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: Arc<ClientRegistry>,
    pub sync_work: Arc<dyn SyncWork>,
    pub tasks: BackgroundTasks,
}

impl WorkerContext {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            clients: Arc::new(ClientRegistry::new()),
            sync_work: Arc::new(NoQueuedWork),
            tasks: BackgroundTasks::new(),
        }
    }

    pub fn with_clients(mut self, clients: Arc<ClientRegistry>) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_sync_work(mut self, sync_work: Arc<dyn SyncWork>) -> Self {
        self.sync_work = sync_work;
        self
    }

    pub fn cache_version(&self) -> &str {
        &self.config.cache_version
    }
}
