use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::storage::{CacheEntry, CacheStorage};
use crate::error::CacheError;
use crate::http::RequestKey;

type Instance = HashMap<RequestKey, CacheEntry>;

#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<BTreeMap<String, Instance>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn lookup(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|instance| instance.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        let caches = self.caches.read().await;
        let mut entries: Vec<CacheEntry> = caches
            .get(name)
            .map(|instance| instance.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        let instance = caches
            .remove(from)
            .ok_or_else(|| CacheError::MissingInstance(from.to_string()))?;
        caches.insert(to.to_string(), instance);
        Ok(())
    }

    /// All entries land under one lock so readers never see a partial batch.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        let instance = caches.entry(name.to_string()).or_default();
        for entry in entries {
            instance.insert(entry.key.clone(), entry);
        }
        Ok(())
    }
}
