use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::http::{RequestKey, Response};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self {
            key,
            response,
            stored_at: Utc::now(),
        }
    }

    /// The stored response, marked as served from cache.
    pub fn to_response(&self) -> Response {
        let mut response = self.response.clone();
        response.from_cache = true;
        response
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.stored_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            let remaining_mins = minutes % 60;
            if remaining_mins >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            let remaining_hours = (minutes % 1440) / 60;
            if remaining_hours >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// A set of named cache instances.
///
/// Writes to distinct keys are independent; concurrent writes to the same key
/// are unordered and the last one wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the named instance if it does not exist.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Instance names, sorted.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Remove an instance and everything in it. Returns false if it was absent.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    async fn lookup(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Write an entry, creating the instance if needed.
    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError>;

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError>;

    /// Move every entry of `from` under the name `to`, replacing whatever
    /// `to` held. `from` no longer exists afterwards.
    async fn rename(&self, from: &str, to: &str) -> Result<(), CacheError>;

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        self.open(name).await?;
        for entry in entries {
            self.put(name, entry).await?;
        }
        Ok(())
    }
}
