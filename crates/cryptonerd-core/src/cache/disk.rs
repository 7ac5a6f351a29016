//! On-disk cache store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<cache name>/<hex key>.entry
//! ```
//!
//! An entry file is one line of JSON metadata (key, status, headers,
//! stored_at) followed by the raw response body. Each file is written to a
//! temp path and renamed into place, so concurrent writers of the same key
//! leave one complete entry behind, never the headers of one write paired
//! with the body of another.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::storage::{CacheEntry, CacheStorage};
use crate::error::CacheError;
use crate::http::RequestKey;

const ENTRY_EXT: &str = "entry";

/// File systems commonly cap names at 255 bytes; leave room for extensions.
const MAX_STEM_LEN: usize = 200;

pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn instance_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Where a replaced instance is parked during `rename`. The leading dot
    /// keeps it out of `keys`.
    fn displaced_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!(".{}.replaced", name))
    }

    fn entry_stem(key: &RequestKey) -> String {
        let identity = key.to_string();
        let hex: String = identity.bytes().map(|b| format!("{:02x}", b)).collect();
        if hex.len() <= MAX_STEM_LEN {
            return hex;
        }
        // Long URLs would overflow file name limits; keep a prefix for
        // readability and disambiguate with a stable FNV-1a hash.
        let hash = identity.bytes().fold(0xcbf29ce484222325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x100000001b3)
        });
        format!("{}-{:016x}", &hex[..MAX_STEM_LEN - 17], hash)
    }

    fn entry_path(dir: &Path, key: &RequestKey) -> PathBuf {
        dir.join(format!("{}.{}", Self::entry_stem(key), ENTRY_EXT))
    }

    fn encode(entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        // Compact JSON never contains a raw newline, so the first one ends the metadata.
        let mut contents = serde_json::to_vec(entry)?;
        contents.push(b'\n');
        contents.extend_from_slice(&entry.response.body);
        Ok(contents)
    }

    fn decode(contents: &[u8]) -> Result<CacheEntry, CacheError> {
        let split = contents
            .iter()
            .position(|b| *b == b'\n')
            .unwrap_or(contents.len());
        let mut entry: CacheEntry = serde_json::from_slice(&contents[..split])?;
        entry.response.body = contents.get(split + 1..).unwrap_or_default().to_vec();
        Ok(entry)
    }

    async fn load(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        match fs::read(path).await {
            Ok(contents) => Self::decode(&contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let tmp = path.with_extension(format!(
            "tmp{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, contents).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_dir_if_present(path: &Path) -> Result<bool, CacheError> {
        match fs::remove_dir_all(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        fs::create_dir_all(self.instance_dir(name)?).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(fs::metadata(self.instance_dir(name)?)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                if self.instance_dir(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let deleted = Self::remove_dir_if_present(&self.instance_dir(name)?).await?;
        if deleted {
            debug!(cache = name, "Deleted cache instance");
        }
        Ok(deleted)
    }

    async fn lookup(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        Self::load(&Self::entry_path(&self.instance_dir(name)?, key)).await
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let dir = self.instance_dir(name)?;
        fs::create_dir_all(&dir).await?;
        let contents = Self::encode(&entry)?;
        Self::write_atomic(&Self::entry_path(&dir, &entry.key), &contents).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        let dir_path = self.instance_dir(name)?;
        let mut dir = match fs::read_dir(&dir_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match Self::load(&path).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Directory renames are atomic; replacing a non-empty target takes a
    /// detour through a hidden parking directory.
    async fn rename(&self, from: &str, to: &str) -> Result<(), CacheError> {
        let source = self.instance_dir(from)?;
        let target = self.instance_dir(to)?;
        if !self.has(from).await? {
            return Err(CacheError::MissingInstance(from.to_string()));
        }

        let displaced = self.displaced_dir(to);
        Self::remove_dir_if_present(&displaced).await?;
        if self.has(to).await? {
            fs::rename(&target, &displaced).await?;
        }
        fs::rename(&source, &target).await?;
        if let Err(e) = Self::remove_dir_if_present(&displaced).await {
            warn!(cache = to, error = %e, "Failed to remove replaced cache instance");
        }
        debug!(from, to, "Renamed cache instance");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;
    use url::Url;

    fn entry(path: &str, body: &[u8]) -> CacheEntry {
        let url = Url::parse("https://crypto.example").unwrap().join(path).unwrap();
        CacheEntry::new(
            RequestKey::get(&url),
            Response::new(200, body.to_vec()).with_header("Content-Type", "image/png"),
        )
    }

    #[tokio::test]
    async fn test_put_and_lookup_roundtrip_preserves_body() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();

        let e = entry("/icons/icon-192x192.png", &[0x89, b'P', b'N', b'G', 0, 255]);
        storage.put("cryptonerd-v1", e.clone()).await.unwrap();

        let found = storage.lookup("cryptonerd-v1", &e.key).await.unwrap().unwrap();
        assert_eq!(found.response.body, vec![0x89, b'P', b'N', b'G', 0, 255]);
        assert_eq!(found.response.header("content-type"), Some("image/png"));
        assert_eq!(found.key, e.key);
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();

        storage.open("cryptonerd-v0").await.unwrap();
        storage.put("cryptonerd-v1", entry("/", b"home")).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["cryptonerd-v0", "cryptonerd-v1"]);

        assert!(storage.delete("cryptonerd-v0").await.unwrap());
        assert!(!storage.delete("cryptonerd-v0").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["cryptonerd-v1"]);
    }

    #[tokio::test]
    async fn test_missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        let e = entry("/missing.css", b"");
        assert!(storage.lookup("cryptonerd-v1", &e.key).await.unwrap().is_none());
        assert!(storage.entries("cryptonerd-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(storage.open("../etc").await, Err(CacheError::InvalidName(_))));
        assert!(matches!(storage.open("").await, Err(CacheError::InvalidName(_))));
    }

    #[test]
    fn test_long_keys_get_bounded_stems() {
        let long = format!("/assets/{}.js", "a".repeat(400));
        let a = entry(&long, b"");
        let b = entry(&format!("/assets/{}.js", "a".repeat(401)), b"");
        let stem_a = DiskCacheStorage::entry_stem(&a.key);
        assert_eq!(stem_a.len(), MAX_STEM_LEN);
        assert_ne!(stem_a, DiskCacheStorage::entry_stem(&b.key));
    }

    #[tokio::test]
    async fn test_concurrent_same_key_writes_leave_one_consistent_entry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(DiskCacheStorage::new(dir.path().to_path_buf()).unwrap());

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let storage = storage.clone();
                let mut e = entry("/app.js", &[i; 16]);
                e.response = e.response.with_header("x-writer", &i.to_string());
                tokio::spawn(async move { storage.put("v1", e).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries = storage.entries("v1").await.unwrap();
        assert_eq!(entries.len(), 1);
        let response = &entries[0].response;
        assert_eq!(response.body.len(), 16);
        // Headers and body come from the same write
        let writer = response.header("x-writer").unwrap();
        assert_eq!(writer, response.body[0].to_string());
    }

    #[tokio::test]
    async fn test_body_with_newlines_survives() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        let e = entry("/offline", b"<html>\n<body>\noffline\n</body>\n");
        storage.put("v1", e.clone()).await.unwrap();

        let found = storage.lookup("v1", &e.key).await.unwrap().unwrap();
        assert_eq!(found.response.body, e.response.body);
        assert_eq!(found.response.status, 200);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_error_and_skipped_in_listing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        let e = entry("/app.js", b"js");
        storage.put("v1", e.clone()).await.unwrap();
        let path = DiskCacheStorage::entry_path(&dir.path().join("v1"), &e.key);
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(storage.lookup("v1", &e.key).await, Err(CacheError::Corrupt(_))));
        assert!(storage.entries("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_replaces_existing_instance() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        storage.put("cryptonerd-v1", entry("/old.js", b"old")).await.unwrap();
        storage.put("cryptonerd-v1.installing", entry("/", b"home")).await.unwrap();

        storage.rename("cryptonerd-v1.installing", "cryptonerd-v1").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["cryptonerd-v1"]);
        let entries = storage.entries("cryptonerd-v1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response.body, b"home");
        assert!(!dir.path().join(".cryptonerd-v1.replaced").exists());
    }

    #[tokio::test]
    async fn test_rename_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf()).unwrap();
        storage.open("cryptonerd-v1").await.unwrap();
        assert!(matches!(
            storage.rename("cryptonerd-v1.installing", "cryptonerd-v1").await,
            Err(CacheError::MissingInstance(_))
        ));
        assert!(storage.has("cryptonerd-v1").await.unwrap());
    }
}
