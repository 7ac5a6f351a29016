//! Versioned cache store for captured responses.
//!
//! This module provides the `CacheStorage` abstraction over named cache
//! instances, one per cache generation, each mapping a normalized request
//! identity to a response snapshot.
//!
//! Two backends:
//! - `MemoryCacheStorage`: in-process maps, used by tests and short-lived runs
//! - `DiskCacheStorage`: one directory per instance under the user cache dir

pub mod disk;
pub mod memory;
pub mod storage;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;
pub use storage::{CacheEntry, CacheStorage};
