//! cryptonerd-core - offline caching and request routing for the
//! CryptoNerd dashboard.
//!
//! This crate provides:
//! - Versioned response cache stores (`cache`)
//! - The worker lifecycle, fetch router and background sync (`worker`)
//! - Controlled-page registry and messaging (`clients`)
//! - Network access behind the `Fetcher` seam (`net`)
//! - Page-side refresh loop, connectivity and favorites (`page`)

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod page;
pub mod worker;

pub use cache::{CacheEntry, CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use clients::{ClientId, ClientMessage, ClientRegistry, ClientType};
pub use config::{AssetManifest, WorkerConfig};
pub use error::{CacheError, ConfigError, FavoritesError, WorkerError};
pub use http::{Request, RequestKey, RequestMode, Response, ResponseType};
pub use net::{Fetcher, HttpFetcher};
pub use worker::{EventOutcome, FetchDisposition, LifecycleState, ServiceWorker, WorkerContext, WorkerEvent};
