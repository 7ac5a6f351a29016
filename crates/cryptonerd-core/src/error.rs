use thiserror::Error;

use crate::http::RequestKey;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No cached response for {0}")]
    CacheMiss(RequestKey),

    #[error("Offline page {0} is not in the cache")]
    OfflinePageMissing(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cannot {event} while worker is {state}")]
    InvalidState { event: &'static str, state: String },

    #[error("Install failed for {url}: {source}")]
    InstallFailed {
        url: String,
        #[source]
        source: Box<WorkerError>,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl WorkerError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            404 => WorkerError::NotFound(truncated),
            500..=599 => WorkerError::ServerError(truncated),
            _ => WorkerError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the error came from the network layer rather than the cache.
    pub fn is_network(&self) -> bool {
        matches!(self, WorkerError::Network(_))
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        WorkerError::Network(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Could not find cache directory")]
    NoCacheDir,

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid origin {0:?}: {1}")]
    InvalidOrigin(String, url::ParseError),

    #[error("Invalid path {0:?}: must start with '/'")]
    InvalidPath(String),
}

#[derive(Error, Debug)]
pub enum FavoritesError {
    #[error("Could not find data directory")]
    NoDataDir,

    #[error("Failed to write favorites: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize favorites: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache name: {0:?}")]
    InvalidName(String),

    #[error("Cache instance {0} does not exist")]
    MissingInstance(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}
