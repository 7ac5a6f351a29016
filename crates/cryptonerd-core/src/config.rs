//! Worker configuration management.
//!
//! Holds the cache generation tag, the asset manifest primed at install,
//! and the path conventions the request router classifies against.
//!
//! Configuration is stored at `~/.config/cryptonerd/config.json`; a missing
//! file yields the built-in defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "cryptonerd";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Current generation of cached assets. Bump on every deploy that changes
/// a manifest asset.
pub const DEFAULT_CACHE_VERSION: &str = "cryptonerd-v1";

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "/favicon.ico",
    "/icon.svg",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
    "/offline",
    "/offline/page",
];

/// Ordered list of request paths primed into the cache at install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest(Vec<String>);

impl AssetManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::new(DEFAULT_MANIFEST.iter().copied())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub origin: Url,
    pub cache_version: String,
    pub asset_manifest: AssetManifest,
    pub api_prefix: String,
    pub offline_page: String,
    pub fallback_icon: String,
    pub image_extensions: Vec<String>,
    pub sync_tag: String,
    pub favorites_refresh_minutes: i64,
    pub global_refresh_minutes: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            asset_manifest: AssetManifest::default(),
            api_prefix: "/api/".to_string(),
            offline_page: "/offline".to_string(),
            fallback_icon: "/icons/icon-192x192.png".to_string(),
            image_extensions: ["jpg", "jpeg", "png", "gif", "svg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sync_tag: "sync-favorites".to_string(),
            favorites_refresh_minutes: 15,
            global_refresh_minutes: 60,
        }
    }
}

fn default_origin() -> Url {
    Url::parse(DEFAULT_ORIGIN).expect("DEFAULT_ORIGIN is a valid URL")
}

impl WorkerConfig {
    /// Load from the user config directory, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(&path, contents).map_err(io_err)?;
        Ok(())
    }

    /// Replace the origin, e.g. from an environment override.
    pub fn with_origin(mut self, origin: &str) -> Result<Self, ConfigError> {
        self.origin =
            Url::parse(origin).map_err(|e| ConfigError::InvalidOrigin(origin.to_string(), e))?;
        Ok(self)
    }

    /// Path-valued settings must be absolute paths on the origin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = self
            .asset_manifest
            .paths()
            .iter()
            .chain([&self.api_prefix, &self.offline_page, &self.fallback_icon]);
        for path in paths {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidPath(path.clone()));
            }
        }
        Ok(())
    }

    /// Resolve an origin-relative path to an absolute URL.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.origin.join(path)
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Default root for the on-disk cache store.
    pub fn cache_dir() -> Result<PathBuf, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoCacheDir)?;
        Ok(cache_dir.join(APP_NAME))
    }
}
