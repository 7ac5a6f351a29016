//! Locally persisted favorites list.
//!
//! Stored as a JSON array of coin symbols at
//! `~/.local/share/cryptonerd/favorites.json`.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::APP_NAME;
use crate::error::FavoritesError;

const FAVORITES_FILE: &str = "favorites.json";

#[derive(Debug, Clone)]
pub struct FavoritesStore {
    path: PathBuf,
    symbols: Vec<String>,
}

impl FavoritesStore {
    /// Open the store at the default location.
    pub fn open_default() -> Result<Self, FavoritesError> {
        let dir = dirs::data_dir().ok_or(FavoritesError::NoDataDir)?;
        Ok(Self::load(dir.join(APP_NAME).join(FAVORITES_FILE)))
    }

    /// A missing or unreadable file yields an empty list.
    pub fn load(path: PathBuf) -> Self {
        let symbols = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<String>>(&contents) {
                Ok(symbols) => normalize(symbols),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse favorites, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read favorites, starting empty");
                Vec::new()
            }
        };
        Self { path, symbols }
    }

    pub fn save(&self) -> Result<(), FavoritesError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.symbols)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_ascii_uppercase();
        self.symbols.iter().any(|s| *s == symbol)
    }

    /// Returns false if the symbol was already a favorite or is blank.
    pub fn add(&mut self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() || self.symbols.contains(&symbol) {
            return false;
        }
        self.symbols.push(symbol);
        true
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_ascii_uppercase();
        let before = self.symbols.len();
        self.symbols.retain(|s| *s != symbol);
        self.symbols.len() != before
    }

    /// Returns whether the symbol is a favorite afterwards.
    pub fn toggle(&mut self, symbol: &str) -> bool {
        if self.remove(symbol) {
            false
        } else {
            self.add(symbol)
        }
    }
}

fn normalize(symbols: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim().to_ascii_uppercase();
        if !symbol.is_empty() && !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FavoritesStore::load(dir.path().join(FAVORITES_FILE));
        assert!(store.is_empty());

        assert!(store.add("btc"));
        assert!(!store.add("BTC"));
        assert!(!store.add("  "));
        assert!(store.contains("Btc"));

        assert!(store.toggle("eth"));
        assert!(!store.toggle("ETH"));
        assert_eq!(store.symbols(), ["BTC"]);

        assert!(store.remove("btc"));
        assert!(!store.remove("btc"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(FAVORITES_FILE);
        let mut store = FavoritesStore::load(path.clone());
        store.add("SOL");
        store.add("BTC");
        store.save().unwrap();

        let reloaded = FavoritesStore::load(path);
        assert_eq!(reloaded.symbols(), ["SOL", "BTC"]);
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FAVORITES_FILE);
        std::fs::write(&path, "{not json").unwrap();
        assert!(FavoritesStore::load(path).is_empty());
    }

    #[test]
    fn test_load_normalizes_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FAVORITES_FILE);
        std::fs::write(&path, r#"["btc", "BTC", " eth ", ""]"#).unwrap();
        assert_eq!(FavoritesStore::load(path).symbols(), ["BTC", "ETH"]);
    }
}
