//! Indexer configuration.
//!
//! Read from a TOML file (`symbol-tree.toml` by default). Every field has a
//! default, so a missing file or a partial file are both valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SymbolTreeError};

pub const DEFAULT_CONFIG_FILE: &str = "symbol-tree.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Path to the SQLite database holding persisted indices
    pub storage_path: PathBuf,
    /// Batching window of the re-index work queue
    pub debounce_ms: u64,
    /// Buffer size of the work queue channel
    pub queue_capacity: usize,
    /// Whether source indices keep `internal` members
    pub include_internal_source: bool,
    /// Fuzzy queries shorter than this return nothing
    pub fuzzy_min_query_len: usize,
    /// File extension of metadata image files
    pub image_extension: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(".symbol-tree.db"),
            debounce_ms: 500,
            queue_capacity: 256,
            include_internal_source: true,
            fuzzy_min_query_len: 3,
            image_extension: "mdjson".to_string(),
        }
    }
}

impl IndexerConfig {
    /// Loads configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: IndexerConfig = toml::from_str(content)
            .map_err(|e: toml::de::Error| SymbolTreeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(SymbolTreeError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.image_extension.is_empty() {
            return Err(SymbolTreeError::Config(
                "image_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config = IndexerConfig::load(&temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, IndexerConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = IndexerConfig::from_toml("debounce_ms = 50\n").unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.queue_capacity, 256);
        assert!(config.include_internal_source);
        assert_eq!(config.debounce(), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = IndexerConfig::from_toml("queue_capacity = 0\n");
        assert!(matches!(result, Err(SymbolTreeError::Config(_))));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = IndexerConfig::from_toml("debounce_ms = \"soon\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "storage_path = \"cache.db\"\ninclude_internal_source = false\n").unwrap();

        let config = IndexerConfig::load(&path).unwrap();
        assert_eq!(config.storage_path, PathBuf::from("cache.db"));
        assert!(!config.include_internal_source);
    }
}
