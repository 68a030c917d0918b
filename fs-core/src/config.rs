//! Engine configuration
//!
//! Loaded from JSON; every field has a default, so `{}` is a valid file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::layout::{DEFAULT_INODE_PAGE_DIVISOR, PAGE_SIZE};

/// Default arena size: 16 MiB
const DEFAULT_TOTAL_PAGES: u32 = 4096;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings used when formatting and serving an arena
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pages in a freshly formatted arena
    pub total_pages: u32,
    /// Ratio of total pages to inode table pages
    pub inode_page_divisor: u32,
    /// Record access times on lookup, read and readlink
    pub track_access_time: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_pages: DEFAULT_TOTAL_PAGES,
            inode_page_divisor: DEFAULT_INODE_PAGE_DIVISOR,
            track_access_time: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&contents)?;
        log::debug!("CONFIG: loaded {:?} from {}", config, path.as_ref().display());
        Ok(config)
    }

    /// Arena size in bytes
    pub fn arena_len(&self) -> usize {
        self.total_pages as usize * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = EngineConfig::from_json_str(r#"{ "track_access_time": false }"#).unwrap();
        assert_eq!(config.total_pages, 4096);
        assert_eq!(config.inode_page_divisor, 32);
        assert!(!config.track_access_time);
        assert_eq!(EngineConfig::from_json_str("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "total_pages": 1024, "inode_page_divisor": 16 }}"#).unwrap();
        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.total_pages, 1024);
        assert_eq!(config.inode_page_divisor, 16);
        assert_eq!(config.arena_len(), 1024 * PAGE_SIZE);

        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
