/*!
Store configuration shared by the blob store, snapshot log and stat store.
*/

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Base directory for the blob store and the per-snapshot layout.
const DEFAULT_BASE_PATH: &str = "/tmp/data/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// Filesystem configuration for the stores.
pub struct StoreConfig {
    /// Base directory under which blobs and snapshot directories live.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
}

fn default_base_path() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_PATH)
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            base_path: default_base_path(),
        }
    }
}

impl StoreConfig {
    /// A configuration rooted at the given base path.
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        StoreConfig {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_path() {
        let config = StoreConfig::default();
        assert_eq!(config.base_path, PathBuf::from("/tmp/data/"));
    }

    #[test]
    fn test_deserialize_empty_uses_default() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_deserialize_base_path() {
        let config: StoreConfig = serde_json::from_str(r#"{"base-path": "/var/oai"}"#).unwrap();
        assert_eq!(config.base_path, PathBuf::from("/var/oai"));
    }
}
