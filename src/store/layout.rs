/*!
Per-snapshot directory layout.

```text
<basePath>/<NETWORK>/snapshots/snapshot_<id>/
    validation/validation-stats.json
    validation/validation.db
    snapshot.log
```
*/

use std::path::PathBuf;

use crate::config::StoreConfig;

/// Name of the validation subdirectory.
const VALIDATION_DIR: &str = "validation";
/// File name of the precomputed stats summary.
const STATS_SUMMARY_FILE: &str = "validation-stats.json";
/// File name of the stat-store database.
const STATS_DB_FILE: &str = "validation.db";
/// File name of the snapshot log.
const LOG_FILE: &str = "snapshot.log";

/// Directory holding one snapshot's files.
pub fn snapshot_dir(config: &StoreConfig, network_acronym: &str, snapshot_id: u64) -> PathBuf {
    config
        .base_path
        .join(network_acronym)
        .join("snapshots")
        .join(format!("snapshot_{}", snapshot_id))
}

/// Directory holding one snapshot's validation data.
pub fn validation_dir(config: &StoreConfig, network_acronym: &str, snapshot_id: u64) -> PathBuf {
    snapshot_dir(config, network_acronym, snapshot_id).join(VALIDATION_DIR)
}

/// Path of the precomputed stats summary.
pub fn stats_summary_path(config: &StoreConfig, network_acronym: &str, snapshot_id: u64) -> PathBuf {
    validation_dir(config, network_acronym, snapshot_id).join(STATS_SUMMARY_FILE)
}

/// Path of the stat-store database.
pub fn stats_db_path(config: &StoreConfig, network_acronym: &str, snapshot_id: u64) -> PathBuf {
    validation_dir(config, network_acronym, snapshot_id).join(STATS_DB_FILE)
}

/// Path of the snapshot log.
pub fn snapshot_log_path(config: &StoreConfig, network_acronym: &str, snapshot_id: u64) -> PathBuf {
    snapshot_dir(config, network_acronym, snapshot_id).join(LOG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let config = StoreConfig::new("/data");
        assert_eq!(
            snapshot_log_path(&config, "TEST", 42),
            PathBuf::from("/data/TEST/snapshots/snapshot_42/snapshot.log")
        );
        assert_eq!(
            stats_summary_path(&config, "TEST", 42),
            PathBuf::from("/data/TEST/snapshots/snapshot_42/validation/validation-stats.json")
        );
        assert_eq!(
            stats_db_path(&config, "TEST", 42),
            PathBuf::from("/data/TEST/snapshots/snapshot_42/validation/validation.db")
        );
    }
}
