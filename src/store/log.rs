/*!
Append-only text log kept next to each snapshot's validation data.

Entries are single lines of the form
`[YYYY-MM-DD HH:mm:ss.SSS] message`; newlines inside the message are
replaced with spaces so one entry is always one line. Reads page through
the log newest-first.
*/

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::model::SnapshotMetadata;
use crate::store::layout;

/// Timestamp format of a log entry.
const ENTRY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Per-snapshot append-only log service.
///
/// The service also keeps a process-local cache of snapshot metadata so
/// repeated appends do not need a catalog lookup per entry; invalidation
/// is manual via [SnapshotLogService::invalidate].
#[derive(Debug)]
pub struct SnapshotLogService {
    config: StoreConfig,
    metadata_cache: Mutex<HashMap<u64, SnapshotMetadata>>,
}

impl SnapshotLogService {
    /// A log service rooted at the configured base path.
    pub fn new(config: StoreConfig) -> Self {
        SnapshotLogService {
            config,
            metadata_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cache snapshot metadata for later appends by snapshot id.
    pub fn cache_metadata(&self, snapshot: &SnapshotMetadata) {
        self.metadata_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(snapshot.snapshot_id, snapshot.clone());
    }

    /// Cached metadata for a snapshot id, if present.
    pub fn cached_metadata(&self, snapshot_id: u64) -> Option<SnapshotMetadata> {
        self.metadata_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&snapshot_id)
            .cloned()
    }

    /// Drop the cached metadata for a snapshot id.
    pub fn invalidate(&self, snapshot_id: u64) {
        self.metadata_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&snapshot_id);
    }

    /// Append one entry to the snapshot's log, creating parent directories
    /// as needed.
    pub fn add_entry(&self, snapshot: &SnapshotMetadata, message: &str) -> Result<()> {
        let path = layout::snapshot_log_path(
            &self.config,
            &snapshot.network.acronym,
            snapshot.snapshot_id,
        );
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let single_line: String = message
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let entry = format!(
            "[{}] {}\n",
            Utc::now().format(ENTRY_TIMESTAMP_FORMAT),
            single_line
        );
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(entry.as_bytes())?;
        debug!(snapshot_id = snapshot.snapshot_id, "log entry appended");
        Ok(())
    }

    /// Read one page of entries, newest first. Page numbering starts at 0.
    pub fn read_page(
        &self,
        snapshot: &SnapshotMetadata,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>> {
        let path = layout::snapshot_log_path(
            &self.config,
            &snapshot.network.acronym,
            snapshot.snapshot_id,
        );
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(content
            .lines()
            .rev()
            .skip(page * page_size)
            .take(page_size)
            .map(str::to_owned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkInfo;
    use tempfile::tempdir;

    fn snapshot() -> SnapshotMetadata {
        SnapshotMetadata::new(7, NetworkInfo::new("TEST"))
    }

    #[test]
    fn test_append_creates_directories() {
        let dir = tempdir().unwrap();
        let log = SnapshotLogService::new(StoreConfig::new(dir.path()));
        log.add_entry(&snapshot(), "validation started").unwrap();

        let path = dir
            .path()
            .join("TEST/snapshots/snapshot_7/snapshot.log");
        let content = fs::read_to_string(path).unwrap();
        assert!(content.ends_with("validation started\n"));
        assert!(content.starts_with('['));
    }

    #[test]
    fn test_multiline_message_is_one_entry() {
        let dir = tempdir().unwrap();
        let log = SnapshotLogService::new(StoreConfig::new(dir.path()));
        log.add_entry(&snapshot(), "line one\n\rline two").unwrap();

        let entries = log.read_page(&snapshot(), 0, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("line one  line two"));
    }

    #[test]
    fn test_read_page_newest_first() {
        let dir = tempdir().unwrap();
        let log = SnapshotLogService::new(StoreConfig::new(dir.path()));
        for i in 0..5 {
            log.add_entry(&snapshot(), &format!("entry {}", i)).unwrap();
        }

        let first = log.read_page(&snapshot(), 0, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].ends_with("entry 4"));
        assert!(first[1].ends_with("entry 3"));

        let last = log.read_page(&snapshot(), 2, 2).unwrap();
        assert_eq!(last.len(), 1);
        assert!(last[0].ends_with("entry 0"));
    }

    #[test]
    fn test_read_missing_log() {
        let dir = tempdir().unwrap();
        let log = SnapshotLogService::new(StoreConfig::new(dir.path()));
        assert!(log.read_page(&snapshot(), 0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_metadata_cache() {
        let log = SnapshotLogService::new(StoreConfig::default());
        assert!(log.cached_metadata(7).is_none());
        log.cache_metadata(&snapshot());
        assert!(log.cached_metadata(7).is_some());
        log.invalidate(7);
        assert!(log.cached_metadata(7).is_none());
    }
}
