/*!
Traits for the external snapshot catalog and the harvested-record store.

Only the surface consumed by the validation worker is specified here; the
implementations live outside this crate and are free to use any catalog
technology. Every call is an independent transaction from the worker's
point of view, so methods return [anyhow::Result] and implementations own
their error types.
*/

use crate::model::{HarvestedRecord, NetworkInfo, SnapshotMetadata, SnapshotStatus};

/// The snapshot-metadata catalog as seen by the validation worker.
pub trait SnapshotStore {
    /// Id of the network's most recent harvested snapshot, if any.
    fn find_last_harvesting_snapshot(&self, network: &NetworkInfo)
        -> anyhow::Result<Option<u64>>;

    /// Metadata of a snapshot, `None` when unknown.
    fn get_snapshot_metadata(&self, snapshot_id: u64) -> anyhow::Result<Option<SnapshotMetadata>>;

    /// Push current validation counters. Called once per page, so readers
    /// may lag the actual row count by at most one page.
    fn update_snapshot_counts(
        &self,
        snapshot_id: u64,
        total: u64,
        valid: u64,
        transformed: u64,
    ) -> anyhow::Result<()>;

    /// Increment the valid-record counter by one.
    fn increment_valid_size(&self, snapshot_id: u64) -> anyhow::Result<()>;

    /// Increment the transformed-record counter by one.
    fn increment_transformed_size(&self, snapshot_id: u64) -> anyhow::Result<()>;

    /// Zero the validation counters before a re-run.
    fn reset_snapshot_validation_counts(&self, snapshot_id: u64) -> anyhow::Result<()>;

    /// Move the snapshot to the given status.
    fn update_snapshot_status(
        &self,
        snapshot_id: u64,
        status: SnapshotStatus,
    ) -> anyhow::Result<()>;

    /// Persist any pending snapshot changes.
    fn save_snapshot(&self, snapshot_id: u64) -> anyhow::Result<()>;

    /// Hook called when validation of a snapshot begins. The default
    /// keeps the harvest-finished status untouched.
    fn start_validation(&self, snapshot_id: u64) -> anyhow::Result<()> {
        let _ = snapshot_id;
        Ok(())
    }

    /// Mark the snapshot validated and ready to index.
    fn finish_validation(&self, snapshot_id: u64) -> anyhow::Result<()> {
        self.update_snapshot_status(snapshot_id, SnapshotStatus::Valid)
    }

    /// Mark the harvest finished with the given terminal status.
    fn finish_harvesting(
        &self,
        snapshot_id: u64,
        status: SnapshotStatus,
    ) -> anyhow::Result<()> {
        self.update_snapshot_status(snapshot_id, status)
    }

    /// Mark the snapshot indexed.
    fn mark_as_indexed(&self, snapshot_id: u64) -> anyhow::Result<()> {
        self.update_snapshot_status(snapshot_id, SnapshotStatus::IndexingFinishedValid)
    }
}

/// Streaming access to the harvested records of a snapshot, owned by the
/// external harvest store.
pub trait HarvestedRecordSource {
    /// Iterate the snapshot's records in harvest order.
    fn records(
        &self,
        snapshot_id: u64,
    ) -> anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<HarvestedRecord>> + '_>>;
}
