/*!
On-disk storage for snapshots: the content-addressed metadata blob store,
the per-snapshot directory layout and the append-only snapshot log.
*/

pub mod blob;
pub mod layout;
pub mod log;

pub use blob::MetadataBlobStore;
pub use log::SnapshotLogService;
