pub mod hash;
pub mod memory;
pub mod row;
pub mod snapshot;
pub mod store;

pub use hash::content_hash;
pub use memory::MemoryStore;
pub use row::{Row, TableExtractionResult};
pub use snapshot::{
    RestoreOutcome, RetentionPolicy, Snapshot, SnapshotMetadata, TableBackupOutcome,
    TableOutcomes, TableRestoreOutcome, SNAPSHOT_FORMAT_VERSION,
};
pub use store::{DataStore, Page};
