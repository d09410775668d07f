pub mod activity;
pub mod extractor;
pub mod postgres_store;
pub mod report;
mod repository;
pub mod restorer;
pub mod retention;
pub mod scheduler;
pub mod sqlite_store;

pub use activity::{ActivityLog, FailureNotifier, LogNotifier};
pub use extractor::{Extractor, DEFAULT_PAGE_SIZE};
pub use postgres_store::PostgresDataStore;
pub use repository::{is_snapshot_id, snapshot_id, SnapshotRepository, SNAPSHOT_PREFIX};
pub use restorer::{
    RestoreError, RestoreSelection, RestoreSessionOutcome, Restorer, ScriptedSelection,
    SelectionProvider, SnapshotSummary, DEFAULT_BATCH_SIZE,
};
pub use retention::RetentionManager;
pub use scheduler::{BackupRunOutcome, RunPhase, Scheduler};
pub use sqlite_store::SqliteDataStore;

/// Double-quotes a SQL identifier so table and column names pass through
/// verbatim.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
