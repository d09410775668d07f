use anyhow::Result;
use hms_backup_core::{
    DataStore, RestoreOutcome, Snapshot, SnapshotMetadata, TableRestoreOutcome,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::repository::{is_snapshot_id, SnapshotRepository};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("destructive restore was not confirmed")]
    NotConfirmed,
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How the caller picked a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSelection {
    Latest,
    /// 1-based position in the most-recent-first listing.
    Index(usize),
    Id(String),
}

impl RestoreSelection {
    pub fn parse(answer: &str) -> Option<Self> {
        let answer = answer.trim();
        if answer.eq_ignore_ascii_case("latest") {
            return Some(Self::Latest);
        }
        if let Ok(index) = answer.parse::<usize>() {
            return Some(Self::Index(index));
        }
        is_snapshot_id(answer).then(|| Self::Id(answer.to_owned()))
    }

    /// Resolves against `ids`, which must be ordered most recent first.
    pub fn resolve(&self, ids: &[String]) -> Option<String> {
        match self {
            Self::Latest => ids.first().cloned(),
            Self::Index(index) => index.checked_sub(1).and_then(|i| ids.get(i)).cloned(),
            Self::Id(id) => ids.iter().find(|candidate| *candidate == id).cloned(),
        }
    }
}

/// A snapshot as offered to whoever chooses what to restore. `metadata` is
/// `None` when the snapshot's metadata could not be read.
#[derive(Debug, Clone)]
pub struct SnapshotSummary {
    pub id: String,
    pub metadata: Option<SnapshotMetadata>,
}

/// Source of the two decisions a restore needs: which snapshot, and whether
/// the destructive replace may go ahead.
pub trait SelectionProvider {
    /// Returns the raw answer: an index, `latest`, or a snapshot id.
    fn choose_snapshot(&mut self, snapshots: &[SnapshotSummary]) -> Result<String>;

    fn confirm_restore(&mut self, snapshot: &Snapshot) -> Result<bool>;
}

/// Canned answers for unattended or test-driven restores.
#[derive(Debug, Clone)]
pub struct ScriptedSelection {
    pub selection: String,
    pub confirm: bool,
}

impl ScriptedSelection {
    pub fn new(selection: impl Into<String>, confirm: bool) -> Self {
        Self {
            selection: selection.into(),
            confirm,
        }
    }
}

impl SelectionProvider for ScriptedSelection {
    fn choose_snapshot(&mut self, _snapshots: &[SnapshotSummary]) -> Result<String> {
        Ok(self.selection.clone())
    }

    fn confirm_restore(&mut self, _snapshot: &Snapshot) -> Result<bool> {
        Ok(self.confirm)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSessionOutcome {
    NoSnapshots,
    InvalidSelection(String),
    Declined,
    Completed(RestoreOutcome),
}

/// Replaces live tables with the contents of a snapshot.
pub struct Restorer<'a> {
    store: &'a dyn DataStore,
    repo: &'a SnapshotRepository,
    batch_size: usize,
}

impl<'a> Restorer<'a> {
    pub fn new(store: &'a dyn DataStore, repo: &'a SnapshotRepository) -> Self {
        Self {
            store,
            repo,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn list_snapshots(&self) -> Result<Vec<String>> {
        self.repo.list_snapshots()
    }

    pub fn load_metadata(&self, id: &str) -> Result<Snapshot, RestoreError> {
        if !is_snapshot_id(id) || !self.repo.snapshot_dir(id).is_dir() {
            return Err(RestoreError::NotFound(id.to_owned()));
        }
        Ok(self.repo.load_snapshot(id)?)
    }

    /// Restores every table the snapshot saved successfully.
    ///
    /// Per-table problems are reported in the outcome; only a missing
    /// confirmation or unreadable metadata is an error. Nothing touches the
    /// data store unless `confirmed` is true.
    pub async fn restore(&self, id: &str, confirmed: bool) -> Result<RestoreOutcome, RestoreError> {
        if !confirmed {
            warn!(snapshot = %id, "restore refused without confirmation");
            return Err(RestoreError::NotConfirmed);
        }
        let snapshot = self.load_metadata(id)?;
        info!(snapshot = %id, tables = snapshot.metadata.tables.len(), "starting restore");

        let mut outcome = RestoreOutcome::default();
        for (table, stored) in snapshot.metadata.tables.iter() {
            if !stored.success {
                info!(table, "skipping table that failed during backup");
                continue;
            }
            outcome.record(self.restore_table(&snapshot, table).await);
        }

        info!(
            snapshot = %id,
            total_restored = outcome.total_restored,
            failed_tables = outcome.failed_table_count,
            "restore finished"
        );
        Ok(outcome)
    }

    async fn restore_table(&self, snapshot: &Snapshot, table: &str) -> TableRestoreOutcome {
        let rows = match self.repo.load_table(snapshot, table) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table, error = %e, "cannot load table file");
                return TableRestoreOutcome::failed(table, 0, format!("{e:#}"));
            }
        };

        // Delete and insert are independent requests. A failed delete still
        // proceeds to insert, so the table may end up holding old and new rows.
        if let Err(e) = self.store.delete_all(table).await {
            warn!(table, error = %e, "delete before restore failed; inserting anyway");
        }

        let mut inserted: u64 = 0;
        for batch in rows.chunks(self.batch_size) {
            if let Err(e) = self.store.insert_batch(table, batch).await {
                warn!(table, inserted, error = %e, "batch insert failed");
                return TableRestoreOutcome::failed(table, inserted, format!("{e:#}"));
            }
            inserted += batch.len() as u64;
        }

        info!(table, inserted, "table restored");
        TableRestoreOutcome::restored(table, inserted)
    }

    /// Lists snapshots, asks `provider` which one to restore and for
    /// confirmation, then restores it.
    pub async fn restore_interactive(
        &self,
        provider: &mut dyn SelectionProvider,
    ) -> Result<RestoreSessionOutcome> {
        let ids = self.list_snapshots()?;
        if ids.is_empty() {
            warn!(root = %self.repo.root().display(), "no snapshots found");
            return Ok(RestoreSessionOutcome::NoSnapshots);
        }

        let summaries: Vec<SnapshotSummary> = ids
            .iter()
            .map(|id| SnapshotSummary {
                id: id.clone(),
                metadata: self.repo.load_snapshot(id).ok().map(|s| s.metadata),
            })
            .collect();

        let answer = provider.choose_snapshot(&summaries)?;
        let Some(id) = RestoreSelection::parse(&answer).and_then(|s| s.resolve(&ids)) else {
            warn!(answer = %answer.trim(), "invalid snapshot selection");
            return Ok(RestoreSessionOutcome::InvalidSelection(answer.trim().to_owned()));
        };

        let snapshot = self.load_metadata(&id)?;
        if !provider.confirm_restore(&snapshot)? {
            info!(snapshot = %id, "restore cancelled by operator");
            return Ok(RestoreSessionOutcome::Declined);
        }

        let outcome = self.restore(&id, true).await?;
        Ok(RestoreSessionOutcome::Completed(outcome))
    }
}
