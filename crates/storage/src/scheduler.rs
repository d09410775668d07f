use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use hms_backup_core::{DataStore, RetentionPolicy, Snapshot};
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityLog, FailureNotifier, LogNotifier};
use crate::extractor::{Extractor, DEFAULT_PAGE_SIZE};
use crate::repository::SnapshotRepository;
use crate::retention::RetentionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Extracting,
    Writing,
    Succeeded,
    Pruning,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Extracting => "extracting",
            RunPhase::Writing => "writing",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Pruning => "pruning",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum BackupRunOutcome {
    Succeeded { snapshot: Snapshot, pruned: Vec<String> },
    Failed { error: String },
}

impl BackupRunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BackupRunOutcome::Succeeded { .. })
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            BackupRunOutcome::Succeeded { snapshot, .. } => Some(snapshot),
            BackupRunOutcome::Failed { .. } => None,
        }
    }
}

/// Runs complete backup cycles: extract, write, log, alert, prune.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn DataStore>,
    repo: SnapshotRepository,
    tables: Vec<String>,
    policy: RetentionPolicy,
    page_size: usize,
    activity_log: ActivityLog,
    notifier: Arc<dyn FailureNotifier>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn DataStore>,
        repo: SnapshotRepository,
        tables: Vec<String>,
        policy: RetentionPolicy,
        activity_log: ActivityLog,
    ) -> Self {
        Self {
            store,
            repo,
            tables,
            policy,
            page_size: DEFAULT_PAGE_SIZE,
            activity_log,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn repository(&self) -> &SnapshotRepository {
        &self.repo
    }

    /// Runs one backup cycle and always returns a terminal outcome.
    ///
    /// The whole run, including the activity log line and retention, lives on
    /// a spawned task, so it completes even when the caller stops waiting. The
    /// extract and write steps get a task of their own so that a panic inside a
    /// data-store adapter ends as `Failed`. Retention runs only after a
    /// successful write and its failures never change the outcome.
    pub async fn run_scheduled_backup(&self, label: &str) -> BackupRunOutcome {
        enter(label, RunPhase::Idle);
        info!(label, tables = self.tables.len(), "backup run started");

        let this = self.clone();
        let label = label.to_owned();
        let run = tokio::spawn(async move {
            let cycle = {
                let this = this.clone();
                let label = label.clone();
                tokio::spawn(async move { this.backup_cycle(&label).await })
            };
            let result = match cycle.await {
                Ok(result) => result,
                Err(e) => Err(anyhow!("backup task aborted: {e}")),
            };
            this.finish_run(&label, result)
        });
        match run.await {
            Ok(outcome) => outcome,
            Err(e) => BackupRunOutcome::Failed {
                error: format!("backup task aborted: {e}"),
            },
        }
    }

    fn finish_run(&self, label: &str, result: Result<Snapshot>) -> BackupRunOutcome {
        match result {
            Ok(snapshot) => {
                enter(label, RunPhase::Succeeded);
                if let Err(e) = self
                    .activity_log
                    .record_success(snapshot.total_records(), &snapshot.directory)
                {
                    warn!(error = %e, "activity log not updated");
                }

                enter(label, RunPhase::Pruning);
                let pruned = match RetentionManager::new(&self.repo).enforce_retention(&self.policy) {
                    Ok(pruned) => pruned,
                    Err(e) => {
                        warn!(error = %e, "retention pruning failed");
                        Vec::new()
                    }
                };

                enter(label, RunPhase::Done);
                info!(
                    label,
                    snapshot = %snapshot.id,
                    total_records = snapshot.total_records(),
                    failed_tables = snapshot.failed_tables(),
                    pruned = pruned.len(),
                    "backup run succeeded"
                );
                BackupRunOutcome::Succeeded { snapshot, pruned }
            }
            Err(e) => {
                enter(label, RunPhase::Failed);
                let message = format!("{e:#}");
                error!(label, error = %message, "backup run failed");
                if let Err(e) = self.activity_log.record_failure(&message) {
                    warn!(error = %e, "activity log not updated");
                }
                self.notifier.notify_failure(label, &message);
                BackupRunOutcome::Failed { error: message }
            }
        }
    }

    async fn backup_cycle(&self, label: &str) -> Result<Snapshot> {
        enter(label, RunPhase::Extracting);
        let results = Extractor::new(self.store.as_ref())
            .with_page_size(self.page_size)
            .extract_all(&self.tables)
            .await;

        enter(label, RunPhase::Writing);
        self.repo
            .write_snapshot(&results, label, &self.store.source_identifier())
            .with_context(|| format!("{} phase", RunPhase::Writing))
    }
}

fn enter(label: &str, phase: RunPhase) {
    debug!(label, %phase, "backup phase");
}
