use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::error;

/// Append-only log with one line per backup run.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_success(&self, records: u64, snapshot_dir: &Path) -> Result<()> {
        self.append(&format!(
            "SUCCESS - backed up {records} records to {}",
            snapshot_dir.display()
        ))
    }

    pub fn record_failure(&self, error: &str) -> Result<()> {
        // keep one run on one line
        let error = error.replace(['\n', '\r'], " ");
        self.append(&format!("FAILED - {error}"))
    }

    fn append(&self, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create activity log dir: {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open activity log: {}", self.path.display()))?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        writeln!(file, "[{now}] {message}")
            .with_context(|| format!("append activity log: {}", self.path.display()))
    }
}

/// Hook invoked when a scheduled backup fails.
pub trait FailureNotifier: Send + Sync {
    fn notify_failure(&self, label: &str, error: &str);
}

/// Raises the alert as an error-level log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl FailureNotifier for LogNotifier {
    fn notify_failure(&self, label: &str, error: &str) {
        error!(label, error, "ALERT: scheduled backup failed");
    }
}
