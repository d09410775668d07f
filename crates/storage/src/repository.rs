use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use hms_backup_core::{
    content_hash, Row, Snapshot, SnapshotMetadata, TableBackupOutcome, TableExtractionResult,
    TableOutcomes, SNAPSHOT_FORMAT_VERSION,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::report;

pub const SNAPSHOT_PREFIX: &str = "backup_";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const METADATA_FILE: &str = "metadata.json";
const LATEST_LINK: &str = "latest";
const LATEST_POINTER_FILE: &str = "latest.txt";

/// Directory of snapshots. The directory listing is the only record of which
/// snapshots exist.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    root: PathBuf,
}

impl SnapshotRepository {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create snapshots root: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn write_snapshot(
        &self,
        results: &[TableExtractionResult],
        label: &str,
        source_identifier: &str,
    ) -> Result<Snapshot> {
        self.write_snapshot_at(results, label, source_identifier, Utc::now())
    }

    /// Persists one snapshot named after `now`.
    ///
    /// Only creating the directory and writing `metadata.json` can fail the
    /// call. Table files that cannot be written become failed outcomes; the
    /// report and the `latest` pointer are best effort.
    pub fn write_snapshot_at(
        &self,
        results: &[TableExtractionResult],
        label: &str,
        source_identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let id = snapshot_id(now);
        let dir = self.snapshot_dir(&id);
        fs::create_dir(&dir).with_context(|| format!("create snapshot dir: {}", dir.display()))?;

        let mut tables = TableOutcomes::new();
        for result in results {
            let outcome = match &result.rows {
                Some(rows) => match write_table(&dir, &result.table_name, rows) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(snapshot = %id, table = %result.table_name, error = %e, "table file write failed");
                        TableBackupOutcome::failed(format!("{e:#}"))
                    }
                },
                None => TableBackupOutcome::failed(
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| "extraction failed".to_owned()),
                ),
            };
            tables.insert(result.table_name.clone(), outcome);
        }

        let metadata = SnapshotMetadata {
            timestamp: id.trim_start_matches(SNAPSHOT_PREFIX).to_owned(),
            date: now,
            source_identifier: source_identifier.to_owned(),
            label: label.to_owned(),
            run_id: Some(Uuid::new_v4()),
            total_records: tables.total_records(),
            tables,
            version: SNAPSHOT_FORMAT_VERSION.to_owned(),
        };
        let metadata_path = dir.join(METADATA_FILE);
        let serialized =
            serde_json::to_string_pretty(&metadata).context("serialize snapshot metadata")?;
        fs::write(&metadata_path, serialized)
            .with_context(|| format!("write snapshot metadata: {}", metadata_path.display()))?;

        let snapshot = Snapshot {
            id,
            directory: dir,
            metadata,
        };

        if let Err(e) = report::write_report(&snapshot) {
            warn!(snapshot = %snapshot.id, error = %e, "report not written");
        }
        if let Err(e) = self.update_latest_pointer(&snapshot.id) {
            warn!(snapshot = %snapshot.id, error = %e, "latest pointer not updated");
        }

        info!(
            snapshot = %snapshot.id,
            total_records = snapshot.total_records(),
            failed_tables = snapshot.failed_tables(),
            "snapshot written"
        );
        Ok(snapshot)
    }

    /// Snapshot ids, most recent first. Entries that do not follow the
    /// naming convention are ignored.
    pub fn list_snapshots(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("list snapshots root: {}", self.root.display()))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", self.root.display()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && is_snapshot_id(&name) {
                ids.push(name);
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    pub fn load_snapshot(&self, id: &str) -> Result<Snapshot> {
        if !is_snapshot_id(id) {
            bail!("not a snapshot id: {id}");
        }
        let directory = self.snapshot_dir(id);
        let path = directory.join(METADATA_FILE);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read snapshot metadata: {}", path.display()))?;
        let metadata = serde_json::from_str(&raw)
            .with_context(|| format!("parse snapshot metadata: {}", path.display()))?;
        Ok(Snapshot {
            id: id.to_owned(),
            directory,
            metadata,
        })
    }

    /// Reads one table file back, checking it against the recorded checksum.
    pub fn load_table(&self, snapshot: &Snapshot, table: &str) -> Result<Vec<Row>> {
        let path = table_file(&snapshot.directory, table)?;
        let bytes = fs::read(&path).with_context(|| format!("read table file: {}", path.display()))?;

        let expected = snapshot
            .metadata
            .tables
            .get(table)
            .and_then(|outcome| outcome.checksum.as_deref());
        if let Some(expected) = expected {
            let actual = content_hash(&bytes);
            if actual != expected {
                bail!("checksum mismatch for {}: expected {expected}, found {actual}", path.display());
            }
        }

        serde_json::from_slice(&bytes).with_context(|| format!("parse table file: {}", path.display()))
    }

    /// Snapshot id the `latest` link (or pointer file) refers to.
    pub fn latest_pointer(&self) -> Option<String> {
        let linked = fs::read_link(self.root.join(LATEST_LINK))
            .ok()
            .and_then(|target| target.file_name().and_then(|n| n.to_str()).map(str::to_owned));
        let id = match linked {
            Some(id) => id,
            None => fs::read_to_string(self.root.join(LATEST_POINTER_FILE))
                .ok()?
                .trim()
                .to_owned(),
        };
        is_snapshot_id(&id).then_some(id)
    }

    pub fn remove_snapshot(&self, id: &str) -> Result<()> {
        if !is_snapshot_id(id) {
            bail!("not a snapshot id: {id}");
        }
        let dir = self.snapshot_dir(id);
        fs::remove_dir_all(&dir).with_context(|| format!("remove snapshot dir: {}", dir.display()))
    }

    fn update_latest_pointer(&self, id: &str) -> Result<()> {
        let link = self.root.join(LATEST_LINK);
        let pointer = self.root.join(LATEST_POINTER_FILE);
        match link_latest(&link, id) {
            Ok(()) => {
                // a pointer file left over from an earlier fallback would go stale
                let _ = fs::remove_file(&pointer);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "cannot link latest snapshot, writing pointer file");
                fs::write(&pointer, format!("{id}\n"))
                    .with_context(|| format!("write latest pointer: {}", pointer.display()))
            }
        }
    }
}

fn write_table(dir: &Path, table: &str, rows: &[Row]) -> Result<TableBackupOutcome> {
    let path = table_file(dir, table)?;
    let bytes = serde_json::to_vec_pretty(rows).context("serialize table rows")?;
    let checksum = content_hash(&bytes);
    if let Err(e) = fs::write(&path, &bytes) {
        let _ = fs::remove_file(&path);
        return Err(e).with_context(|| format!("write table file: {}", path.display()));
    }
    Ok(TableBackupOutcome::saved(rows.len() as u64, checksum))
}

pub(crate) fn table_file(dir: &Path, table: &str) -> Result<PathBuf> {
    if table.is_empty() || table.contains(['/', '\\']) || table == "." || table == ".." {
        bail!("invalid table name: {table:?}");
    }
    Ok(dir.join(format!("{table}.json")))
}

pub fn snapshot_id(now: DateTime<Utc>) -> String {
    format!("{SNAPSHOT_PREFIX}{}", now.format(TIMESTAMP_FORMAT))
}

pub fn is_snapshot_id(name: &str) -> bool {
    name.strip_prefix(SNAPSHOT_PREFIX)
        .is_some_and(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_ok())
}

#[cfg(unix)]
fn link_latest(link: &Path, id: &str) -> io::Result<()> {
    replace_existing_link(link)?;
    std::os::unix::fs::symlink(id, link)
}

#[cfg(windows)]
fn link_latest(link: &Path, id: &str) -> io::Result<()> {
    replace_existing_link(link)?;
    std::os::windows::fs::symlink_dir(id, link)
}

#[cfg(not(any(unix, windows)))]
fn link_latest(_link: &Path, _id: &str) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symbolic links unsupported"))
}

#[cfg(any(unix, windows))]
fn replace_existing_link(link: &Path) -> io::Result<()> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() || meta.is_file() => fs::remove_file(link),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "latest exists and is a directory",
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".into(), json!(i));
                row
            })
            .collect()
    }

    #[test]
    fn writes_table_files_metadata_and_report() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        let results = vec![
            TableExtractionResult::extracted("patients", rows(3)),
            TableExtractionResult::failed("bills", "connection reset"),
            TableExtractionResult::extracted("wards", Vec::new()),
        ];

        let snapshot = repo
            .write_snapshot_at(&results, "daily", "memory", at("2025-01-20T02:00:00Z"))
            .expect("write");

        assert_eq!(snapshot.id, "backup_2025-01-20_02-00-00");
        let dir = tmp.path().join(&snapshot.id);
        assert!(dir.join("patients.json").exists());
        assert!(dir.join("wards.json").exists());
        assert!(!dir.join("bills.json").exists());
        assert!(dir.join("report.md").exists());

        let loaded = repo.load_snapshot(&snapshot.id).expect("load");
        assert_eq!(loaded, snapshot);
        let meta = &loaded.metadata;
        assert_eq!(meta.timestamp, "2025-01-20_02-00-00");
        assert_eq!(meta.total_records, 3);
        assert_eq!(meta.total_records, meta.tables.total_records());
        let bills = meta.tables.get("bills").expect("bills outcome");
        assert!(!bills.success);
        assert_eq!(bills.record_count, 0);
        assert_eq!(bills.error_message.as_deref(), Some("connection reset"));

        assert_eq!(repo.load_table(&loaded, "patients").expect("rows"), rows(3));
        assert!(repo.load_table(&loaded, "wards").expect("rows").is_empty());
    }

    #[test]
    fn unwritable_table_file_only_fails_that_table() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        let results = vec![
            TableExtractionResult::extracted("bad\0name", rows(2)),
            TableExtractionResult::extracted("doctors", rows(4)),
        ];

        let snapshot = repo
            .write_snapshot_at(&results, "manual", "memory", at("2025-01-20T02:00:00Z"))
            .expect("write");

        let bad = snapshot.metadata.tables.get("bad\0name").expect("outcome");
        assert!(!bad.success);
        assert!(bad.error_message.is_some());
        assert_eq!(snapshot.metadata.tables.get("doctors").map(|o| o.record_count), Some(4));
        assert_eq!(snapshot.total_records(), 4);
    }

    #[test]
    fn missing_root_is_fatal() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path().join("snapshots")).expect("repo");
        fs::remove_dir(tmp.path().join("snapshots")).expect("remove root");

        let err = repo
            .write_snapshot(&[TableExtractionResult::extracted("patients", rows(1))], "manual", "memory")
            .unwrap_err();
        assert!(err.to_string().contains("create snapshot dir"));
    }

    #[test]
    fn same_second_snapshot_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        let now = at("2025-01-20T02:00:00Z");
        repo.write_snapshot_at(&[], "manual", "memory", now).expect("first");
        assert!(repo.write_snapshot_at(&[], "manual", "memory", now).is_err());
    }

    #[test]
    fn lists_most_recent_first_and_skips_foreign_entries() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        for raw in ["2025-01-21T02:00:00Z", "2025-01-19T02:00:00Z", "2025-01-20T02:00:00Z"] {
            repo.write_snapshot_at(&[], "daily", "memory", at(raw)).expect("write");
        }
        fs::create_dir(tmp.path().join("scratch")).expect("foreign dir");
        fs::write(tmp.path().join("backup.log"), "").expect("foreign file");

        let ids = repo.list_snapshots().expect("list");
        assert_eq!(
            ids,
            [
                "backup_2025-01-21_02-00-00",
                "backup_2025-01-20_02-00-00",
                "backup_2025-01-19_02-00-00",
            ]
        );
    }

    #[test]
    fn latest_pointer_follows_newest_write() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        repo.write_snapshot_at(&[], "daily", "memory", at("2025-01-19T02:00:00Z"))
            .expect("first");
        let second = repo
            .write_snapshot_at(&[], "daily", "memory", at("2025-01-20T02:00:00Z"))
            .expect("second");
        assert_eq!(repo.latest_pointer(), Some(second.id));
    }

    #[test]
    fn latest_falls_back_to_pointer_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        // a directory named `latest` blocks the symlink
        fs::create_dir(tmp.path().join(LATEST_LINK)).expect("block link");

        let snapshot = repo
            .write_snapshot_at(&[], "daily", "memory", at("2025-01-20T02:00:00Z"))
            .expect("write");

        let pointer = fs::read_to_string(tmp.path().join(LATEST_POINTER_FILE)).expect("pointer");
        assert_eq!(pointer.trim(), snapshot.id);
        assert_eq!(repo.latest_pointer(), Some(snapshot.id));
        assert_eq!(repo.list_snapshots().expect("list").len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn successful_link_removes_stale_pointer_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        fs::write(
            tmp.path().join(LATEST_POINTER_FILE),
            "backup_2025-01-01_02-00-00\n",
        )
        .expect("stale pointer");

        let snapshot = repo
            .write_snapshot_at(&[], "daily", "memory", at("2025-01-20T02:00:00Z"))
            .expect("write");

        assert!(!tmp.path().join(LATEST_POINTER_FILE).exists());
        assert_eq!(repo.latest_pointer(), Some(snapshot.id));
    }

    #[test]
    fn tampered_table_file_fails_checksum() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        let snapshot = repo
            .write_snapshot_at(
                &[TableExtractionResult::extracted("patients", rows(2))],
                "manual",
                "memory",
                at("2025-01-20T02:00:00Z"),
            )
            .expect("write");
        fs::write(snapshot.directory.join("patients.json"), "[]").expect("tamper");

        let err = repo.load_table(&snapshot, "patients").unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn snapshot_ids_sort_chronologically_and_are_path_safe() {
        let id = snapshot_id(at("2026-02-13T01:00:00Z"));
        assert_eq!(id, "backup_2026-02-13_01-00-00");
        assert!(!Path::new(&id).has_root());
        assert!(is_snapshot_id(&id));
        assert!(!is_snapshot_id("latest"));
        assert!(!is_snapshot_id("backup_tomorrow"));
        assert!(snapshot_id(at("2026-02-13T09:59:59Z")) < snapshot_id(at("2026-02-13T10:00:00Z")));
    }
}
