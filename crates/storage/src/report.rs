use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use askama::Template;
use hms_backup_core::Snapshot;

use crate::repository::table_file;

pub const REPORT_FILE: &str = "report.md";

struct ReportRow {
    table: String,
    status: &'static str,
    records: u64,
    size: String,
}

struct ReportError {
    table: String,
    message: String,
}

#[derive(Template)]
#[template(path = "report.md", escape = "none")]
struct ReportTemplate<'a> {
    id: &'a str,
    date: String,
    label: &'a str,
    source: String,
    total_records: u64,
    succeeded: usize,
    failed: usize,
    rows: Vec<ReportRow>,
    errors: Vec<ReportError>,
}

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn file_size(dir: &Path, table: &str) -> String {
    table_file(dir, table)
        .ok()
        .and_then(|path| fs::metadata(path).ok())
        .map(|meta| format_size(meta.len()))
        .unwrap_or_else(|| "unavailable".to_owned())
}

/// Keeps free text on one line and out of the table's column separators.
fn markdown_inline(text: &str) -> String {
    text.replace(['\r', '\n'], " ").replace('|', "\\|")
}

/// Renders the human-readable summary of a snapshot, one row per table in
/// metadata order.
pub fn render_report(snapshot: &Snapshot) -> Result<String> {
    let meta = &snapshot.metadata;
    let mut rows = Vec::with_capacity(meta.tables.len());
    let mut errors = Vec::new();

    for (table, outcome) in meta.tables.iter() {
        let size = if outcome.success {
            file_size(&snapshot.directory, table)
        } else {
            "-".to_owned()
        };
        rows.push(ReportRow {
            table: markdown_inline(table),
            status: if outcome.success { "✅" } else { "❌" },
            records: outcome.record_count,
            size,
        });
        if let Some(message) = &outcome.error_message {
            errors.push(ReportError {
                table: markdown_inline(table),
                message: markdown_inline(message),
            });
        }
    }

    let template = ReportTemplate {
        id: &snapshot.id,
        date: meta.date.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        label: &meta.label,
        source: markdown_inline(&meta.source_identifier),
        total_records: meta.total_records,
        succeeded: meta.tables.len() - meta.tables.failed_count(),
        failed: meta.tables.failed_count(),
        rows,
        errors,
    };
    template.render().context("render backup report")
}

pub fn write_report(snapshot: &Snapshot) -> Result<PathBuf> {
    let rendered = render_report(snapshot)?;
    let path = snapshot.directory.join(REPORT_FILE);
    fs::write(&path, rendered).with_context(|| format!("write report: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hms_backup_core::{SnapshotMetadata, TableBackupOutcome, TableOutcomes};

    fn snapshot(dir: &Path) -> Snapshot {
        let mut tables = TableOutcomes::new();
        tables.insert("patients", TableBackupOutcome::saved(2, "00".into()));
        tables.insert("bills", TableBackupOutcome::failed("permission denied"));
        tables.insert("doctors", TableBackupOutcome::saved(5, "11".into()));
        Snapshot {
            id: "backup_2025-01-20_02-00-00".into(),
            directory: dir.to_path_buf(),
            metadata: SnapshotMetadata {
                timestamp: "2025-01-20_02-00-00".into(),
                date: "2025-01-20T02:00:00Z".parse().expect("date"),
                source_identifier: "https://db.example.org".into(),
                label: "weekly".into(),
                run_id: None,
                total_records: tables.total_records(),
                tables,
                version: "1.0".into(),
            },
        }
    }

    #[test]
    fn report_lists_tables_in_order_with_sizes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("patients.json"), vec![b' '; 2048]).expect("table file");
        // doctors.json is missing on purpose

        let rendered = render_report(&snapshot(tmp.path())).expect("render");

        assert!(rendered.contains("`backup_2025-01-20_02-00-00`"));
        assert!(rendered.contains("Total records: 7"));
        assert!(rendered.contains("2 succeeded, 1 failed"));
        assert!(rendered.contains("| patients | ✅ | 2 | 2.0 KB |"));
        assert!(rendered.contains("| bills | ❌ | 0 | - |"));
        assert!(rendered.contains("| doctors | ✅ | 5 | unavailable |"));
        assert!(rendered.contains("- `bills`: permission denied"));

        let patients = rendered.find("| patients").expect("patients row");
        let bills = rendered.find("| bills").expect("bills row");
        let doctors = rendered.find("| doctors").expect("doctors row");
        assert!(patients < bills && bills < doctors);
    }

    #[test]
    fn report_without_failures_has_no_error_section() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut snap = snapshot(tmp.path());
        snap.metadata.tables = TableOutcomes::new();
        snap.metadata.tables.insert("patients", TableBackupOutcome::saved(0, "00".into()));

        let path = write_report(&snap).expect("write");
        let rendered = fs::read_to_string(path).expect("read");
        assert!(!rendered.contains("## Errors"));
        assert!(rendered.contains("| patients | ✅ | 0 | unavailable |"));
    }

    #[test]
    fn error_text_cannot_break_the_table() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut snap = snapshot(tmp.path());
        snap.metadata.tables = TableOutcomes::new();
        snap.metadata.tables.insert(
            "bill|items",
            TableBackupOutcome::failed("bad row | id=4\n| injected | ✅ | 9 | 1 B |"),
        );

        let rendered = render_report(&snap).expect("render");
        assert!(rendered.contains("| bill\\|items | ❌ | 0 | - |"), "{rendered}");
        assert!(
            rendered.contains("- `bill\\|items`: bad row \\| id=4 \\| injected \\| ✅ \\| 9 \\| 1 B \\|\n"),
            "{rendered}"
        );
        assert!(!rendered.contains("\n| injected"));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
