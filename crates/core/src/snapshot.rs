use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Version stamped into every `metadata.json`.
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableBackupOutcome {
    pub success: bool,
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// SHA-256 of the table's JSON file, present only when the file was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl TableBackupOutcome {
    pub fn saved(record_count: u64, checksum: String) -> Self {
        Self {
            success: true,
            record_count,
            error_message: None,
            checksum: Some(checksum),
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            record_count: 0,
            error_message: Some(error_message.into()),
            checksum: None,
        }
    }
}

/// Per-table outcomes in configured table order.
///
/// Serialized as a JSON object whose keys keep insertion order, so reports,
/// metadata and restores all walk tables in the same sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOutcomes(Vec<(String, TableBackupOutcome)>);

impl TableOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the outcome for `table`, keeping its first position.
    pub fn insert(&mut self, table: impl Into<String>, outcome: TableBackupOutcome) {
        let table = table.into();
        match self.0.iter_mut().find(|(name, _)| *name == table) {
            Some(slot) => slot.1 = outcome,
            None => self.0.push((table, outcome)),
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableBackupOutcome> {
        self.0
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, outcome)| outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableBackupOutcome)> {
        self.0.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of record counts over successful tables.
    pub fn total_records(&self) -> u64 {
        self.iter()
            .filter(|(_, outcome)| outcome.success)
            .map(|(_, outcome)| outcome.record_count)
            .sum()
    }

    pub fn failed_count(&self) -> usize {
        self.iter().filter(|(_, outcome)| !outcome.success).count()
    }
}

impl Serialize for TableOutcomes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (table, outcome) in &self.0 {
            map.serialize_entry(table, outcome)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableOutcomes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OutcomesVisitor;

        impl<'de> Visitor<'de> for OutcomesVisitor {
            type Value = TableOutcomes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of table name to backup outcome")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut outcomes = TableOutcomes::new();
                while let Some((table, outcome)) =
                    access.next_entry::<String, TableBackupOutcome>()?
                {
                    outcomes.insert(table, outcome);
                }
                Ok(outcomes)
            }
        }

        deserializer.deserialize_map(OutcomesVisitor)
    }
}

/// Contents of a snapshot's `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Timestamp portion of the snapshot id, e.g. `2025-01-20_02-00-00`.
    pub timestamp: String,
    pub date: DateTime<Utc>,
    pub source_identifier: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    pub tables: TableOutcomes,
    pub total_records: u64,
    pub version: String,
}

/// A snapshot directory on disk together with its parsed metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub directory: PathBuf,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    pub fn total_records(&self) -> u64 {
        self.metadata.total_records
    }

    pub fn failed_tables(&self) -> usize {
        self.metadata.tables.failed_count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_snapshots: usize,
}

impl RetentionPolicy {
    pub fn new(max_snapshots: usize) -> Self {
        Self { max_snapshots }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableRestoreOutcome {
    pub table: String,
    pub success: bool,
    pub inserted_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TableRestoreOutcome {
    pub fn restored(table: impl Into<String>, inserted_count: u64) -> Self {
        Self {
            table: table.into(),
            success: true,
            inserted_count,
            error_message: None,
        }
    }

    pub fn failed(table: impl Into<String>, inserted_count: u64, error: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            success: false,
            inserted_count,
            error_message: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub tables: Vec<TableRestoreOutcome>,
    pub total_restored: u64,
    pub failed_table_count: usize,
}

impl RestoreOutcome {
    pub fn record(&mut self, outcome: TableRestoreOutcome) {
        self.total_restored += outcome.inserted_count;
        if !outcome.success {
            self.failed_table_count += 1;
        }
        self.tables.push(outcome);
    }

    pub fn table(&self, name: &str) -> Option<&TableRestoreOutcome> {
        self.tables.iter().find(|t| t.table == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outcomes() -> TableOutcomes {
        let mut outcomes = TableOutcomes::new();
        outcomes.insert("patients", TableBackupOutcome::saved(3, "aa".into()));
        outcomes.insert("bills", TableBackupOutcome::failed("timeout"));
        outcomes.insert("appointments", TableBackupOutcome::saved(2, "bb".into()));
        outcomes
    }

    #[test]
    fn total_records_counts_only_successful_tables() {
        let outcomes = sample_outcomes();
        assert_eq!(outcomes.total_records(), 5);
        assert_eq!(outcomes.failed_count(), 1);
    }

    #[test]
    fn outcomes_keep_table_order_through_json() {
        let outcomes = sample_outcomes();
        let raw = serde_json::to_string(&outcomes).expect("serialize");
        let patients = raw.find("patients").expect("patients");
        let bills = raw.find("bills").expect("bills");
        let appointments = raw.find("appointments").expect("appointments");
        assert!(patients < bills && bills < appointments);

        let parsed: TableOutcomes = serde_json::from_str(&raw).expect("parse");
        let order: Vec<&str> = parsed.iter().map(|(name, _)| name).collect();
        assert_eq!(order, ["patients", "bills", "appointments"]);
        assert_eq!(parsed.get("bills").and_then(|o| o.error_message.as_deref()), Some("timeout"));
    }

    #[test]
    fn metadata_uses_camel_case_field_names() {
        let metadata = SnapshotMetadata {
            timestamp: "2025-01-20_02-00-00".into(),
            date: "2025-01-20T02:00:00Z".parse().expect("date"),
            source_identifier: "https://db.example.org".into(),
            label: "daily".into(),
            run_id: None,
            tables: sample_outcomes(),
            total_records: 5,
            version: SNAPSHOT_FORMAT_VERSION.into(),
        };
        let value = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(value["totalRecords"], 5);
        assert_eq!(value["sourceIdentifier"], "https://db.example.org");
        assert_eq!(value["tables"]["patients"]["recordCount"], 3);
        assert_eq!(value["tables"]["bills"]["success"], false);
        assert!(value["tables"]["bills"].get("checksum").is_none());
    }

    #[test]
    fn restore_outcome_aggregates_partial_tables() {
        let mut outcome = RestoreOutcome::default();
        outcome.record(TableRestoreOutcome::restored("patients", 250));
        outcome.record(TableRestoreOutcome::failed("bills", 100, "batch rejected"));
        assert_eq!(outcome.total_restored, 350);
        assert_eq!(outcome.failed_table_count, 1);
        assert_eq!(outcome.table("bills").map(|t| t.inserted_count), Some(100));
    }
}
