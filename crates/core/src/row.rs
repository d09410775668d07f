use serde_json::{Map, Value};

/// One record of a business table. Column names map to JSON values; no schema
/// is assumed.
pub type Row = Map<String, Value>;

/// Result of reading one table out of the data store.
///
/// `rows == None` means extraction failed. An empty table is `Some(vec![])`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableExtractionResult {
    pub table_name: String,
    pub rows: Option<Vec<Row>>,
    pub error: Option<String>,
}

impl TableExtractionResult {
    pub fn extracted(table_name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            table_name: table_name.into(),
            rows: Some(rows),
            error: None,
        }
    }

    pub fn failed(table_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            rows: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.rows.is_some()
    }

    pub fn record_count(&self) -> usize {
        self.rows.as_ref().map_or(0, Vec::len)
    }
}
