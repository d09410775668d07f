use hms_backup_core::{DataStore, Row, TableExtractionResult};
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Reads whole tables out of a [`DataStore`] one page at a time.
pub struct Extractor<'a> {
    store: &'a dyn DataStore,
    page_size: usize,
}

impl<'a> Extractor<'a> {
    pub fn new(store: &'a dyn DataStore) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Pages through `table` until an empty page or the reported total.
    ///
    /// A failed page discards everything read so far for the table; there are
    /// no partial-table snapshots.
    pub async fn extract_table(&self, table: &str) -> TableExtractionResult {
        let mut rows: Vec<Row> = Vec::new();
        let mut total: Option<usize> = None;

        loop {
            let offset = rows.len();
            let page = match self.store.fetch_page(table, offset, self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(table, offset, error = %e, "table extraction failed");
                    return TableExtractionResult::failed(table, format!("{e:#}"));
                }
            };
            if total.is_none() {
                total = page.total;
            }
            if page.rows.is_empty() {
                break;
            }
            rows.extend(page.rows);
            debug!(table, fetched = rows.len(), ?total, "page fetched");
            if total.is_some_and(|t| rows.len() >= t) {
                break;
            }
        }

        info!(table, records = rows.len(), "table extracted");
        TableExtractionResult::extracted(table, rows)
    }

    /// Extracts each table in order. One table failing never stops the others.
    pub async fn extract_all(&self, tables: &[String]) -> Vec<TableExtractionResult> {
        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            results.push(self.extract_table(table).await);
        }
        results
    }
}
