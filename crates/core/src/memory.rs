//! In-memory data store.
//!
//! Holds tables as plain row vectors, counts every call, and can be told to
//! fail specific operations. Used by tests and by callers that want to drive
//! the engine without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};

use crate::row::Row;
use crate::store::{DataStore, Page};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, Vec<Row>>,
    hide_totals: bool,
    fail_fetch_at: HashMap<String, usize>,
    fail_delete: Vec<String>,
    fail_insert_after: HashMap<String, usize>,
    fetch_calls: HashMap<String, usize>,
    delete_calls: HashMap<String, usize>,
    insert_calls: HashMap<String, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: &str, rows: Vec<Row>) -> Self {
        self.set_rows(table, rows);
        self
    }

    pub fn set_rows(&self, table: &str, rows: Vec<Row>) {
        self.lock().tables.insert(table.to_owned(), rows);
    }

    /// Current rows of `table`, empty when the table does not exist.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Stop reporting total counts, as servers without exact counting do.
    pub fn hide_totals(&self) {
        self.lock().hide_totals = true;
    }

    /// Fail the `page`-th fetch (0-based) issued against `table`.
    pub fn fail_fetch_at_page(&self, table: &str, page: usize) {
        self.lock().fail_fetch_at.insert(table.to_owned(), page);
    }

    pub fn fail_delete(&self, table: &str) {
        self.lock().fail_delete.push(table.to_owned());
    }

    /// Let `ok_batches` inserts into `table` succeed, then fail every later one.
    pub fn fail_insert_after(&self, table: &str, ok_batches: usize) {
        self.lock()
            .fail_insert_after
            .insert(table.to_owned(), ok_batches);
    }

    pub fn fetch_calls(&self, table: &str) -> usize {
        self.lock().fetch_calls.get(table).copied().unwrap_or(0)
    }

    pub fn delete_calls(&self, table: &str) -> usize {
        self.lock().delete_calls.get(table).copied().unwrap_or(0)
    }

    pub fn insert_calls(&self, table: &str) -> usize {
        self.lock().insert_calls.get(table).copied().unwrap_or(0)
    }

    /// Number of delete and insert calls across all tables.
    pub fn write_calls(&self) -> usize {
        let inner = self.lock();
        inner.delete_calls.values().sum::<usize>() + inner.insert_calls.values().sum::<usize>()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl DataStore for MemoryStore {
    fn source_identifier(&self) -> String {
        "memory".to_owned()
    }

    async fn fetch_page(&self, table: &str, offset: usize, limit: usize) -> Result<Page> {
        let mut inner = self.lock();
        let calls = inner.fetch_calls.entry(table.to_owned()).or_insert(0);
        let page_index = *calls;
        *calls += 1;

        if inner.fail_fetch_at.get(table) == Some(&page_index) {
            bail!("simulated fetch failure for {table} at page {page_index}");
        }
        let Some(rows) = inner.tables.get(table) else {
            bail!("relation \"{table}\" does not exist");
        };
        let total = (!inner.hide_totals).then_some(rows.len());
        let rows = rows.iter().skip(offset).take(limit).cloned().collect();
        Ok(Page { rows, total })
    }

    async fn delete_all(&self, table: &str) -> Result<()> {
        let mut inner = self.lock();
        *inner.delete_calls.entry(table.to_owned()).or_insert(0) += 1;

        if inner.fail_delete.iter().any(|t| t == table) {
            bail!("simulated delete failure for {table}");
        }
        match inner.tables.get_mut(table) {
            Some(rows) => {
                rows.clear();
                Ok(())
            }
            None => bail!("relation \"{table}\" does not exist"),
        }
    }

    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<()> {
        let mut inner = self.lock();
        let calls = inner.insert_calls.entry(table.to_owned()).or_insert(0);
        let batch_index = *calls;
        *calls += 1;

        if let Some(ok_batches) = inner.fail_insert_after.get(table) {
            if batch_index >= *ok_batches {
                bail!("simulated insert failure for {table} at batch {batch_index}");
            }
        }
        match inner.tables.get_mut(table) {
            Some(existing) => {
                existing.extend(rows.iter().cloned());
                Ok(())
            }
            None => bail!("relation \"{table}\" does not exist"),
        }
    }
}
