use anyhow::Result;

use crate::row::Row;

/// One page of rows plus the total row count the server reported, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    pub total: Option<usize>,
}

/// Row-oriented access to the live database, implemented by the REST client,
/// the SQLite and Postgres adapters, and the in-memory store.
///
/// The engine never interprets table contents; it only pages, wipes and
/// re-inserts opaque rows.
#[async_trait::async_trait]
pub trait DataStore: Send + Sync {
    /// Credential-free description of the backing store, recorded in snapshot metadata.
    fn source_identifier(&self) -> String;

    /// Read up to `limit` rows of `table` starting at `offset`.
    async fn fetch_page(&self, table: &str, offset: usize, limit: usize) -> Result<Page>;

    /// Remove every row of `table`.
    async fn delete_all(&self, table: &str) -> Result<()>;

    /// Insert `rows` into `table` as one request.
    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<()>;
}
