use anyhow::{Context, Result};
use hms_backup_core::{DataStore, Page, Row};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row as _};

use crate::quote_ident;

/// Direct Postgres connection as a data store. Rows travel as `row_to_json`
/// text so no per-column type mapping is needed.
pub struct PostgresDataStore {
    pool: PgPool,
    source: String,
}

impl PostgresDataStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        Ok(Self {
            pool,
            source: redact_credentials(database_url),
        })
    }
}

#[async_trait::async_trait]
impl DataStore for PostgresDataStore {
    fn source_identifier(&self) -> String {
        self.source.clone()
    }

    async fn fetch_page(&self, table: &str, offset: usize, limit: usize) -> Result<Page> {
        let ident = quote_ident(table);
        let count_sql = format!("SELECT count(*) FROM {ident}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("count rows of {table}"))?;

        let page_sql = format!(
            "SELECT row_to_json(t)::text AS row FROM {ident} t ORDER BY t.ctid LIMIT $1 OFFSET $2"
        );
        let records = sqlx::query(&page_sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("read page of {table}"))?;

        let rows = records
            .iter()
            .map(|record| {
                let raw: String = record.get("row");
                serde_json::from_str::<Row>(&raw).with_context(|| format!("decode row of {table}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            rows,
            total: Some(total.max(0) as usize),
        })
    }

    async fn delete_all(&self, table: &str) -> Result<()> {
        let sql = format!("DELETE FROM {}", quote_ident(table));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete rows of {table}"))?;
        Ok(())
    }

    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<()> {
        let ident = quote_ident(table);
        let sql = format!("INSERT INTO {ident} SELECT * FROM json_populate_recordset(NULL::{ident}, $1::json)");
        let payload = serde_json::to_string(rows).context("serialize batch")?;
        sqlx::query(&sql)
            .bind(payload)
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert into {table}"))?;
        Ok(())
    }
}

/// Drops the `user:password@` part of a connection URL.
fn redact_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_owned(),
    }
}
