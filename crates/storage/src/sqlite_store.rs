use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hms_backup_core::{DataStore, Page, Row};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;

use crate::quote_ident;

/// SQLite database as a data store. Each call opens a fresh connection on the
/// blocking pool.
pub struct SqliteDataStore {
    db_path: PathBuf,
}

impl SqliteDataStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        open(&db_path)?;
        Ok(Self { db_path })
    }
}

fn open(path: &Path) -> Result<Connection> {
    Connection::open(path).with_context(|| format!("open sqlite database: {}", path.display()))
}

#[async_trait::async_trait]
impl DataStore for SqliteDataStore {
    fn source_identifier(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }

    async fn fetch_page(&self, table: &str, offset: usize, limit: usize) -> Result<Page> {
        let db_path = self.db_path.clone();
        let table = table.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let ident = quote_ident(&table);
            let total: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {ident}"), [], |r| r.get(0))
                .with_context(|| format!("count rows of {table}"))?;

            let mut stmt = conn
                .prepare(&format!("SELECT * FROM {ident} ORDER BY rowid LIMIT ?1 OFFSET ?2"))
                .with_context(|| format!("prepare page query for {table}"))?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
            let rows = stmt
                .query_map(params![limit as i64, offset as i64], |r| {
                    let mut row = Row::new();
                    for (i, column) in columns.iter().enumerate() {
                        row.insert(column.clone(), sql_to_json(r.get_ref(i)?));
                    }
                    Ok(row)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_context(|| format!("read page of {table}"))?;

            Ok(Page {
                rows,
                total: Some(total.max(0) as usize),
            })
        })
        .await?
    }

    async fn delete_all(&self, table: &str) -> Result<()> {
        let db_path = self.db_path.clone();
        let table = table.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute(&format!("DELETE FROM {}", quote_ident(&table)), [])
                .with_context(|| format!("delete rows of {table}"))?;
            Ok(())
        })
        .await?
    }

    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<()> {
        let db_path = self.db_path.clone();
        let table = table.to_owned();
        let rows = rows.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&db_path)?;
            let ident = quote_ident(&table);
            let tx = conn.transaction()?;
            for row in &rows {
                if row.is_empty() {
                    tx.execute(&format!("INSERT INTO {ident} DEFAULT VALUES"), [])?;
                    continue;
                }
                let columns: Vec<String> = row.keys().map(|c| quote_ident(c)).collect();
                let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "INSERT INTO {ident} ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders.join(", ")
                );
                tx.execute(&sql, params_from_iter(row.values().map(json_to_sql)))
                    .with_context(|| format!("insert into {table}"))?;
            }
            tx.commit().with_context(|| format!("commit batch into {table}"))?;
            Ok(())
        })
        .await?
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(hex::encode(blob)),
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
