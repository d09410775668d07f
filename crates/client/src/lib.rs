use std::time::Duration;

use anyhow::{Context, Result};
use hms_backup_core::{DataStore, Page, Row};
use reqwest::header::CONTENT_RANGE;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Column used for the "every row" filter the API demands on deletes.
    pub key_column: String,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            url,
            api_key,
            key_column: "id".to_owned(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("data store api key is missing")]
    MissingCredentials,
    #[error("data store url is missing")]
    MissingEndpoint,
    #[error("{operation} on {table} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        table: String,
        status: u16,
        body: String,
    },
    #[error("malformed content-range header: {0:?}")]
    InvalidContentRange(String),
}

/// Client for a PostgREST-style hosted database API.
///
/// Tables live under `{url}/rest/v1/{table}`. Every request carries the key as
/// both the `apikey` header and a bearer token.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    key_column: String,
}

impl RestClient {
    pub fn new(config: RestConfig) -> Result<Self> {
        let base_url = config
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or(ClientError::MissingEndpoint)?;
        let api_key = config
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ClientError::MissingCredentials)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            key_column: config.key_column,
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait::async_trait]
impl DataStore for RestClient {
    fn source_identifier(&self) -> String {
        self.base_url.clone()
    }

    async fn fetch_page(&self, table: &str, offset: usize, limit: usize) -> Result<Page> {
        let response = self
            .request(Method::GET, table)
            .query(&[
                ("select", "*".to_owned()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ])
            .header("Prefer", "count=exact")
            .send()
            .await
            .with_context(|| format!("fetch page of {table}"))?;

        // offset past the end of the table
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Page::default());
        }
        let response = ensure_success(response, "fetch", table).await?;

        let total = match response.headers().get(CONTENT_RANGE) {
            Some(value) => parse_content_range(value.to_str().unwrap_or_default())?,
            None => None,
        };
        let rows: Vec<Row> = response
            .json()
            .await
            .with_context(|| format!("decode page of {table}"))?;
        debug!(table, offset, rows = rows.len(), ?total, "page received");
        Ok(Page { rows, total })
    }

    async fn delete_all(&self, table: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, table)
            .query(&[(self.key_column.as_str(), "not.is.null")])
            .header("Prefer", "return=minimal")
            .send()
            .await
            .with_context(|| format!("delete rows of {table}"))?;
        ensure_success(response, "delete", table).await?;
        Ok(())
    }

    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<()> {
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await
            .with_context(|| format!("insert into {table}"))?;
        ensure_success(response, "insert", table).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response, operation: &'static str, table: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        operation,
        table: table.to_owned(),
        status: status.as_u16(),
        body,
    }
    .into())
}

/// Total row count from a `Content-Range` header such as `0-999/2500` or
/// `*/0`. An unknown total (`0-9/*`) yields `None`.
pub fn parse_content_range(raw: &str) -> Result<Option<usize>, ClientError> {
    let invalid = || ClientError::InvalidContentRange(raw.to_owned());
    let (_, total) = raw.trim().rsplit_once('/').ok_or_else(invalid)?;
    if total == "*" {
        return Ok(None);
    }
    total.parse::<usize>().map(Some).map_err(|_| invalid())
}
