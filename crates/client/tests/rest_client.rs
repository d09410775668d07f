use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hms_backup_client::{RestClient, RestConfig};
use hms_backup_core::{DataStore, Row};
use serde_json::{json, Value};

const KEY: &str = "service-key";

type Tables = Arc<Mutex<HashMap<String, Vec<Value>>>>;

fn authorized(headers: &HeaderMap) -> bool {
    let apikey = headers.get("apikey").and_then(|v| v.to_str().ok());
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    apikey == Some(KEY) && bearer == Some(KEY)
}

async fn select_rows(
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(tables): State<Tables>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "invalid key"}))).into_response();
    }
    let tables = tables.lock().unwrap();
    let Some(rows) = tables.get(&table) else {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "relation does not exist"})))
            .into_response();
    };
    let offset: usize = params.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: usize = params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(usize::MAX);
    let page: Vec<Value> = rows.iter().skip(offset).take(limit).cloned().collect();
    let range = if page.is_empty() {
        format!("*/{}", rows.len())
    } else {
        format!("{}-{}/{}", offset, offset + page.len() - 1, rows.len())
    };
    (StatusCode::PARTIAL_CONTENT, [(header::CONTENT_RANGE, range)], Json(page)).into_response()
}

async fn delete_rows(
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(tables): State<Tables>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if params.get("id").map(String::as_str) != Some("not.is.null") {
        return StatusCode::BAD_REQUEST;
    }
    match tables.lock().unwrap().get_mut(&table) {
        Some(rows) => {
            rows.clear();
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn insert_rows(
    Path(table): Path<String>,
    State(tables): State<Tables>,
    headers: HeaderMap,
    Json(batch): Json<Vec<Value>>,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    match tables.lock().unwrap().get_mut(&table) {
        Some(rows) => {
            rows.extend(batch);
            StatusCode::CREATED
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn start_fake_api(tables: Tables) -> String {
    let app = Router::new()
        .route(
            "/rest/v1/{table}",
            get(select_rows).delete(delete_rows).post(insert_rows),
        )
        .with_state(tables);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn patient(id: i64) -> Value {
    json!({"id": id, "name": format!("patient-{id}")})
}

fn seeded(count: i64) -> Tables {
    let mut tables = HashMap::new();
    tables.insert("patients".to_owned(), (1..=count).map(patient).collect());
    Arc::new(Mutex::new(tables))
}

fn client(base_url: String, key: &str) -> RestClient {
    RestClient::new(RestConfig::new(Some(base_url), Some(key.to_owned()))).unwrap()
}

#[tokio::test]
async fn fetch_page_reads_rows_and_total() {
    let base = start_fake_api(seeded(25)).await;
    let client = client(base.clone(), KEY);

    let page = client.fetch_page("patients", 10, 10).await.unwrap();
    assert_eq!(page.total, Some(25));
    assert_eq!(page.rows.len(), 10);
    assert_eq!(page.rows[0]["id"], 11);
    assert_eq!(client.source_identifier(), base.trim_end_matches('/'));

    let past_end = client.fetch_page("patients", 30, 10).await.unwrap();
    assert!(past_end.rows.is_empty());
    assert_eq!(past_end.total, Some(25));
}

#[tokio::test]
async fn delete_and_insert_replace_table_contents() {
    let tables = seeded(3);
    let base = start_fake_api(tables.clone()).await;
    let client = client(base, KEY);

    client.delete_all("patients").await.unwrap();
    assert!(tables.lock().unwrap()["patients"].is_empty());

    let rows: Vec<Row> = (7..=8)
        .map(|id| patient(id).as_object().cloned().unwrap())
        .collect();
    client.insert_batch("patients", &rows).await.unwrap();
    assert_eq!(tables.lock().unwrap()["patients"], vec![patient(7), patient(8)]);
}

#[tokio::test]
async fn rejected_key_surfaces_status() {
    let base = start_fake_api(seeded(1)).await;
    let client = client(base, "wrong-key");

    let err = client.fetch_page("patients", 0, 10).await.unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("status 401"), "{message}");
    assert!(message.contains("invalid key"), "{message}");
}

#[tokio::test]
async fn unknown_table_is_an_error() {
    let base = start_fake_api(seeded(1)).await;
    let client = client(base, KEY);

    assert!(client.fetch_page("wards", 0, 10).await.is_err());
    assert!(client.delete_all("wards").await.is_err());
}
