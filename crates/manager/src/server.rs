use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hms_backup_storage::report::{render_report, REPORT_FILE};
use hms_backup_storage::{is_snapshot_id, BackupRunOutcome, Scheduler, SnapshotRepository};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cli::BackupLabel;

const BACKUP_GATE_SECONDS: i64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub repo: SnapshotRepository,
    pub scheduler: Arc<Scheduler>,
    pub backup_gate: Arc<Mutex<Option<DateTime<Utc>>>>,
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, api_token: Option<String>) -> Self {
        Self {
            repo: scheduler.repository().clone(),
            scheduler,
            backup_gate: Arc::new(Mutex::new(None)),
            api_token,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/snapshots", get(api_list_snapshots))
        .route("/api/v1/snapshots/{id}", get(api_snapshot_detail))
        .route("/api/v1/snapshots/{id}/report", get(snapshot_report))
        .route("/api/v1/snapshots/{id}/download", get(download_snapshot))
        .route("/api/v1/backups", post(trigger_backup))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

fn require_api_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.api_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// 400 for names outside the snapshot naming scheme, 404 for unknown ones.
fn snapshot_dir(state: &AppState, id: &str) -> Result<PathBuf, StatusCode> {
    if !is_snapshot_id(id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let dir = state.repo.snapshot_dir(id);
    if !dir.is_dir() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(dir)
}

async fn api_list_snapshots(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<serde_json::Value>>, StatusCode> {
    require_api_auth(&state, &headers)?;
    let ids = state
        .repo
        .list_snapshots()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let latest = state.repo.latest_pointer();
    let json = ids
        .into_iter()
        .map(|id| {
            let is_latest = latest.as_deref() == Some(id.as_str());
            match state.repo.load_snapshot(&id) {
                Ok(snapshot) => serde_json::json!({
                    "id": id,
                    "date": snapshot.metadata.date,
                    "label": snapshot.metadata.label,
                    "total_records": snapshot.total_records(),
                    "failed_tables": snapshot.failed_tables(),
                    "latest": is_latest,
                }),
                Err(_) => serde_json::json!({
                    "id": id,
                    "date": null,
                    "label": null,
                    "total_records": null,
                    "failed_tables": null,
                    "latest": is_latest,
                }),
            }
        })
        .collect();
    Ok(Json(json))
}

async fn api_snapshot_detail(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    require_api_auth(&state, &headers)?;
    snapshot_dir(&state, &id)?;
    let snapshot = state
        .repo
        .load_snapshot(&id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::json!(snapshot.metadata)))
}

async fn snapshot_report(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    require_api_auth(&state, &headers)?;
    let dir = snapshot_dir(&state, &id)?;
    let report = match std::fs::read_to_string(dir.join(REPORT_FILE)) {
        Ok(report) => report,
        // the report is best effort at write time; rebuild it from metadata
        Err(_) => state
            .repo
            .load_snapshot(&id)
            .and_then(|snapshot| render_report(&snapshot))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    };
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/markdown; charset=utf-8"),
        )],
        report,
    )
        .into_response())
}

async fn download_snapshot(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    require_api_auth(&state, &headers)?;
    let dir = snapshot_dir(&state, &id)?;

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(&id, &dir)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let tar_data = builder
        .into_inner()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let compressed = zstd::encode_all(tar_data.as_slice(), 3)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename={id}.tar.zst"))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut response = compressed.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zstd"),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct TriggerParams {
    label: Option<String>,
}

async fn trigger_backup(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    require_api_auth(&state, &headers)?;
    let label = match params.label.as_deref() {
        Some(raw) => BackupLabel::parse(raw).ok_or(StatusCode::BAD_REQUEST)?,
        None => BackupLabel::Manual,
    };

    let mut gate = state.backup_gate.lock().await;
    if let Some(last) = *gate {
        if (Utc::now() - last).num_seconds() < BACKUP_GATE_SECONDS {
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    // stamped before the run so a dropped request still counts
    *gate = Some(Utc::now());
    info!(%label, "backup requested over http");
    let outcome = state.scheduler.run_scheduled_backup(label.as_str()).await;

    let response = match outcome {
        BackupRunOutcome::Succeeded { snapshot, pruned } => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "succeeded",
                "snapshot": snapshot.id,
                "total_records": snapshot.total_records(),
                "failed_tables": snapshot.failed_tables(),
                "pruned": pruned,
            })),
        ),
        BackupRunOutcome::Failed { error } => {
            warn!(%label, error = %error, "backup requested over http failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "failed", "error": error })),
            )
        }
    };
    Ok(response.into_response())
}
