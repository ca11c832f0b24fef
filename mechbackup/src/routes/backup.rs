//! REST glue for the backup orchestrator. Handlers only extract the caller
//! identity and forward; all policy lives in the service layer.

use crate::error::AppError;
use crate::models::activity_log::ActivityLogEntry;
use crate::models::backup_record::BackupRecord;
use crate::services::orchestrator::{
    AutoBackupOutcome, BackupOutcome, CleanupOutcome, DeleteOutcome, RestoreOutcome,
};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create", post(create_backup))
        .route("/restore", post(restore_backup))
        .route("/auto", post(auto_backup))
        .route("/cleanup", post(cleanup_backups))
        .route("/list", get(list_backups))
        .route("/delete/{filename}", delete(delete_backup))
        .route("/activity", get(activity))
}

/// The bearer token is the caller's user id; token exchange happens in the
/// outer auth layer, which is out of scope here.
fn bearer_user(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Authentication("Missing bearer token".into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBackupBody {
    source_path: String,
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBackupBody>,
) -> Result<Json<BackupOutcome>, AppError> {
    let user_id = bearer_user(&headers)?;
    let outcome = state.backups.backup_project(&body.source_path, &user_id).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreBackupBody {
    backup_path: String,
    target_path: String,
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RestoreBackupBody>,
) -> Result<Json<RestoreOutcome>, AppError> {
    let user_id = bearer_user(&headers)?;
    let outcome = state
        .backups
        .restore_project(&body.backup_path, &body.target_path, &user_id)
        .await?;
    Ok(Json(outcome))
}

async fn auto_backup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AutoBackupOutcome>, AppError> {
    let user_id = bearer_user(&headers)?;
    let outcome = state.backups.auto_backup(&user_id).await?;
    Ok(Json(outcome))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<BackupRecord>>, AppError> {
    let user_id = bearer_user(&headers)?;
    let records = state.backups.list_backups(&user_id).await?;
    Ok(Json(records))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Json<DeleteOutcome>, AppError> {
    let user_id = bearer_user(&headers)?;
    let outcome = state.backups.delete_backup(&filename, &user_id).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct ActivityQuery {
    limit: Option<usize>,
}

async fn activity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityLogEntry>>, AppError> {
    let user_id = bearer_user(&headers)?;
    let entries = state
        .backups
        .activity(&user_id, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(entries))
}

/// Cleanup is exposed on the API too so dashboards can trigger it manually.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupBody {
    max_age_ms: Option<i64>,
}

async fn cleanup_backups(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CleanupBody>,
) -> Result<Json<CleanupOutcome>, AppError> {
    let user_id = bearer_user(&headers)?;
    let max_age_ms = body
        .max_age_ms
        .unwrap_or_else(|| state.backups.default_cleanup_age_ms());
    let outcome = state.backups.cleanup_backups(max_age_ms, &user_id).await?;
    Ok(Json(outcome))
}
