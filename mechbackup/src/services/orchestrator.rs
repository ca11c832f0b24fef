//! Backup orchestration: ties the permission checker, archive codec, backup
//! store and activity log together behind one service type.
//!
//! Every public operation classifies its failures and appends an `error`
//! activity entry before returning; activity-log failures never mask the
//! original error. Archive writes go to a temp path first, are renamed into
//! place, and only then recorded, so a reader can never observe a record
//! whose file is not fully written.

use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::activity_log::{self, ActivityLogEntry, LogAction};
use crate::models::backup_record::{self, BackupRecord};
use crate::models::user;
use crate::services::archive::{self, ArchiveOptions};
use crate::services::permissions::{self, Action, Role};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// In-flight temp files younger than this are never swept by cleanup, even
/// with a zero max age.
const TMP_SWEEP_GRACE_MS: i64 = 60 * 60 * 1000;

#[derive(Clone)]
pub struct BackupService {
    db: DbPool,
    config: AppConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub status: String,
    pub backup_id: String,
    pub backup_path: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub status: String,
    pub restored_path: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoBackupItem {
    pub project: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoBackupOutcome {
    pub status: String,
    pub backups: Vec<AutoBackupItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOutcome {
    pub status: String,
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub status: String,
    pub deleted: String,
}

impl BackupService {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        Self { db, config }
    }

    pub fn default_cleanup_age_ms(&self) -> i64 {
        self.config.default_cleanup_age_ms
    }

    fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            max_source_size: self.config.max_backup_size,
            extension_filter: self.config.backup_extensions.clone(),
        }
    }

    /// Archive one project directory for `user_id` and record it.
    pub async fn backup_project(
        &self,
        source_path: &str,
        user_id: &str,
    ) -> Result<BackupOutcome, AppError> {
        let backups_dir = self.config.backups_dir.clone();
        let options = self.archive_options();
        let source = source_path.to_string();
        let uid = user_id.to_string();
        self.run(Some(user_id), move |db| {
            do_backup(db, &backups_dir, &options, &source, &uid)
        })
        .await
    }

    /// Extract an existing archive into `target_path`, verifying its stored
    /// hash when the archive is tracked by the store.
    pub async fn restore_project(
        &self,
        backup_path: &str,
        target_path: &str,
        user_id: &str,
    ) -> Result<RestoreOutcome, AppError> {
        let backup = backup_path.to_string();
        let target = target_path.to_string();
        let uid = user_id.to_string();
        self.run(Some(user_id), move |db| do_restore(db, &backup, &target, &uid))
            .await
    }

    /// Back up every project directory under the configured projects root.
    /// One failing project never aborts the others; each outcome is reported.
    pub async fn auto_backup(&self, user_id: &str) -> Result<AutoBackupOutcome, AppError> {
        let projects_root = self.config.projects_root.clone();
        let uid = user_id.to_string();
        let projects = self
            .run(Some(user_id), move |db| {
                let conn = db.get()?;
                permissions::require_permission(&conn, &uid, Action::Auto)?;
                enumerate_projects(&projects_root)
            })
            .await?;

        let mut items = Vec::with_capacity(projects.len());
        for project in projects {
            let name = project
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| project.display().to_string());
            match self
                .backup_project(&project.to_string_lossy(), user_id)
                .await
            {
                Ok(outcome) => items.push(AutoBackupItem {
                    project: name,
                    status: "success".into(),
                    backup_path: Some(outcome.backup_path),
                    size_bytes: Some(outcome.size_bytes),
                    message: None,
                }),
                Err(err) => items.push(AutoBackupItem {
                    project: name,
                    status: "error".into(),
                    backup_path: None,
                    size_bytes: None,
                    message: Some(err.user_message()),
                }),
            }
        }

        let succeeded = items.iter().filter(|i| i.status == "success").count();
        let failed = items.len() - succeeded;
        let uid = user_id.to_string();
        let details = json!({ "succeeded": succeeded, "failed": failed });
        self.run(Some(user_id), move |db| {
            let conn = db.get()?;
            log_entry(&conn, Some(&uid), LogAction::BackupAuto, &details);
            Ok(())
        })
        .await?;

        Ok(AutoBackupOutcome {
            status: "success".into(),
            backups: items,
        })
    }

    /// Delete every backup whose age is at least `max_age_ms`. A max age of
    /// zero deletes everything.
    pub async fn cleanup_backups(
        &self,
        max_age_ms: i64,
        user_id: &str,
    ) -> Result<CleanupOutcome, AppError> {
        let backups_dir = self.config.backups_dir.clone();
        let uid = user_id.to_string();
        self.run(Some(user_id), move |db| {
            do_cleanup(db, &backups_dir, max_age_ms, &uid)
        })
        .await
    }

    /// Records visible to `user_id`: all of them for admins, own otherwise.
    /// Orphan records (file gone) are filtered out, not surfaced.
    pub async fn list_backups(&self, user_id: &str) -> Result<Vec<BackupRecord>, AppError> {
        let uid = user_id.to_string();
        self.run(Some(user_id), move |db| {
            let conn = db.get()?;
            let records = if is_admin(&conn, &uid)? {
                backup_record::find_all(&conn).map_err(|e| AppError::Database(e.to_string()))?
            } else {
                backup_record::find_by_owner(&conn, &uid)
                    .map_err(|e| AppError::Database(e.to_string()))?
            };
            Ok(records
                .into_iter()
                .filter(|r| {
                    let present = Path::new(&r.archive_path).is_file();
                    if !present {
                        tracing::warn!(id = %r.id, path = %r.archive_path, "Orphan backup record hidden from listing");
                    }
                    present
                })
                .collect())
        })
        .await
    }

    /// Explicit single deletion by archive filename, for the REST DELETE
    /// endpoint. Allowed for the record owner or an admin.
    pub async fn delete_backup(
        &self,
        filename: &str,
        user_id: &str,
    ) -> Result<DeleteOutcome, AppError> {
        let name = filename.to_string();
        let uid = user_id.to_string();
        self.run(Some(user_id), move |db| do_delete(db, &name, &uid))
            .await
    }

    /// Recent audit entries; admin only.
    pub async fn activity(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, AppError> {
        let uid = user_id.to_string();
        self.run(Some(user_id), move |db| {
            let conn = db.get()?;
            if !is_admin(&conn, &uid)? {
                return Err(AppError::Authorization(
                    "Permission denied for activity log".into(),
                ));
            }
            activity_log::find_recent(&conn, limit).map_err(|e| AppError::Database(e.to_string()))
        })
        .await
    }

    /// Run a blocking operation; on failure, classify it and append an
    /// `error` activity entry before handing the error back.
    async fn run<T, F>(&self, user_id: Option<&str>, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&DbPool) -> Result<T, AppError> + Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))
            .and_then(|r| r);

        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let db = self.db.clone();
                let uid = user_id.map(str::to_string);
                let details = json!({
                    "type": err.kind(),
                    "code": err.code(),
                    "message": err.user_message(),
                    "details": err.details(),
                });
                let logged = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
                    let conn = db.get()?;
                    activity_log::append(&conn, uid.as_deref(), LogAction::Error, &details)
                })
                .await;
                match logged {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Failed to append error activity entry: {e}"),
                    Err(e) => tracing::warn!("Activity log task failed: {e}"),
                }
                Err(err)
            }
        }
    }
}

fn is_admin(conn: &rusqlite::Connection, user_id: &str) -> Result<bool, AppError> {
    let user = user::find_by_id(conn, user_id)
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| AppError::Authentication(format!("User not found: {user_id}")))?;
    Ok(Role::parse(&user.role) == Some(Role::Admin))
}

/// Append an audit entry, reporting failures only to the local log.
fn log_entry(
    conn: &rusqlite::Connection,
    user_id: Option<&str>,
    action: LogAction,
    details: &serde_json::Value,
) {
    if let Err(e) = activity_log::append(conn, user_id, action, details) {
        tracing::warn!(action = action.as_str(), "Failed to append activity log entry: {e}");
    }
}

/// ISO timestamp with ':' and '.' flattened for filesystem safety, plus a
/// random suffix so two same-second backups never collide.
fn archive_file_name() -> String {
    let ts = Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    let uuid = Uuid::new_v4().simple().to_string();
    format!("backup-{ts}-{}.tar.gz", &uuid[..8])
}

fn do_backup(
    db: &DbPool,
    backups_dir: &Path,
    options: &ArchiveOptions,
    source_path: &str,
    user_id: &str,
) -> Result<BackupOutcome, AppError> {
    if source_path.trim().is_empty() {
        return Err(AppError::Validation("Source path is required".into()));
    }
    if user_id.trim().is_empty() {
        return Err(AppError::Authentication("User id is required".into()));
    }

    let conn = db.get()?;
    permissions::require_permission(&conn, user_id, Action::Create)?;

    let source = Path::new(source_path);
    if !source.is_dir() {
        return Err(AppError::NotFound("Project directory not found".into()));
    }

    let user_dir = backups_dir.join(user_id);
    std::fs::create_dir_all(&user_dir)
        .map_err(|e| AppError::Filesystem(format!("Failed to create backup directory: {e}")))?;

    let file_name = archive_file_name();
    let final_path = user_dir.join(&file_name);
    let tmp_path = user_dir.join(format!(".{file_name}.tmp"));

    // Write fully to the temp path, then rename, then record. A failure at
    // any point leaves no store row and at worst a temp file for cleanup.
    let staged = archive::create_archive(source, &tmp_path, options)
        .and_then(|size| archive::file_sha256(&tmp_path).map(|sha| (size, sha)));
    let (size, sha256) = match staged {
        Ok(v) => v,
        Err(err) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err);
        }
    };
    std::fs::rename(&tmp_path, &final_path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        AppError::Filesystem(format!("Failed to move archive into place: {e}"))
    })?;

    let archive_path = final_path.to_string_lossy().into_owned();
    let record = match backup_record::create(&conn, user_id, &archive_path, size as i64, &sha256) {
        Ok(record) => record,
        Err(e) => {
            // No archive may linger without a row either.
            let _ = std::fs::remove_file(&final_path);
            return Err(AppError::Database(e.to_string()));
        }
    };

    log_entry(
        &conn,
        Some(user_id),
        LogAction::BackupCreated,
        &json!({
            "backupId": record.id,
            "backupPath": record.archive_path,
            "sizeBytes": record.size_bytes,
        }),
    );

    Ok(BackupOutcome {
        status: "success".into(),
        backup_id: record.id,
        backup_path: record.archive_path,
        size_bytes: record.size_bytes,
    })
}

fn do_restore(
    db: &DbPool,
    backup_path: &str,
    target_path: &str,
    user_id: &str,
) -> Result<RestoreOutcome, AppError> {
    if backup_path.trim().is_empty() || target_path.trim().is_empty() {
        return Err(AppError::Validation(
            "Backup path and target path are required".into(),
        ));
    }

    let conn = db.get()?;
    permissions::require_permission(&conn, user_id, Action::Restore)?;

    let archive_path = Path::new(backup_path);
    if !archive_path.is_file() {
        return Err(AppError::NotFound("Backup file not found".into()));
    }

    // Integrity gate: a tracked archive must still match its recorded hash.
    if let Some(record) =
        backup_record::find_by_path(&conn, backup_path).map_err(|e| AppError::Database(e.to_string()))?
    {
        if !record.sha256.is_empty() {
            let actual = archive::file_sha256(archive_path)?;
            if actual != record.sha256 {
                return Err(AppError::Filesystem(
                    "Backup archive failed integrity check".into(),
                ));
            }
        }
    }

    archive::extract_archive(archive_path, Path::new(target_path))?;

    let timestamp = Utc::now().to_rfc3339();
    log_entry(
        &conn,
        Some(user_id),
        LogAction::BackupRestored,
        &json!({ "backupPath": backup_path, "restoredPath": target_path }),
    );

    Ok(RestoreOutcome {
        status: "success".into(),
        restored_path: target_path.to_string(),
        timestamp,
    })
}

fn enumerate_projects(projects_root: &Path) -> Result<Vec<PathBuf>, AppError> {
    if !projects_root.is_dir() {
        return Err(AppError::NotFound(format!(
            "Projects root not found: {}",
            projects_root.display()
        )));
    }
    let mut projects: Vec<PathBuf> = std::fs::read_dir(projects_root)
        .map_err(|e| AppError::Filesystem(format!("Failed to read projects root: {e}")))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect();
    projects.sort();
    Ok(projects)
}

fn do_cleanup(
    db: &DbPool,
    backups_dir: &Path,
    max_age_ms: i64,
    user_id: &str,
) -> Result<CleanupOutcome, AppError> {
    if max_age_ms < 0 {
        return Err(AppError::Validation("maxAgeMs must not be negative".into()));
    }

    let conn = db.get()?;
    permissions::require_permission(&conn, user_id, Action::Cleanup)?;

    let now = Utc::now();
    let mut deleted = Vec::new();

    let records =
        backup_record::find_all(&conn).map_err(|e| AppError::Database(e.to_string()))?;
    for record in records {
        let created = match DateTime::parse_from_rfc3339(&record.created_at) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(id = %record.id, "Unparsable backup timestamp, skipping: {e}");
                continue;
            }
        };
        let age_ms = (now - created).num_milliseconds();
        if age_ms < max_age_ms {
            continue;
        }

        match std::fs::remove_file(&record.archive_path) {
            Ok(()) => {}
            // An orphan row with no file still gets dropped.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %record.archive_path, "Failed to delete archive, keeping record: {e}");
                continue;
            }
        }
        backup_record::delete(&conn, &record.id).map_err(|e| AppError::Database(e.to_string()))?;
        deleted.push(record.id);
    }

    sweep_stale_temp_files(backups_dir, max_age_ms, now);

    log_entry(
        &conn,
        Some(user_id),
        LogAction::BackupCleanup,
        &json!({ "deletedCount": deleted.len(), "maxAgeMs": max_age_ms }),
    );

    Ok(CleanupOutcome {
        status: "success".into(),
        deleted,
    })
}

/// Remove leftover temp files from interrupted archive writes. A grace
/// period keeps in-flight writes safe even when max age is zero.
fn sweep_stale_temp_files(backups_dir: &Path, max_age_ms: i64, now: DateTime<Utc>) {
    let threshold_ms = max_age_ms.max(TMP_SWEEP_GRACE_MS);
    let Ok(user_dirs) = std::fs::read_dir(backups_dir) else {
        return;
    };
    for user_dir in user_dirs.filter_map(|e| e.ok()) {
        let Ok(entries) = std::fs::read_dir(user_dir.path()) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.starts_with('.') && name.ends_with(".tmp")) {
                continue;
            }
            let age_ms = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .map(|mtime| (now - DateTime::<Utc>::from(mtime)).num_milliseconds());
            if age_ms.is_some_and(|age| age >= threshold_ms) {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    tracing::warn!(path = %entry.path().display(), "Failed to sweep temp file: {e}");
                } else {
                    tracing::info!(path = %entry.path().display(), "Swept stale temp file");
                }
            }
        }
    }
}

fn do_delete(db: &DbPool, filename: &str, user_id: &str) -> Result<DeleteOutcome, AppError> {
    if filename.trim().is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(AppError::Validation("Invalid backup filename".into()));
    }

    let conn = db.get()?;
    let admin = is_admin(&conn, user_id)?;

    let records =
        backup_record::find_all(&conn).map_err(|e| AppError::Database(e.to_string()))?;
    let record = records
        .into_iter()
        .find(|r| {
            Path::new(&r.archive_path)
                .file_name()
                .is_some_and(|n| n.to_string_lossy() == filename)
        })
        .ok_or_else(|| AppError::NotFound("Backup not found".into()))?;

    if !admin && record.owner_id != user_id {
        return Err(AppError::Authorization(
            "Permission denied for backup deletion".into(),
        ));
    }

    match std::fs::remove_file(&record.archive_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(AppError::Filesystem(format!(
                "Failed to delete archive: {e}"
            )))
        }
    }
    backup_record::delete(&conn, &record.id).map_err(|e| AppError::Database(e.to_string()))?;

    log_entry(
        &conn,
        Some(user_id),
        LogAction::BackupDeleted,
        &json!({ "backupId": record.id, "backupPath": record.archive_path }),
    );

    Ok(DeleteOutcome {
        status: "success".into(),
        deleted: record.id,
    })
}
