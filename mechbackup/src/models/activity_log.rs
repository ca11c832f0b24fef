use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit actions recorded for every backup-relevant operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    BackupCreated,
    BackupRestored,
    BackupAuto,
    BackupCleanup,
    BackupDeleted,
    Error,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::BackupCreated => "backup_created",
            LogAction::BackupRestored => "backup_restored",
            LogAction::BackupAuto => "backup_auto",
            LogAction::BackupCleanup => "backup_cleanup",
            LogAction::BackupDeleted => "backup_deleted",
            LogAction::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: String,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<ActivityLogEntry> {
    let details: String = row.get("details")?;
    Ok(ActivityLogEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        action: row.get("action")?,
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at")?,
    })
}

/// Append an entry. The table is append-only; nothing ever updates or
/// deletes rows through this module.
pub fn append(
    conn: &Connection,
    user_id: Option<&str>,
    action: LogAction,
    details: &serde_json::Value,
) -> anyhow::Result<()> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO activity_logs (id, user_id, action, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, user_id, action.as_str(), details.to_string(), now],
    )?;
    Ok(())
}

pub fn find_recent(conn: &Connection, limit: usize) -> anyhow::Result<Vec<ActivityLogEntry>> {
    let mut stmt =
        conn.prepare("SELECT * FROM activity_logs ORDER BY created_at DESC LIMIT ?")?;
    let rows = stmt.query_map(params![limit as i64], row_to_entry)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_by_action(conn: &Connection, action: LogAction) -> anyhow::Result<Vec<ActivityLogEntry>> {
    let mut stmt =
        conn.prepare("SELECT * FROM activity_logs WHERE action = ? ORDER BY created_at DESC")?;
    let rows = stmt.query_map(params![action.as_str()], row_to_entry)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
