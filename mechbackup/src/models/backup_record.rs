use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed archive on disk. Rows are inserted only after the archive
/// file has been fully written and renamed into place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub owner_id: String,
    pub archive_path: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub created_at: String,
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    Ok(BackupRecord {
        id: row.get("id")?,
        owner_id: row.get("user_id")?,
        archive_path: row.get("archive_path")?,
        size_bytes: row.get("size_bytes")?,
        sha256: row.get("sha256")?,
        created_at: row.get("created_at")?,
    })
}

/// Insert a record for a finished archive. Idempotent per archive path: a
/// second insert for the same path returns the existing row untouched.
pub fn create(
    conn: &Connection,
    owner_id: &str,
    archive_path: &str,
    size_bytes: i64,
    sha256: &str,
) -> anyhow::Result<BackupRecord> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO backups (id, user_id, archive_path, size_bytes, sha256, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(archive_path) DO NOTHING",
        params![id, owner_id, archive_path, size_bytes, sha256, now],
    )?;
    find_by_path(conn, archive_path)?
        .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created backup record"))
}

pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backups ORDER BY created_at DESC")?;
    let rows = stmt.query_map([], row_to_record)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_by_owner(conn: &Connection, owner_id: &str) -> anyhow::Result<Vec<BackupRecord>> {
    let mut stmt =
        conn.prepare("SELECT * FROM backups WHERE user_id = ? ORDER BY created_at DESC")?;
    let rows = stmt.query_map(params![owner_id], row_to_record)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backups WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub fn find_by_path(conn: &Connection, archive_path: &str) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backups WHERE archive_path = ?")?;
    let mut rows = stmt.query_map(params![archive_path], row_to_record)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub fn delete(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let changes = conn.execute("DELETE FROM backups WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connection::create_pool, migrate::migrate};
    use tempfile::TempDir;

    fn test_conn(tmp: &TempDir) -> crate::db::connection::DbPool {
        let db_path = tmp.path().join("test.db");
        let pool = create_pool(db_path.to_str().unwrap()).unwrap();
        migrate(&pool, tmp.path(), &tmp.path().join("backups")).unwrap();
        pool
    }

    #[test]
    fn create_is_idempotent_per_path() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let pool = test_conn(&tmp);
        let conn = pool.get()?;

        let first = create(&conn, "admin", "/b/a.tar.gz", 10, "aa")?;
        let second = create(&conn, "admin", "/b/a.tar.gz", 99, "bb")?;

        assert_eq!(first.id, second.id);
        assert_eq!(second.size_bytes, 10);
        assert_eq!(find_all(&conn)?.len(), 1);
        Ok(())
    }

    #[test]
    fn owner_filter_excludes_other_users() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let pool = test_conn(&tmp);
        let conn = pool.get()?;
        crate::models::user::create(&conn, "user-1", "User One", "engineer")?;

        create(&conn, "admin", "/b/admin.tar.gz", 1, "aa")?;
        create(&conn, "user-1", "/b/user.tar.gz", 1, "bb")?;

        let mine = find_by_owner(&conn, "user-1")?;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].owner_id, "user-1");
        assert_eq!(find_all(&conn)?.len(), 2);
        Ok(())
    }
}
