//! Role-based access checks for backup operations.
//!
//! Grants are derived from the user's role at check time; there is no grant
//! table. Unknown users, roles, and actions all deny.

use crate::error::AppError;
use crate::models::user;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Engineer,
    Operator,
    Viewer,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "engineer" => Some(Role::Engineer),
            "operator" => Some(Role::Operator),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Restore,
    Auto,
    Cleanup,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "backup:create",
            Action::Restore => "backup:restore",
            Action::Auto => "backup:auto",
            Action::Cleanup => "backup:cleanup",
        }
    }
}

/// Static allow-list per role. Admin bypasses the list entirely.
fn role_allows(role: Role, action: Action) -> bool {
    match role {
        Role::Admin => true,
        Role::Engineer => matches!(action, Action::Create | Action::Restore),
        Role::Operator => matches!(action, Action::Create),
        Role::Viewer => false,
    }
}

/// Resolve whether `user_id` may perform `action`. Fails with an
/// authentication error when the user does not exist; a role string the
/// database holds but this build does not know denies.
pub fn has_permission(conn: &Connection, user_id: &str, action: Action) -> Result<bool, AppError> {
    let user = user::find_by_id(conn, user_id)
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| AppError::Authentication(format!("User not found: {user_id}")))?;

    Ok(Role::parse(&user.role).is_some_and(|role| role_allows(role, action)))
}

pub fn require_permission(conn: &Connection, user_id: &str, action: Action) -> Result<(), AppError> {
    if has_permission(conn, user_id, action)? {
        Ok(())
    } else {
        Err(AppError::Authorization(format!(
            "Permission denied for {}",
            action.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connection::create_pool, migrate::migrate};
    use tempfile::TempDir;

    const ALL_ACTIONS: [Action; 4] = [Action::Create, Action::Restore, Action::Auto, Action::Cleanup];

    fn test_pool(tmp: &TempDir) -> crate::db::connection::DbPool {
        let db_path = tmp.path().join("test.db");
        let pool = create_pool(db_path.to_str().unwrap()).unwrap();
        migrate(&pool, tmp.path(), &tmp.path().join("backups")).unwrap();
        pool
    }

    #[test]
    fn admin_passes_every_action() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let pool = test_pool(&tmp);
        let conn = pool.get()?;

        for action in ALL_ACTIONS {
            assert!(has_permission(&conn, "admin", action)?);
        }
        Ok(())
    }

    #[test]
    fn roles_fail_closed() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let pool = test_pool(&tmp);
        let conn = pool.get()?;
        user::create(&conn, "eng", "Engineer", "engineer")?;
        user::create(&conn, "op", "Operator", "operator")?;
        user::create(&conn, "view", "Viewer", "viewer")?;

        assert!(has_permission(&conn, "eng", Action::Create)?);
        assert!(has_permission(&conn, "eng", Action::Restore)?);
        assert!(!has_permission(&conn, "eng", Action::Auto)?);
        assert!(!has_permission(&conn, "eng", Action::Cleanup)?);

        assert!(has_permission(&conn, "op", Action::Create)?);
        assert!(!has_permission(&conn, "op", Action::Restore)?);

        for action in ALL_ACTIONS {
            assert!(!has_permission(&conn, "view", action)?);
        }
        Ok(())
    }

    #[test]
    fn unknown_user_is_an_authentication_error() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let pool = test_pool(&tmp);
        let conn = pool.get()?;

        let err = has_permission(&conn, "ghost", Action::Create).unwrap_err();
        assert_eq!(err.kind(), "authentication");

        let err = require_permission(&conn, "ghost", Action::Create).unwrap_err();
        assert_eq!(err.kind(), "authentication");
        Ok(())
    }

    #[test]
    fn denied_action_is_an_authorization_error() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let pool = test_pool(&tmp);
        let conn = pool.get()?;
        user::create(&conn, "view", "Viewer", "viewer")?;

        let err = require_permission(&conn, "view", Action::Restore).unwrap_err();
        assert_eq!(err.kind(), "authorization");
        Ok(())
    }
}
