use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Application error taxonomy. Every orchestrator entry point classifies
/// failures into one of these variants before returning to the caller.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Filesystem(String),

    #[error("{0}")]
    Database(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Wire-level type string, shared by the REST API and the activity log.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Authentication(_) => "authentication",
            AppError::Authorization(_) => "authorization",
            AppError::NotFound(_) => "not_found",
            AppError::Filesystem(_) => "filesystem",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "system",
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Authentication(_) => 401,
            AppError::Authorization(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Filesystem(_) | AppError::Database(_) | AppError::Internal(_) => 500,
        }
    }

    /// Message safe to hand to the caller. Database and internal failures get
    /// a generic message; their full detail is only available via `details()`.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Database(_) => "Database error".into(),
            AppError::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> Option<String> {
        match self {
            AppError::Database(d) => Some(d.clone()),
            AppError::Internal(e) => Some(format!("{e:#}")),
            _ => None,
        }
    }

    /// Classify an I/O failure: missing paths are `not_found`, everything
    /// else is a `filesystem` error.
    pub fn from_io(err: std::io::Error, context: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(format!("{context}: not found")),
            _ => AppError::Filesystem(format!("{context}: {err}")),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(details) = self.details() {
            tracing::error!(kind = self.kind(), "{details}");
        }
        let status =
            StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "message": self.user_message(),
            "type": self.kind(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}
