//! MechBackup core library.
//!
//! Project backup/restore for MechBuild: permission-gated archive creation
//! and extraction, a SQLite-backed backup store, and an append-only activity
//! log, shared by the HTTP server and the CLI.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::AppError;
pub use services::orchestrator::BackupService;
