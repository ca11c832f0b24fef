use std::path::PathBuf;

pub const DEFAULT_MAX_BACKUP_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB
pub const DEFAULT_CLEANUP_AGE_MS: i64 = 7 * 24 * 60 * 60 * 1000; // 7 days

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub projects_root: PathBuf,
    pub backups_dir: PathBuf,
    pub max_backup_size: u64,
    pub default_cleanup_age_ms: i64,
    /// Optional extension allow-list applied to every archive. Unset means
    /// every file in the project tree is included.
    pub backup_extensions: Option<Vec<String>>,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            db_path: data_dir.join("mechbackup.db"),
            projects_root: PathBuf::from(
                std::env::var("PROJECTS_ROOT").unwrap_or_else(|_| "projects".into()),
            ),
            backups_dir: PathBuf::from(
                std::env::var("BACKUPS_DIR").unwrap_or_else(|_| "backups".into()),
            ),
            data_dir,
            max_backup_size: std::env::var("MAX_BACKUP_SIZE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_BACKUP_SIZE),
            default_cleanup_age_ms: std::env::var("CLEANUP_MAX_AGE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CLEANUP_AGE_MS),
            backup_extensions: std::env::var("BACKUP_EXTENSIONS").ok().map(|v| {
                v.split(',')
                    .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }
}
