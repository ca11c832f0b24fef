use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::services::orchestrator::BackupService;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub backups: BackupService,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let backups = BackupService::new(db.clone(), config.clone());
        Self { db, config, backups }
    }
}
