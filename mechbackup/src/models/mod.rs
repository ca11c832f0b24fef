pub mod activity_log;
pub mod backup_record;
pub mod user;
