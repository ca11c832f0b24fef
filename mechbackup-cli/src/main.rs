//! Command-line frontend for the MechBuild backup core.
//!
//! Talks to the same `BackupService` the HTTP server uses, against the same
//! database and backup directories. Classified operation failures are printed
//! and do not fail the process; only startup problems exit non-zero.

use anyhow::Result;
use clap::{Parser, Subcommand};
use mechbackup::config::AppConfig;
use mechbackup::db::connection::create_pool;
use mechbackup::db::migrate::migrate;
use mechbackup::error::AppError;
use mechbackup::BackupService;

#[derive(Parser, Debug)]
#[command(author, version, about = "MechBuild project backup tool", long_about = None)]
struct Args {
    /// Acting user id
    #[arg(short, long, global = true, default_value = "admin")]
    user: String,

    /// Print raw JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive one project directory
    Create {
        /// Project directory to back up
        source: String,
    },
    /// Extract a backup archive into a target directory
    Restore {
        /// Path to the .tar.gz archive
        backup: String,
        /// Directory to restore into (created if missing)
        target: String,
    },
    /// Back up every project under the projects root
    Auto,
    /// Delete backups older than the given age
    Cleanup {
        /// Age threshold in days; 0 deletes everything
        #[arg(long)]
        max_age_days: Option<i64>,
    },
    /// List backups visible to the acting user
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = AppConfig::from_env();
    std::fs::create_dir_all(&config.data_dir)?;
    let pool = create_pool(&config.db_path.to_string_lossy())?;
    migrate(&pool, &config.data_dir, &config.backups_dir)?;
    let service = BackupService::new(pool, config.clone());

    if let Err(err) = run(&args, &service, &config).await {
        // Classified failures are reported, not fatal.
        eprintln!("Error: {} ({})", err.user_message(), err.kind());
    }

    Ok(())
}

async fn run(args: &Args, service: &BackupService, config: &AppConfig) -> Result<(), AppError> {
    match &args.command {
        Command::Create { source } => {
            let outcome = service.backup_project(source, &args.user).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
            } else {
                println!(
                    "Backup created: {} ({} bytes)",
                    outcome.backup_path, outcome.size_bytes
                );
            }
        }
        Command::Restore { backup, target } => {
            let outcome = service.restore_project(backup, target, &args.user).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
            } else {
                println!("Restored to {} at {}", outcome.restored_path, outcome.timestamp);
            }
        }
        Command::Auto => {
            let outcome = service.auto_backup(&args.user).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
            } else {
                for item in &outcome.backups {
                    match item.status.as_str() {
                        "success" => println!(
                            "  ok    {} -> {}",
                            item.project,
                            item.backup_path.as_deref().unwrap_or("-")
                        ),
                        _ => println!(
                            "  fail  {} ({})",
                            item.project,
                            item.message.as_deref().unwrap_or("unknown error")
                        ),
                    }
                }
                let ok = outcome.backups.iter().filter(|b| b.status == "success").count();
                println!("{}/{} projects backed up", ok, outcome.backups.len());
            }
        }
        Command::Cleanup { max_age_days } => {
            let max_age_ms = match max_age_days {
                Some(days) => days * 24 * 60 * 60 * 1000,
                None => config.default_cleanup_age_ms,
            };
            let outcome = service.cleanup_backups(max_age_ms, &args.user).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
            } else {
                println!("Deleted {} backup(s)", outcome.deleted.len());
                for id in &outcome.deleted {
                    println!("  {}", id);
                }
            }
        }
        Command::List => {
            let records = service.list_backups(&args.user).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&records).unwrap_or_default());
            } else if records.is_empty() {
                println!("No backups found");
            } else {
                for record in &records {
                    println!(
                        "{}  {:>12} bytes  {}  {}",
                        record.created_at, record.size_bytes, record.owner_id, record.archive_path
                    );
                }
            }
        }
    }
    Ok(())
}
