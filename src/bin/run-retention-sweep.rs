//! CLI tool for running retention sweeps
//!
//! This binary can be invoked by cron to enforce registered retention
//! policies outside the in-process scheduler.
//!
//! Usage:
//!   run-retention-sweep [--config <path>] [--entity-type <name>]
//!
//! Options:
//!   --config       Path to configuration file (default: config/config.yaml)
//!   --entity-type  Sweep a single entity type's policy instead of all policies
//!   --dry-run      Show registered policies and cutoffs without acting
//!   --verbose      Enable verbose output
//!
//! Example cron entry (run daily at 03:00):
//!   0 3 * * * /usr/local/bin/run-retention-sweep --config /etc/datatrail/config.yaml

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use datatrail::db::{self, RetentionRepository, SqliteEntityStore};
use datatrail::services::RetentionSweeper;
use datatrail::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut entity_type: Option<String> = None;
    let mut dry_run = false;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--entity-type" => {
                if i + 1 < args.len() {
                    entity_type = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--dry-run" => {
                dry_run = true;
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    // Initialize logging
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Datatrail - Retention Sweep Runner");

    // Load configuration
    if let Some(path) = config_path {
        info!("Config file: {}", path.display());
        env::set_var("DATATRAIL_CONFIG", path.to_str().unwrap_or(""));
    }
    let config = AppConfig::load()?;

    // Connect to database and run migrations
    let pool = db::init_pool(&config.database).await?;
    info!("Connected to database: {}", config.database.url);

    if dry_run {
        info!("Dry run mode - showing what would be swept");

        let repo = RetentionRepository::new(&pool);
        let policies = if let Some(ref entity_type) = entity_type {
            repo.get_policy(entity_type).await?.into_iter().collect()
        } else {
            repo.list_policies().await?
        };

        if policies.is_empty() {
            println!("No retention policies registered");
        } else {
            println!("Policies that would be swept:");
            let now = Utc::now();
            for policy in policies {
                println!(
                    "  - {} ({} {} older than {}, last run: {})",
                    policy.entity_type,
                    policy.action,
                    policy.target,
                    policy.cutoff(now),
                    policy
                        .last_run_at
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string()),
                );
            }
        }
        return Ok(());
    }

    // Execute sweeps
    let entities = Arc::new(SqliteEntityStore::new(pool.clone()));
    let sweeper = RetentionSweeper::new(pool.clone(), entities, config.retention.clone());

    let outcomes = if let Some(ref entity_type) = entity_type {
        info!("Sweeping single entity type: {entity_type}");
        vec![sweeper.run_entity_type(entity_type).await?]
    } else {
        info!("Sweeping all registered policies");
        sweeper.run_all().await?
    };

    // Report results
    let failed = outcomes
        .iter()
        .filter(|o| o.error.is_some() || o.failed > 0)
        .count();

    if outcomes.is_empty() {
        info!("No retention policies registered");
    } else {
        for outcome in &outcomes {
            if let Some(ref err) = outcome.error {
                error!("  [FAIL] {}: {}", outcome.entity_type, err);
            } else if outcome.skipped {
                info!("  [SKIP] {} (sweep already in flight)", outcome.entity_type);
            } else {
                info!(
                    "  [OK] {} {} affected {} rows ({} failed) in {}ms",
                    outcome.entity_type,
                    outcome.action,
                    outcome.affected,
                    outcome.failed,
                    outcome.duration_ms
                );
            }
        }
    }

    // Exit with error code if any failed
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn print_help() {
    println!("Datatrail - Retention Sweep Runner");
    println!();
    println!("Usage:");
    println!("  run-retention-sweep [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <path>       Path to configuration file (default: config/config.yaml)");
    println!("  --entity-type <name>  Sweep a single entity type's policy");
    println!("  --dry-run             Show registered policies and cutoffs without acting");
    println!("  -v, --verbose         Enable verbose output");
    println!("  -h, --help            Show this help message");
    println!();
    println!("Example cron entry:");
    println!("  # Run daily at 03:00");
    println!("  0 3 * * * /usr/local/bin/run-retention-sweep --config /etc/datatrail/config.yaml");
}
