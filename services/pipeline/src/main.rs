//! Pipeline Service - Turns raw open-data CSVs into canonical regional tables
//!
//! Responsibilities:
//! - Load raw budgets, communes and payroll files written by the collector
//! - Clean, canonicalize and cross-join them
//! - Replace stored tables in one transaction
//! - Track job runs for auditing
//!
//! Usage:
//!   # One run against the database:
//!   cargo run --bin pipeline
//!
//!   # No database, write CSVs instead:
//!   cargo run --bin pipeline -- --dry-run --export-dir ./data/out
//!
//!   # Every 6 hours:
//!   cargo run --bin pipeline -- --every-hours 6

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use pipeline::pipeline::{export_csv, load_raw_tables, process, PipelineCounts};
use pipeline::scheduler::{interval_from_hours, Scheduler};
use pipeline::store::{
    create_job_run, ensure_schema, finish_job_run, store_output, StoreCounts, STATUS_FAILED,
    STATUS_OK,
};

#[derive(Parser, Debug)]
#[command(name = "pipeline", about = "Cleans and cross-joins regional open data")]
struct Args {
    /// Directory holding the raw CSV files (overrides RAW_FS_DIR)
    #[arg(long)]
    raw_dir: Option<PathBuf>,

    /// Dry run - don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Also write canonical tables as CSV into this directory
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Run on a schedule, every N hours (overrides SCHEDULE_INTERVAL_HOURS)
    #[arg(long)]
    every_hours: Option<f64>,
}

#[derive(Debug, Clone)]
struct Config {
    db_url: Option<String>,
    raw_fs_dir: PathBuf,
    schedule_interval_hours: Option<f64>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let schedule_interval_hours = match std::env::var("SCHEDULE_INTERVAL_HOURS") {
            Ok(v) if !v.trim().is_empty() => Some(
                v.trim()
                    .parse()
                    .context("SCHEDULE_INTERVAL_HOURS must be a number")?,
            ),
            _ => None,
        };
        Ok(Self {
            db_url: std::env::var("DB_URL").ok(),
            raw_fs_dir: PathBuf::from(
                std::env::var("RAW_FS_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
            schedule_interval_hours,
        })
    }
}

/// Everything one run needs, resolved from args and environment.
struct Runner {
    raw_dir: PathBuf,
    export_dir: Option<PathBuf>,
    pool: Option<PgPool>,
}

#[derive(Debug)]
struct RunSummary {
    processed: PipelineCounts,
    stored: Option<StoreCounts>,
}

impl Runner {
    async fn run(&self) -> Result<RunSummary> {
        let Some(pool) = &self.pool else {
            let processed = self.process_and_export()?;
            info!("Dry run - nothing stored");
            return Ok(RunSummary {
                processed,
                stored: None,
            });
        };

        let job_run_id = create_job_run(pool, "pipeline", None).await?;

        let result = async {
            let output = self.load_and_process()?;
            self.export(&output)?;
            let stored = store_output(pool, &output).await?;
            Ok::<_, anyhow::Error>(RunSummary {
                processed: output.counts(),
                stored: Some(stored),
            })
        }
        .await;

        match &result {
            Ok(summary) => {
                let detail = json!({ "processed": summary.processed, "stored": summary.stored });
                finish_job_run(pool, job_run_id, STATUS_OK, None, detail).await?
            }
            Err(e) => {
                finish_job_run(pool, job_run_id, STATUS_FAILED, Some(&format!("{:#}", e)), json!({}))
                    .await?
            }
        }

        result
    }

    fn load_and_process(&self) -> Result<pipeline::PipelineOutput> {
        let raw = load_raw_tables(&self.raw_dir)
            .with_context(|| format!("Failed to load raw files from {}", self.raw_dir.display()))?;
        let output = process(&raw).context("Pipeline processing failed")?;
        info!("Processed: {:?}", output.counts());
        Ok(output)
    }

    fn process_and_export(&self) -> Result<PipelineCounts> {
        let output = self.load_and_process()?;
        self.export(&output)?;
        Ok(output.counts())
    }

    fn export(&self, output: &pipeline::PipelineOutput) -> Result<()> {
        if let Some(dir) = &self.export_dir {
            export_csv(dir, output)
                .with_context(|| format!("Failed to export CSVs to {}", dir.display()))?;
        }
        Ok(())
    }
}

async fn connect(db_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("Failed to connect to database")?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("sqlx", log::LevelFilter::Warn)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let raw_dir = args.raw_dir.unwrap_or(config.raw_fs_dir);
    info!("=== Regional Open Data Pipeline ===");
    info!("Raw dir: {}", raw_dir.display());
    info!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });
    if !raw_dir.is_dir() {
        warn!("Raw dir {} does not exist yet", raw_dir.display());
    }

    let pool = if args.dry_run {
        None
    } else {
        let db_url = config
            .db_url
            .as_deref()
            .context("DB_URL env var missing (use --dry-run to skip the database)")?;
        Some(connect(db_url).await?)
    };

    let runner = Runner {
        raw_dir,
        export_dir: args.export_dir,
        pool,
    };

    match args.every_hours.or(config.schedule_interval_hours) {
        Some(hours) => {
            let mut scheduler = Scheduler::new(interval_from_hours(hours)?);
            scheduler.run_forever(|| runner.run()).await;
        }
        None => {
            let summary = runner.run().await?;
            info!("=== Pipeline Complete ===");
            info!("Processed: {:?}", summary.processed);
            if let Some(stored) = summary.stored {
                info!("Stored: {:?}", stored);
            }
        }
    }

    Ok(())
}
