//! Collector Service - Downloads raw datasets from data.gouv.fr
//!
//! Responsibilities:
//! - Resolve each registered dataset through the data.gouv.fr API
//! - Download its first CSV resource, with rate limiting
//! - Store the raw file where the pipeline expects it (`<raw_dir>/<key>.csv`)
//! - Register dataset metadata in database
//! - Track job runs for auditing
//!
//! Usage:
//!   # All registered datasets:
//!   cargo run --bin collector
//!
//!   # One dataset, no database:
//!   cargo run --bin collector -- --dataset communes --dry-run
//!
//!   # Discover datasets:
//!   cargo run --bin collector -- --search "budget region"

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::Parser;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use uuid::Uuid;

use pipeline::pipeline::{RawFile, BUDGETS_RAW, COMMUNES_RAW, EMPLOYMENT_RAW};
use pipeline::store::{
    create_job_run, ensure_schema, finish_job_run, truncate_chars, upsert_dataset, DatasetRow,
    STATUS_FAILED, STATUS_OK,
};

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Collects raw datasets from data.gouv.fr")]
struct Args {
    /// Registered dataset key to collect (default: all)
    #[arg(long)]
    dataset: Option<String>,

    /// Search data.gouv.fr and print matching datasets instead of collecting
    #[arg(long)]
    search: Option<String>,

    /// Number of search results
    #[arg(long, default_value = "20")]
    page_size: usize,

    /// Dry run - don't save to database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

// =============================================================================
// Dataset registry
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DatasetSource {
    /// Raw file the pipeline reads this dataset from
    raw: RawFile,
    name: &'static str,
    slug: &'static str,
    provider: &'static str,
    /// A failure on an optional dataset does not fail the run
    required: bool,
}

const DATASETS: &[DatasetSource] = &[
    DatasetSource {
        raw: BUDGETS_RAW,
        name: "Comptes individuels des regions",
        slug: "comptes-individuels-des-regions-fichier-global-a-compter-de-2008",
        provider: "Ministere de l'Economie",
        required: true,
    },
    DatasetSource {
        raw: COMMUNES_RAW,
        name: "Communes et villes de France",
        slug: "communes-et-villes-de-france-en-csv-excel-json-parquet-et-feather",
        provider: "data.gouv.fr",
        required: true,
    },
    DatasetSource {
        raw: EMPLOYMENT_RAW,
        name: "Masse salariale et chomage partiel par region",
        slug: "masse-salariale-et-assiette-chomage-partiel-mensuelles-du-secteur-prive-par-region",
        provider: "Urssaf",
        required: false,
    },
];

impl DatasetSource {
    /// Registry key, also the raw file stem
    fn key(&self) -> &'static str {
        self.raw.key
    }
}

fn find_dataset(key: &str) -> Option<&'static DatasetSource> {
    DATASETS.iter().find(|d| d.key() == key)
}

// =============================================================================
// data.gouv.fr API types
// =============================================================================

const SEARCH_DESCRIPTION_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
struct Organization {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
    #[serde(default)]
    title: Option<String>,
    url: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    filesize: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DatasetMeta {
    id: String,
    title: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    organization: Option<Organization>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<DatasetMeta>,
}

#[derive(Debug, Clone)]
struct Config {
    db_url: Option<String>,
    raw_fs_dir: PathBuf,
    api_base: String,
    rate_limit_ms: u64,
}

impl Config {
    fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").ok(),
            raw_fs_dir: PathBuf::from(
                std::env::var("RAW_FS_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
            api_base: std::env::var("DATA_GOUV_API")
                .unwrap_or_else(|_| "https://www.data.gouv.fr/api/1".to_string()),
            rate_limit_ms: std::env::var("RATE_LIMIT_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
        })
    }
}

/// Fetch full metadata for one dataset (slug or id)
async fn get_dataset_metadata(
    client: &reqwest::Client,
    config: &Config,
    slug: &str,
) -> Result<DatasetMeta> {
    let url = format!("{}/datasets/{}/", config.api_base, slug);
    let meta = client
        .get(&url)
        .send()
        .await?
        .error_for_status()
        .with_context(|| format!("Metadata request failed for {}", slug))?
        .json()
        .await
        .context("Invalid dataset metadata payload")?;
    Ok(meta)
}

/// CSV resources of a dataset, in publication order
fn list_csv_resources(meta: &DatasetMeta) -> Vec<&Resource> {
    meta.resources
        .iter()
        .filter(|r| {
            r.format
                .as_deref()
                .is_some_and(|f| f.eq_ignore_ascii_case("csv"))
        })
        .collect()
}

async fn search_datasets(
    client: &reqwest::Client,
    config: &Config,
    query: &str,
    page_size: usize,
) -> Result<Vec<DatasetMeta>> {
    let page: SearchPage = client
        .get(format!("{}/datasets/", config.api_base))
        .query(&[("q", query.to_string()), ("page_size", page_size.to_string())])
        .send()
        .await?
        .error_for_status()
        .context("Search request failed")?
        .json()
        .await
        .context("Invalid search payload")?;
    Ok(page.data)
}

/// data.gouv.fr mixes offset and naive UTC timestamps
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.and_utc())
        })
}

fn to_dataset_row(meta: &DatasetMeta) -> DatasetRow {
    DatasetRow {
        id: meta.id.clone(),
        title: meta.title.clone(),
        slug: meta.slug.clone(),
        description: meta.description.clone(),
        organization: meta.organization.as_ref().and_then(|o| o.name.clone()),
        license: meta.license.clone(),
        last_modified: meta.last_modified.as_deref().and_then(parse_timestamp),
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

fn raw_path(dir: &Path, source: &DatasetSource) -> PathBuf {
    source.raw.path(dir)
}

/// Summary of one collected dataset
#[derive(Debug)]
struct Collected {
    path: PathBuf,
    size_bytes: usize,
    content_hash: String,
}

/// Resolve, download and save one registered dataset
async fn collect_dataset(
    client: &reqwest::Client,
    pool: Option<&PgPool>,
    config: &Config,
    source: &DatasetSource,
) -> Result<Collected> {
    let meta = get_dataset_metadata(client, config, source.slug).await?;
    info!("  Dataset: {} ({})", meta.title, meta.id);

    let resources = list_csv_resources(&meta);
    let resource = resources
        .first()
        .with_context(|| format!("No CSV resource found for {}", source.key()))?;
    info!(
        "  Resource: {} (first of {} CSV, {} bytes announced)",
        resource.title.as_deref().unwrap_or(&resource.id),
        resources.len(),
        resource.filesize.unwrap_or(0)
    );

    // Rate limit: wait before download
    info!("  Rate limit: waiting {}ms...", config.rate_limit_ms);
    sleep(Duration::from_millis(config.rate_limit_ms)).await;

    info!("  Fetching: {}", resource.url);
    let bytes = client
        .get(&resource.url)
        .send()
        .await?
        .error_for_status()
        .context("HTTP request failed")?
        .bytes()
        .await?;

    let content_hash = content_hash(&bytes);
    info!("  Downloaded: {} bytes, hash: {}", bytes.len(), content_hash);

    fs::create_dir_all(&config.raw_fs_dir).await?;
    let path = raw_path(&config.raw_fs_dir, source);
    fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("  Saved to: {}", path.display());

    if let Some(pool) = pool {
        upsert_dataset(pool, &to_dataset_row(&meta)).await?;
    }

    Ok(Collected {
        path,
        size_bytes: bytes.len(),
        content_hash,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("sqlx", log::LevelFilter::Warn)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    // Build HTTP client
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(15))
        .user_agent("regional-open-data-collector/0.1")
        .build()?;

    if let Some(query) = &args.search {
        let results = search_datasets(&client, &config, query, args.page_size).await?;
        info!("{} dataset(s) matching '{}'", results.len(), query);
        for ds in &results {
            let description = ds.description.as_deref().unwrap_or("");
            println!(
                "{}  {}\n    {}",
                ds.slug.as_deref().unwrap_or(&ds.id),
                ds.title,
                truncate_chars(description, SEARCH_DESCRIPTION_CHARS).replace('\n', " ")
            );
        }
        return Ok(());
    }

    let sources: Vec<&DatasetSource> = match &args.dataset {
        Some(key) => vec![find_dataset(key).with_context(|| {
            let known: Vec<&str> = DATASETS.iter().map(|d| d.key()).collect();
            format!("Unknown dataset '{}' (known: {})", key, known.join(", "))
        })?],
        None => DATASETS.iter().collect(),
    };

    info!("=== Regional Open Data Collector ===");
    info!("Raw dir: {}", config.raw_fs_dir.display());
    info!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    // Connect to database
    let pool = if args.dry_run {
        None
    } else {
        let db_url = config
            .db_url
            .as_deref()
            .context("DB_URL env var missing (use --dry-run to skip the database)")?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("Failed to connect to database")?;
        ensure_schema(&pool).await?;
        Some(pool)
    };

    let mut collected = 0;
    let mut failed_required = Vec::new();

    for source in sources {
        info!(
            "[{}] {} ({}, separator '{}')",
            source.key(),
            source.name,
            source.provider,
            source.raw.separator as char
        );

        // Create job run for this dataset
        let job_run_id: Option<Uuid> = match &pool {
            Some(pool) => Some(create_job_run(pool, "collector", Some(source.key())).await?),
            None => None,
        };

        let result = collect_dataset(&client, pool.as_ref(), &config, source).await;

        // Update job run
        if let (Some(pool), Some(job_id)) = (&pool, job_run_id) {
            match &result {
                Ok(c) => {
                    let detail = json!({
                        "path": c.path.display().to_string(),
                        "size_bytes": c.size_bytes,
                        "content_hash": c.content_hash,
                    });
                    finish_job_run(pool, job_id, STATUS_OK, None, detail).await?
                }
                Err(e) => {
                    finish_job_run(pool, job_id, STATUS_FAILED, Some(&format!("{:#}", e)), json!({}))
                        .await?
                }
            }
        }

        match result {
            Ok(_) => collected += 1,
            Err(e) if source.required => {
                error!("  Failed: {:#}", e);
                failed_required.push(source.key());
            }
            Err(e) => warn!("  Optional dataset skipped: {:#}", e),
        }
    }

    info!("=== Collection Summary ===");
    info!("Collected: {}", collected);
    if !failed_required.is_empty() {
        anyhow::bail!("Required dataset(s) failed: {}", failed_required.join(", "));
    }

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
