//! PostgreSQL persistence for canonical tables, dataset metadata and job runs.
//!
//! Canonical tables are replaced wholesale on every run. All replaces of one
//! run share a single transaction, so a failed run leaves the previous
//! contents in place.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::pipeline::PipelineOutput;
use crate::transform::{BudgetRecord, CommuneRecord, EmploymentRecord, RegionStats};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS datasets (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        slug TEXT,
        description TEXT,
        organization TEXT,
        license TEXT,
        last_modified TIMESTAMPTZ,
        ingested_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS region_budgets (
        id BIGSERIAL PRIMARY KEY,
        year INTEGER NOT NULL,
        region_code VARCHAR(8) NOT NULL,
        region_name TEXT,
        total_revenue DOUBLE PRECISION,
        total_expenditure DOUBLE PRECISION,
        operating_revenue DOUBLE PRECISION,
        operating_expenditure DOUBLE PRECISION,
        investment_revenue DOUBLE PRECISION,
        investment_expenditure DOUBLE PRECISION,
        debt DOUBLE PRECISION
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_region_budgets_year_code ON region_budgets (year, region_code)",
    r#"
    CREATE TABLE IF NOT EXISTS communes (
        id BIGSERIAL PRIMARY KEY,
        code_insee VARCHAR(8) NOT NULL,
        name TEXT NOT NULL,
        region_code VARCHAR(8),
        region_name TEXT,
        department_code VARCHAR(8),
        department_name TEXT,
        population BIGINT,
        area_km2 DOUBLE PRECISION,
        density DOUBLE PRECISION
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_communes_region_code ON communes (region_code)",
    r#"
    CREATE TABLE IF NOT EXISTS region_stats (
        id BIGSERIAL PRIMARY KEY,
        year INTEGER,
        region_code VARCHAR(8),
        region_name TEXT,
        total_population BIGINT,
        total_revenue DOUBLE PRECISION,
        total_expenditure DOUBLE PRECISION,
        revenue_per_capita DOUBLE PRECISION,
        expenditure_per_capita DOUBLE PRECISION,
        num_communes BIGINT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_region_stats_year_code ON region_stats (year, region_code)",
    r#"
    CREATE TABLE IF NOT EXISTS region_employment (
        id BIGSERIAL PRIMARY KEY,
        region_code VARCHAR(8),
        region_name TEXT,
        month VARCHAR(10),
        salary_mass DOUBLE PRECISION,
        salary_yoy_change DOUBLE PRECISION,
        partial_unemployment_base DOUBLE PRECISION,
        partial_unemployment_share DOUBLE PRECISION
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_region_employment_month ON region_employment (month, region_code)",
    r#"
    CREATE TABLE IF NOT EXISTS job_runs (
        job_run_id UUID PRIMARY KEY,
        component TEXT NOT NULL,
        source_id TEXT,
        status TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        finished_at TIMESTAMPTZ,
        error TEXT,
        detail JSONB NOT NULL DEFAULT '{}'
    )
    "#,
];

/// Create missing tables and indexes.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(*statement)
            .execute(pool)
            .await
            .context("Failed to create schema")?;
    }
    Ok(())
}

// =============================================================================
// Canonical tables
// =============================================================================

/// Rows written per table by one run. `None` means the table was left as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub budgets: usize,
    pub communes: usize,
    pub region_stats: Option<usize>,
    pub employment: Option<usize>,
}

pub async fn replace_budgets(conn: &mut PgConnection, rows: &[BudgetRecord]) -> Result<usize> {
    sqlx::query("DELETE FROM region_budgets").execute(&mut *conn).await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO region_budgets
            (year, region_code, region_name, total_revenue, total_expenditure,
             operating_revenue, operating_expenditure, investment_revenue,
             investment_expenditure, debt)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(row.year)
        .bind(&row.region_code)
        .bind(&row.region_name)
        .bind(row.total_revenue)
        .bind(row.total_expenditure)
        .bind(row.operating_revenue)
        .bind(row.operating_expenditure)
        .bind(row.investment_revenue)
        .bind(row.investment_expenditure)
        .bind(row.debt)
        .execute(&mut *conn)
        .await?;
    }
    Ok(rows.len())
}

pub async fn replace_communes(conn: &mut PgConnection, rows: &[CommuneRecord]) -> Result<usize> {
    sqlx::query("DELETE FROM communes").execute(&mut *conn).await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO communes
            (code_insee, name, region_code, region_name, department_code,
             department_name, population, area_km2, density)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&row.code_insee)
        .bind(&row.name)
        .bind(&row.region_code)
        .bind(&row.region_name)
        .bind(&row.department_code)
        .bind(&row.department_name)
        .bind(row.population)
        .bind(row.area_km2)
        .bind(row.density)
        .execute(&mut *conn)
        .await?;
    }
    Ok(rows.len())
}

pub async fn replace_region_stats(conn: &mut PgConnection, rows: &[RegionStats]) -> Result<usize> {
    sqlx::query("DELETE FROM region_stats").execute(&mut *conn).await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO region_stats
            (year, region_code, region_name, total_population, total_revenue,
             total_expenditure, revenue_per_capita, expenditure_per_capita, num_communes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(row.year)
        .bind(&row.region_code)
        .bind(&row.region_name)
        .bind(row.total_population)
        .bind(row.total_revenue)
        .bind(row.total_expenditure)
        .bind(row.revenue_per_capita)
        .bind(row.expenditure_per_capita)
        .bind(row.num_communes)
        .execute(&mut *conn)
        .await?;
    }
    Ok(rows.len())
}

pub async fn replace_employment(
    conn: &mut PgConnection,
    rows: &[EmploymentRecord],
) -> Result<usize> {
    sqlx::query("DELETE FROM region_employment").execute(&mut *conn).await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO region_employment
            (region_code, region_name, month, salary_mass, salary_yoy_change,
             partial_unemployment_base, partial_unemployment_share)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&row.region_code)
        .bind(&row.region_name)
        .bind(&row.month)
        .bind(row.salary_mass)
        .bind(row.salary_yoy_change)
        .bind(row.partial_unemployment_base)
        .bind(row.partial_unemployment_share)
        .execute(&mut *conn)
        .await?;
    }
    Ok(rows.len())
}

/// Tables `store_output` leaves as they are for this output.
///
/// Their stored rows belong to an earlier run. An empty region stats join
/// keeps `region_stats` even though budgets and communes are replaced, so
/// the stored stats no longer match the stored budgets.
pub fn kept_tables(output: &PipelineOutput) -> Vec<&'static str> {
    let mut kept = Vec::new();
    if output.region_stats.is_empty() {
        kept.push("region_stats");
    }
    if output.employment.as_ref().map_or(true, Vec::is_empty) {
        kept.push("region_employment");
    }
    kept
}

/// Replace every canonical table produced by a run, atomically.
///
/// An empty region stats join keeps the stored stats. Employment is only
/// replaced when the run produced rows for it. See [`kept_tables`].
pub async fn store_output(pool: &PgPool, output: &PipelineOutput) -> Result<StoreCounts> {
    let mut tx = pool.begin().await.context("Failed to open transaction")?;

    let budgets = replace_budgets(&mut tx, &output.budgets)
        .await
        .context("Failed to store region budgets")?;
    let communes = replace_communes(&mut tx, &output.communes)
        .await
        .context("Failed to store communes")?;

    let region_stats = if output.region_stats.is_empty() {
        warn!(
            "Region stats join is empty: region_stats keeps the rows of an earlier run \
             while region_budgets ({} rows) and communes ({} rows) are replaced",
            output.budgets.len(),
            output.communes.len()
        );
        None
    } else {
        Some(
            replace_region_stats(&mut tx, &output.region_stats)
                .await
                .context("Failed to store region stats")?,
        )
    };

    let employment = match &output.employment {
        Some(rows) if !rows.is_empty() => Some(
            replace_employment(&mut tx, rows)
                .await
                .context("Failed to store employment")?,
        ),
        _ => None,
    };

    tx.commit().await.context("Failed to commit pipeline output")?;

    let kept = kept_tables(output);
    if !kept.is_empty() {
        info!("Left from an earlier run: {}", kept.join(", "));
    }

    let counts = StoreCounts {
        budgets,
        communes,
        region_stats,
        employment,
    };
    info!("Stored: {:?}", counts);
    Ok(counts)
}

// =============================================================================
// Dataset metadata
// =============================================================================

pub const DESCRIPTION_MAX_CHARS: usize = 2000;

/// Upstream dataset description as kept in `datasets`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub id: String,
    pub title: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub organization: Option<String>,
    pub license: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub async fn upsert_dataset(pool: &PgPool, row: &DatasetRow) -> Result<()> {
    let description = row
        .description
        .as_deref()
        .map(|d| truncate_chars(d, DESCRIPTION_MAX_CHARS));
    sqlx::query(
        r#"
        INSERT INTO datasets (id, title, slug, description, organization, license, last_modified)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            slug = EXCLUDED.slug,
            description = EXCLUDED.description,
            organization = EXCLUDED.organization,
            license = EXCLUDED.license,
            last_modified = EXCLUDED.last_modified,
            ingested_at = now()
        "#,
    )
    .bind(&row.id)
    .bind(&row.title)
    .bind(&row.slug)
    .bind(description)
    .bind(&row.organization)
    .bind(&row.license)
    .bind(row.last_modified)
    .execute(pool)
    .await
    .context("Failed to upsert dataset metadata")?;
    Ok(())
}

// =============================================================================
// Job runs
// =============================================================================

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_OK: &str = "ok";
pub const STATUS_FAILED: &str = "failed";

/// Open a job run in `running` state.
pub async fn create_job_run(
    pool: &PgPool,
    component: &str,
    source_id: Option<&str>,
) -> Result<Uuid> {
    let job_run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO job_runs (job_run_id, component, source_id, status, detail)
        VALUES ($1, $2, $3, $4, '{}')
        "#,
    )
    .bind(job_run_id)
    .bind(component)
    .bind(source_id)
    .bind(STATUS_RUNNING)
    .execute(pool)
    .await?;
    Ok(job_run_id)
}

/// Close a job run, merging `detail` into the stored JSON.
pub async fn finish_job_run(
    pool: &PgPool,
    job_run_id: Uuid,
    status: &str,
    error: Option<&str>,
    detail: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE job_runs
        SET finished_at = now(), status = $2, error = $3, detail = detail || $4
        WHERE job_run_id = $1
        "#,
    )
    .bind(job_run_id)
    .bind(status)
    .bind(error)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(())
}
