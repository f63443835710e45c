use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use serde::Serialize;

use crate::aliases::{employment, rename_aliases, rename_to};
use crate::table::Table;
use crate::transform::budgets::region_code_text;

/// Monthly private-sector payroll figures for one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmploymentRecord {
    pub region_code: Option<String>,
    pub region_name: Option<String>,
    /// "YYYY-MM"
    pub month: String,
    pub salary_mass: Option<f64>,
    pub salary_yoy_change: Option<f64>,
    pub partial_unemployment_base: Option<f64>,
    pub partial_unemployment_share: Option<f64>,
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse a source date into its "YYYY-MM" month key.
pub fn parse_month(raw: &str) -> Option<String> {
    let s = raw.trim();
    let date = DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").ok())?;
    Some(date.format("%Y-%m").to_string())
}

/// Map a cleaned regional payroll table onto canonical employment records.
///
/// Returns an empty list, not an error, when the table has neither a date
/// column nor a month column: without a temporal key there is nothing to
/// store. Rows whose month cannot be derived are dropped.
pub fn transform_employment(table: &Table) -> Vec<EmploymentRecord> {
    let mut table = rename_aliases(table, employment::ALIASES);
    rename_to(
        &mut table,
        employment::REGION_CODE,
        employment::REGION_CODE_CANDIDATES,
    );
    rename_to(
        &mut table,
        employment::REGION_NAME,
        employment::REGION_NAME_CANDIDATES,
    );

    let Some(months) = table
        .text_values(employment::DATE)
        .or_else(|| table.text_values(employment::MONTH))
    else {
        warn!(
            "No date or month column in employment data, skipping (columns: {:?})",
            table.column_names()
        );
        return Vec::new();
    };

    let codes = table.text_values(employment::REGION_CODE);
    let names = table.text_values(employment::REGION_NAME);
    let salary_mass = table.number_values(employment::SALARY_MASS);
    let salary_yoy = table.number_values(employment::SALARY_YOY_CHANGE);
    let pu_base = table.number_values(employment::PARTIAL_UNEMPLOYMENT_BASE);
    let pu_share = table.number_values(employment::PARTIAL_UNEMPLOYMENT_SHARE);
    let measure = |values: &Option<Vec<Option<f64>>>, row: usize| {
        values.as_ref().and_then(|v| v[row])
    };

    let mut records = Vec::with_capacity(table.height());
    let mut dropped = 0;

    for (row, raw) in months.iter().enumerate() {
        let Some(month) = raw.as_deref().and_then(parse_month) else {
            dropped += 1;
            continue;
        };
        records.push(EmploymentRecord {
            region_code: codes
                .as_ref()
                .and_then(|c| region_code_text(c[row].clone())),
            region_name: names.as_ref().and_then(|n| n[row].clone()),
            month,
            salary_mass: measure(&salary_mass, row),
            salary_yoy_change: measure(&salary_yoy, row),
            partial_unemployment_base: measure(&pu_base, row),
            partial_unemployment_share: measure(&pu_share, row),
        });
    }

    if dropped > 0 {
        debug!("Dropped {} employment rows without a valid month", dropped);
    }
    info!("Transformed employment data: {} rows", records.len());
    records
}
