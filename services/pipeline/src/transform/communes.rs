use log::{debug, info};
use polars::prelude::*;
use serde::Serialize;

use crate::aliases::{commune, resolve_column};
use crate::error::{Result, TransformError};
use crate::table::Table;
use crate::transform::budgets::region_code_text;

/// Demographic totals for one region, built from its communes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionAggregate {
    pub region_code: String,
    pub region_name: String,
    pub total_population: i64,
    pub num_communes: i64,
}

/// One commune as stored for querying.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommuneRecord {
    pub code_insee: String,
    pub name: String,
    pub region_code: String,
    pub region_name: String,
    pub department_code: String,
    pub department_name: String,
    pub population: i64,
    pub area_km2: f64,
    pub density: f64,
}

const CODE: &str = "region_code";
const NAME: &str = "region_name";
const POPULATION: &str = "population";
const COMMUNES: &str = "num_communes";

/// Missing, unparseable and negative populations all count as zero.
fn population(value: Option<f64>) -> f64 {
    value.map_or(0.0, |p| p.trunc().max(0.0))
}

/// Population totals beyond `i64` saturate at `i64::MAX`.
fn to_count(value: f64) -> i64 {
    value as i64
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Group communes by region code.
///
/// Output is one row per distinct code, ordered by code. The region name is
/// the first non-blank name met in input order, or the code itself when the
/// table carries no usable name.
pub fn aggregate_by_region(table: &Table) -> Result<Vec<RegionAggregate>> {
    let code_name = resolve_column(table, commune::REGION_CODE)
        .ok_or_else(|| TransformError::missing("region_code", table.column_names()))?;
    let pop_name = resolve_column(table, commune::POPULATION)
        .ok_or_else(|| TransformError::missing("population", table.column_names()))?;

    let codes: Vec<Option<String>> = table
        .text_values(code_name)
        .unwrap_or_default()
        .into_iter()
        .map(region_code_text)
        .collect();
    let pops: Vec<f64> = table
        .number_values(pop_name)
        .unwrap_or_default()
        .into_iter()
        .map(population)
        .collect();
    let names: Vec<Option<String>> = match resolve_column(table, commune::REGION_NAME) {
        Some(name) => table
            .text_values(name)
            .unwrap_or_default()
            .into_iter()
            .map(non_blank)
            .collect(),
        None => vec![None; table.height()],
    };

    let skipped = codes.iter().filter(|c| c.is_none()).count();
    if skipped > 0 {
        debug!("Skipped {} communes without a region code", skipped);
    }

    let grouped = DataFrame::new(vec![
        Column::new(CODE.into(), codes),
        Column::new(POPULATION.into(), pops),
        Column::new(NAME.into(), names),
    ])?
    .lazy()
    .filter(col(CODE).is_not_null())
    .group_by([col(CODE)])
    .agg([
        col(POPULATION).sum(),
        len().alias(COMMUNES),
        col(NAME).drop_nulls().first(),
    ])
    .sort_by_exprs([col(CODE)], SortMultipleOptions::default())
    .collect()?;

    let codes = grouped.column(CODE)?.str()?;
    let pops = grouped.column(POPULATION)?.f64()?;
    let counts = grouped.column(COMMUNES)?.cast(&DataType::Int64)?;
    let counts = counts.i64()?;
    let names = grouped.column(NAME)?.str()?;

    let aggregates: Vec<RegionAggregate> = (0..grouped.height())
        .filter_map(|i| {
            let code = codes.get(i)?.to_string();
            Some(RegionAggregate {
                region_name: names.get(i).map_or_else(|| code.clone(), str::to_string),
                region_code: code,
                total_population: to_count(pops.get(i).unwrap_or(0.0)),
                num_communes: counts.get(i).unwrap_or(0),
            })
        })
        .collect();

    info!("Aggregated communes into {} regions", aggregates.len());
    Ok(aggregates)
}

/// Commune rows for storage, resolving each field through its alias list.
///
/// Missing text fields become empty strings and missing measures zero.
pub fn extract_communes(table: &Table) -> Vec<CommuneRecord> {
    let texts = |candidates: &[&str]| {
        resolve_column(table, candidates).and_then(|name| table.text_values(name))
    };
    let numbers = |candidates: &[&str]| {
        resolve_column(table, candidates).and_then(|name| table.number_values(name))
    };
    let code_insee = texts(commune::CODE_INSEE);
    let name = texts(commune::NAME);
    let region_code = texts(commune::REGION_CODE);
    let region_name = texts(commune::REGION_NAME);
    let department_code = texts(commune::DEPARTMENT_CODE);
    let department_name = texts(commune::DEPARTMENT_NAME);
    let pop = numbers(commune::POPULATION);
    let area = numbers(commune::AREA_KM2);
    let density = numbers(commune::DENSITY);

    let text = |values: &Option<Vec<Option<String>>>, row: usize| -> String {
        values
            .as_ref()
            .and_then(|v| v[row].clone())
            .unwrap_or_default()
    };
    let number = |values: &Option<Vec<Option<f64>>>, row: usize| -> Option<f64> {
        values.as_ref().and_then(|v| v[row])
    };

    let records: Vec<CommuneRecord> = (0..table.height())
        .map(|row| CommuneRecord {
            code_insee: text(&code_insee, row),
            name: text(&name, row),
            region_code: text(&region_code, row),
            region_name: text(&region_name, row),
            department_code: text(&department_code, row),
            department_name: text(&department_name, row),
            population: to_count(population(number(&pop, row))),
            area_km2: number(&area, row).unwrap_or(0.0),
            density: number(&density, row).unwrap_or(0.0),
        })
        .collect();

    info!("Extracted {} communes", records.len());
    records
}
