use log::{info, warn};
use polars::prelude::*;
use serde::Serialize;

use crate::error::Result;
use crate::transform::budgets::BudgetRecord;
use crate::transform::communes::RegionAggregate;

/// Budget figures for one region and year, scaled by its population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionStats {
    pub year: i32,
    pub region_code: String,
    pub region_name: Option<String>,
    pub total_population: i64,
    pub total_revenue: Option<f64>,
    pub total_expenditure: Option<f64>,
    pub revenue_per_capita: Option<f64>,
    pub expenditure_per_capita: Option<f64>,
    pub num_communes: i64,
}

/// Join key shared by both region code conventions.
///
/// Budgets carry "011" while the commune register carries "11". Distinct
/// codes differing only in leading zeros collapse to the same key.
pub fn join_key(code: &str) -> &str {
    code.trim().trim_start_matches('0')
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// `total / max(population, 1)`, rounded to cents.
pub fn per_capita(total: f64, population: i64) -> f64 {
    round2(total / population.max(1) as f64)
}

const KEY: &str = "join_key";
const BUDGET_ROW: &str = "budget_row";
const AGGREGATE_ROW: &str = "aggregate_row";

/// Row positions keyed by [`join_key`].
fn keyed_rows<'a, I>(row_name: &str, codes: I) -> Result<DataFrame>
where
    I: Iterator<Item = &'a str>,
{
    let keys: Vec<&str> = codes.map(join_key).collect();
    Ok(DataFrame::new(vec![Column::new(KEY.into(), keys)])?
        .with_row_index(row_name.into(), None)?)
}

fn positions(df: &DataFrame, name: &str) -> Result<Vec<usize>> {
    let rows = df.column(name)?.cast(&DataType::Int64)?;
    Ok(rows.i64()?.into_iter().flatten().map(|i| i as usize).collect())
}

/// Inner join of budgets with commune aggregates on the normalized code.
///
/// Rows follow budget order, then aggregate order for repeated keys.
/// Unmatched rows on either side are dropped; an empty result is logged
/// and returned as is.
pub fn compute_region_stats(
    budgets: &[BudgetRecord],
    aggregates: &[RegionAggregate],
) -> Result<Vec<RegionStats>> {
    let left = keyed_rows(BUDGET_ROW, budgets.iter().map(|b| b.region_code.as_str()))?;
    let right = keyed_rows(AGGREGATE_ROW, aggregates.iter().map(|a| a.region_code.as_str()))?;

    let joined = left
        .lazy()
        .join(
            right.lazy(),
            [col(KEY)],
            [col(KEY)],
            JoinArgs::new(JoinType::Inner),
        )
        .sort_by_exprs(
            [col(BUDGET_ROW), col(AGGREGATE_ROW)],
            SortMultipleOptions::default(),
        )
        .collect()?;

    let stats: Vec<RegionStats> = positions(&joined, BUDGET_ROW)?
        .into_iter()
        .zip(positions(&joined, AGGREGATE_ROW)?)
        .map(|(b, a)| {
            let budget = &budgets[b];
            let agg = &aggregates[a];
            let pop = agg.total_population;
            RegionStats {
                year: budget.year,
                region_code: join_key(&budget.region_code).to_string(),
                region_name: budget.region_name.clone(),
                total_population: pop,
                total_revenue: budget.total_revenue,
                total_expenditure: budget.total_expenditure,
                revenue_per_capita: budget.total_revenue.map(|t| per_capita(t, pop)),
                expenditure_per_capita: budget.total_expenditure.map(|t| per_capita(t, pop)),
                num_communes: agg.num_communes,
            }
        })
        .collect();

    if stats.is_empty() {
        warn!(
            "Region stats join is empty ({} budget rows, {} regions): no matching region codes",
            budgets.len(),
            aggregates.len()
        );
    } else {
        info!("Computed region stats: {} rows", stats.len());
    }
    Ok(stats)
}
