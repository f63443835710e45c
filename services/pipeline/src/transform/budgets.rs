use std::collections::HashSet;

use log::{debug, info};
use serde::Serialize;

use crate::aliases::{budget, rename_aliases};
use crate::error::{Result, TransformError};
use crate::table::Table;

/// One region's accounts for one fiscal year.
///
/// Field order is the canonical column order used for export and storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetRecord {
    pub year: i32,
    pub region_code: String,
    pub region_name: Option<String>,
    pub total_revenue: Option<f64>,
    pub total_expenditure: Option<f64>,
    pub operating_revenue: Option<f64>,
    pub operating_expenditure: Option<f64>,
    pub investment_revenue: Option<f64>,
    pub investment_expenditure: Option<f64>,
    pub debt: Option<f64>,
}

/// Map a cleaned region budget table onto canonical budget records.
///
/// Fails only when `year` or `region_code` cannot be resolved. Rows whose
/// year or code is missing after coercion are dropped. Only the first row of
/// each (year, padded region code) pair is kept.
pub fn transform_budgets(table: &Table) -> Result<Vec<BudgetRecord>> {
    let table = rename_aliases(table, budget::ALIASES);

    let years = table
        .number_values(budget::YEAR)
        .ok_or_else(|| TransformError::missing(budget::YEAR, table.column_names()))?;
    let codes = table
        .text_values(budget::REGION_CODE)
        .ok_or_else(|| TransformError::missing(budget::REGION_CODE, table.column_names()))?;
    let names = table.text_values(budget::REGION_NAME);

    let operating_revenue = table.number_values(budget::OPERATING_REVENUE);
    let operating_expenditure = table.number_values(budget::OPERATING_EXPENDITURE);
    let investment_revenue = table.number_values(budget::INVESTMENT_REVENUE);
    let investment_expenditure = table.number_values(budget::INVESTMENT_EXPENDITURE);
    let debt = table.number_values(budget::DEBT);

    // Absent sub-totals stay absent; present ones treat missing as zero.
    let amount = |values: &Option<Vec<Option<f64>>>, row: usize| -> Option<f64> {
        values.as_ref().map(|v| v[row].unwrap_or(0.0))
    };
    let total = |a: &Option<Vec<Option<f64>>>, b: &Option<Vec<Option<f64>>>, row: usize| {
        match (amount(a, row), amount(b, row)) {
            (Some(x), Some(y)) => Some(x + y),
            _ => None,
        }
    };

    let mut records = Vec::with_capacity(table.height());
    let mut seen: HashSet<(i32, String)> = HashSet::new();
    let mut dropped = 0;
    let mut duplicates = 0;

    for (row, (year, code)) in years.iter().zip(codes).enumerate() {
        let year = year.and_then(to_year);
        let region_code = region_code_text(code).map(|code| zero_pad(&code, 3));

        let (year, region_code) = match (year, region_code) {
            (Some(y), Some(c)) => (y, c),
            _ => {
                dropped += 1;
                continue;
            }
        };
        if !seen.insert((year, region_code.clone())) {
            duplicates += 1;
            continue;
        }

        records.push(BudgetRecord {
            year,
            region_code,
            region_name: names
                .as_ref()
                .and_then(|n| n[row].as_deref())
                .map(clean_region_name),
            total_revenue: total(&operating_revenue, &investment_revenue, row),
            total_expenditure: total(&operating_expenditure, &investment_expenditure, row),
            operating_revenue: amount(&operating_revenue, row),
            operating_expenditure: amount(&operating_expenditure, row),
            investment_revenue: amount(&investment_revenue, row),
            investment_expenditure: amount(&investment_expenditure, row),
            debt: amount(&debt, row),
        });
    }

    if dropped > 0 {
        debug!("Dropped {} budget rows without year or region code", dropped);
    }
    if duplicates > 0 {
        info!(
            "Dropped {} budget rows repeating a (year, region_code) pair, first kept",
            duplicates
        );
    }
    info!("Transformed region budgets: {} rows", records.len());
    Ok(records)
}

fn to_year(value: f64) -> Option<i32> {
    let truncated = value.trunc();
    if truncated >= i32::MIN as f64 && truncated <= i32::MAX as f64 {
        Some(truncated as i32)
    } else {
        None
    }
}

/// Trimmed string form of a code cell; blank counts as missing.
pub(crate) fn region_code_text(text: Option<String>) -> Option<String> {
    let text = text?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Left-pad with zeros to `width`, keeping a leading sign in front.
pub fn zero_pad(code: &str, width: usize) -> String {
    let len = code.chars().count();
    if len >= width {
        return code.to_string();
    }
    let zeros = "0".repeat(width - len);
    match code.chars().next() {
        Some(sign @ ('+' | '-')) => format!("{}{}{}", sign, zeros, &code[1..]),
        _ => format!("{}{}", zeros, code),
    }
}

/// "REG ILE-DE-FRANCE" -> "Ile-De-France".
///
/// The "REG" prefix must match exactly (uppercase) and be followed by
/// whitespace.
pub fn clean_region_name(raw: &str) -> String {
    let without_prefix = match raw.strip_prefix("REG") {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest,
        _ => raw,
    };
    title_case(without_prefix.trim())
}

/// Uppercase letters that follow a non-letter, lowercase the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}
