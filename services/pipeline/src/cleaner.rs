//! Table cleaning: column names, whitespace, duplicates, numeric types.
//!
//! Dirty values degrade to missing, they never raise, so a single bad cell
//! cannot abort a run. Errors only come from the frame operations themselves.

use log::info;
use polars::prelude::*;

use crate::error::Result;
use crate::table::{numeric_readings, unique_names, ColumnType, Table};

#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// Deduplicate on these columns only (first occurrence wins).
    pub dedupe_key: Option<Vec<String>>,
    /// Columns forced to a numeric type.
    pub numeric_columns: Vec<String>,
    /// Replacement for missing numeric cells.
    pub numeric_fill: f64,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            dedupe_key: None,
            numeric_columns: Vec::new(),
            numeric_fill: 0.0,
        }
    }
}

/// Run all cleaning stages in order.
pub fn clean(table: &Table, options: &CleanOptions) -> Result<Table> {
    let table = normalize_columns(table)?;
    let table = strip_strings(&table)?;
    let key: Option<Vec<String>> = options
        .dedupe_key
        .as_ref()
        .map(|k| k.iter().map(|c| normalize_column_name(c)).collect());
    let table = drop_duplicates(&table, key.as_deref())?;
    let numeric: Vec<String> = options
        .numeric_columns
        .iter()
        .map(|c| normalize_column_name(c))
        .collect();
    let table = coerce_numeric(&table, &numeric)?;
    let table = fill_missing_numeric(&table, options.numeric_fill)?;
    info!(
        "Cleaning complete: {} rows x {} cols",
        table.height(),
        table.width()
    );
    Ok(table)
}

/// Lowercase, collapse runs outside `[a-z0-9]` to `_`, strip edge `_`.
pub fn normalize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Normalize every column name. Names that collide after normalization get a
/// numeric suffix, first column keeping the plain name.
pub fn normalize_columns(table: &Table) -> Result<Table> {
    let names = unique_names(
        table
            .column_names()
            .iter()
            .map(|n| normalize_column_name(n)),
    );
    let mut df = table.df().clone();
    df.set_column_names(names)?;
    Ok(df.into())
}

/// Trim text cells. Numeric columns are untouched.
pub fn strip_strings(table: &Table) -> Result<Table> {
    let exprs: Vec<Expr> = table
        .df()
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String)
        .map(|c| col(c.name().clone()).str().strip_chars(lit(NULL)))
        .collect();
    if exprs.is_empty() {
        return Ok(table.clone());
    }
    let df = table.df().clone().lazy().with_columns(exprs).collect()?;
    Ok(df.into())
}

/// Remove duplicate rows, keeping the first occurrence in input order.
///
/// With `subset`, rows are compared on those columns only. Unknown subset
/// columns are ignored; if none are known the whole row is compared.
pub fn drop_duplicates(table: &Table, subset: Option<&[String]>) -> Result<Table> {
    let known: Vec<String> = subset
        .unwrap_or_default()
        .iter()
        .filter(|name| table.has_column(name))
        .cloned()
        .collect();
    let subset = if known.is_empty() {
        None
    } else {
        Some(known.as_slice())
    };

    let df = table
        .df()
        .unique_stable(subset, UniqueKeepStrategy::First, None)?;

    let removed = table.height() - df.height();
    if removed > 0 {
        info!("Removed {} duplicate rows", removed);
    }
    Ok(df.into())
}

/// Force named columns to numeric. Unparseable text becomes missing.
///
/// The result is Int when every parsed value was integral text, else Float.
/// Names not in the table are skipped.
pub fn coerce_numeric(table: &Table, columns: &[String]) -> Result<Table> {
    let mut df = table.df().clone();
    for name in columns {
        let Ok(column) = df.column(name) else {
            continue;
        };
        if column.dtype() != &DataType::String {
            continue;
        }
        let numeric = to_numeric(column)?;
        df.with_column(numeric)?;
    }
    Ok(df.into())
}

pub(crate) fn to_numeric(column: &Column) -> Result<Column> {
    let (ints, floats) = numeric_readings(column)?;
    if ints.null_count() == floats.null_count() {
        Ok(ints)
    } else {
        Ok(floats)
    }
}

/// Replace missing numeric cells with `value`. Text columns are untouched.
///
/// Int columns stay Int when `value` is integral and are promoted to Float
/// otherwise.
pub fn fill_missing_numeric(table: &Table, value: f64) -> Result<Table> {
    let exprs: Vec<Expr> = table
        .df()
        .get_columns()
        .iter()
        .filter_map(|c| {
            let name = c.name().clone();
            match ColumnType::of(c.dtype()) {
                ColumnType::Float => Some(col(name).fill_null(lit(value))),
                ColumnType::Int if value.fract() == 0.0 => {
                    Some(col(name).fill_null(lit(value as i64)))
                }
                ColumnType::Int => Some(col(name).cast(DataType::Float64).fill_null(lit(value))),
                ColumnType::Text => None,
            }
        })
        .collect();
    if exprs.is_empty() {
        return Ok(table.clone());
    }
    let df = table.df().clone().lazy().with_columns(exprs).collect()?;
    Ok(df.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(df: PolarsResult<DataFrame>) -> Table {
        Table::from(df.unwrap())
    }

    fn texts(table: &Table, name: &str) -> Vec<Option<String>> {
        table.text_values(name).unwrap()
    }

    fn ints(table: &Table, name: &str) -> Vec<Option<i64>> {
        table.df().column(name).unwrap().i64().unwrap().into_iter().collect()
    }

    fn floats(table: &Table, name: &str) -> Vec<Option<f64>> {
        table.df().column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    // -------------------------------------------------------------------------
    // COLUMN NAME NORMALIZATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("  Col Name  "), "col_name");
        assert_eq!(normalize_column_name("Another-Col!"), "another_col");
        assert_eq!(normalize_column_name("__A  -- b__"), "a_b");
        assert_eq!(normalize_column_name("Région"), "r_gion");
        assert_eq!(normalize_column_name("!!!"), "");
    }

    #[test]
    fn test_normalize_column_name_idempotent() {
        for name in [
            "  Col Name  ",
            "Another-Col!",
            "Dernier jour du mois",
            "Code région",
            "rec_totales_f",
            "Masse salariale brute (€)",
        ] {
            let once = normalize_column_name(name);
            assert_eq!(normalize_column_name(&once), once);
        }
    }

    #[test]
    fn test_normalize_columns_table() {
        let t = table(df!("  Col Name  " => [1i64], "Another-Col!" => [2i64]));
        let out = normalize_columns(&t).unwrap();
        assert_eq!(out.column_names(), vec!["col_name", "another_col"]);
        assert_eq!(normalize_columns(&out).unwrap(), out);
    }

    #[test]
    fn test_normalize_columns_collisions_get_suffix() {
        let t = table(df!("Code" => [1i64], "code " => [2i64]));
        let out = normalize_columns(&t).unwrap();
        assert_eq!(out.column_names(), vec!["code", "code_2"]);
        assert_eq!(ints(&out, "code"), vec![Some(1)]);
    }

    // -------------------------------------------------------------------------
    // STRING TRIMMING
    // -------------------------------------------------------------------------

    #[test]
    fn test_strip_strings() {
        let t = table(df!(
            "city" => [Some("  Paris  "), Some(" Lyon"), None],
            "code" => [Some(75i64), Some(69), None]
        ));
        let out = strip_strings(&t).unwrap();
        assert_eq!(
            texts(&out, "city"),
            vec![Some("Paris".to_string()), Some("Lyon".to_string()), None]
        );
        assert_eq!(ints(&out, "code"), ints(&t, "code"));
    }

    // -------------------------------------------------------------------------
    // DEDUPLICATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_drop_duplicates_full_row() {
        let t = table(df!("a" => [1i64, 1, 2], "b" => [10i64, 10, 20]));
        assert_eq!(drop_duplicates(&t, None).unwrap().height(), 2);
    }

    #[test]
    fn test_drop_duplicates_subset_keeps_first() {
        let t = table(df!("a" => [1i64, 1, 2], "b" => [10i64, 20, 20]));
        let out = drop_duplicates(&t, Some(&["a".to_string()])).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(ints(&out, "b"), vec![Some(10), Some(20)]);
    }

    #[test]
    fn test_drop_duplicates_one_row_per_key() {
        let t = table(df!(
            "k" => ["x", "y", "x", "y", "z"],
            "v" => [1i64, 2, 3, 4, 5]
        ));
        let out = drop_duplicates(&t, Some(&["k".to_string()])).unwrap();
        assert_eq!(
            texts(&out, "k"),
            vec![Some("x".to_string()), Some("y".to_string()), Some("z".to_string())]
        );
        assert_eq!(ints(&out, "v"), vec![Some(1), Some(2), Some(5)]);
    }

    #[test]
    fn test_drop_duplicates_missing_equals_missing() {
        let t = table(df!("a" => [None, None, Some(1.0)]));
        assert_eq!(drop_duplicates(&t, None).unwrap().height(), 2);
    }

    #[test]
    fn test_drop_duplicates_unknown_subset_falls_back_to_full_row() {
        let t = table(df!("a" => [1i64, 1], "b" => [1i64, 2]));
        let out = drop_duplicates(&t, Some(&["nope".to_string()])).unwrap();
        assert_eq!(out.height(), 2);
    }

    // -------------------------------------------------------------------------
    // NUMERIC COERCION AND FILL
    // -------------------------------------------------------------------------

    #[test]
    fn test_coerce_numeric() {
        let t = table(df!("amount" => ["100", "N/A", "300"]));
        let out = coerce_numeric(&t, &["amount".to_string()]).unwrap();
        assert_eq!(ints(&out, "amount"), vec![Some(100), None, Some(300)]);
    }

    #[test]
    fn test_coerce_numeric_decimal_text_is_float() {
        let t = table(df!("rate" => ["1.25", "x", "3"]));
        let out = coerce_numeric(&t, &["rate".to_string()]).unwrap();
        assert_eq!(floats(&out, "rate"), vec![Some(1.25), None, Some(3.0)]);
    }

    #[test]
    fn test_coerce_numeric_integral_text_stays_int() {
        let t = table(df!("n" => [Some("1"), None, Some(" 3 ")]));
        let out = coerce_numeric(&t, &["n".to_string()]).unwrap();
        assert_eq!(ints(&out, "n"), vec![Some(1), None, Some(3)]);
    }

    #[test]
    fn test_coerce_numeric_skips_unknown_and_unlisted() {
        let t = table(df!("name" => ["abc"]));
        let out = coerce_numeric(&t, &["missing".to_string()]).unwrap();
        assert_eq!(out, t);
    }

    #[test]
    fn test_fill_missing_numeric() {
        let t = table(df!(
            "val" => [Some(1.0), None, Some(3.0)],
            "name" => [Some("a"), None, Some("c")]
        ));
        let out = fill_missing_numeric(&t, 0.0).unwrap();
        assert_eq!(floats(&out, "val"), vec![Some(1.0), Some(0.0), Some(3.0)]);
        assert_eq!(texts(&out, "name"), texts(&t, "name"));
    }

    #[test]
    fn test_fill_missing_numeric_int_promotion() {
        let t = table(df!("n" => [Some(1i64), None]));

        let integral = fill_missing_numeric(&t, 0.0).unwrap();
        assert_eq!(ints(&integral, "n"), vec![Some(1), Some(0)]);

        let fractional = fill_missing_numeric(&t, 0.5).unwrap();
        assert_eq!(floats(&fractional, "n"), vec![Some(1.0), Some(0.5)]);
    }

    // -------------------------------------------------------------------------
    // FULL CLEANING
    // -------------------------------------------------------------------------

    #[test]
    fn test_clean_integration() {
        let t = table(df!(
            "  Name " => ["  Alice ", "  Bob ", "  Alice "],
            "Value!" => [Some(10.0), None, Some(10.0)]
        ));
        let out = clean(&t, &CleanOptions::default()).unwrap();

        assert_eq!(out.column_names(), vec!["name", "value"]);
        assert_eq!(out.height(), 2);
        assert_eq!(floats(&out, "value"), vec![Some(10.0), Some(0.0)]);
    }

    #[test]
    fn test_clean_trims_before_dedupe() {
        let t = table(df!("city" => ["Paris ", " Paris"]));
        assert_eq!(clean(&t, &CleanOptions::default()).unwrap().height(), 1);
    }

    #[test]
    fn test_clean_with_key_and_numeric_columns() {
        let t = table(df!(
            "Code" => ["a", "a", "b"],
            "Amount" => ["1.5", "2", "oops"]
        ));
        let options = CleanOptions {
            dedupe_key: Some(vec!["Code".to_string()]),
            numeric_columns: vec!["Amount".to_string()],
            numeric_fill: -1.0,
        };
        let out = clean(&t, &options).unwrap();

        assert_eq!(out.height(), 2);
        assert_eq!(out.column_type("amount"), Some(ColumnType::Float));
        assert_eq!(floats(&out, "amount"), vec![Some(1.5), Some(-1.0)]);
    }

    #[test]
    fn test_clean_empty_table() {
        let empty: Vec<f64> = Vec::new();
        let t = table(df!("A" => &empty, "B" => &empty));
        let out = clean(&t, &CleanOptions::default()).unwrap();
        assert_eq!(out.height(), 0);
        assert_eq!(out.column_names(), vec!["a", "b"]);
    }
}
