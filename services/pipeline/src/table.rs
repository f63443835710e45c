//! Typed tabular snapshots passed between pipeline stages.
//!
//! A [`Table`] wraps a polars [`DataFrame`]. Column types are discovered once,
//! when raw text is loaded, so later stages work against a known [`Schema`]
//! instead of untyped cells.

use std::collections::HashSet;

use polars::prelude::*;

use crate::error::Result;

/// Column descriptor, as the stages see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int,
    Float,
}

impl ColumnType {
    pub fn of(dtype: &DataType) -> Self {
        if dtype.is_integer() {
            ColumnType::Int
        } else if dtype.is_float() {
            ColumnType::Float
        } else {
            ColumnType::Text
        }
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    df: DataFrame,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            df: DataFrame::empty(),
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.df.equals_missing(&other.df)
    }
}

impl From<DataFrame> for Table {
    fn from(df: DataFrame) -> Self {
        Self { df }
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.df.column(name).is_ok()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.df.column(name).ok().map(|c| ColumnType::of(c.dtype()))
    }

    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.df
            .schema()
            .iter()
            .map(|(name, dtype)| (name.to_string(), ColumnType::of(dtype)))
            .collect()
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn width(&self) -> usize {
        self.df.width()
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0
    }

    /// Rename column `from`. Returns false if there is none.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        self.df.rename(from, to.into()).is_ok()
    }

    pub fn drop_column(&mut self, name: &str) -> bool {
        self.df.drop_in_place(name).is_ok()
    }

    /// String form of every cell of a column, whatever its type.
    ///
    /// Floats with no fractional part render like integers (`11.0` -> `11`).
    pub fn text_values(&self, name: &str) -> Option<Vec<Option<String>>> {
        let column = self.df.column(name).ok()?;
        if ColumnType::of(column.dtype()) == ColumnType::Float {
            let floats = column.cast(&DataType::Float64).ok()?;
            let values = floats.f64().ok()?.into_iter().map(|v| v.map(render_float));
            return Some(values.collect());
        }
        let strings = column.cast(&DataType::String).ok()?;
        let values = strings.str().ok()?.into_iter().map(|v| v.map(str::to_string));
        Some(values.collect())
    }

    /// Numeric view of a column. Text cells are parsed; failures are missing.
    pub fn number_values(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let column = self.df.column(name).ok()?;
        if column.dtype() == &DataType::String {
            let values = column.str().ok()?.into_iter().map(|v| v.and_then(parse_number));
            return Some(values.collect());
        }
        let floats = column.cast(&DataType::Float64).ok()?;
        let values = floats.f64().ok()?.into_iter();
        Some(values.collect())
    }
}

/// Suffix repeated names (`a`, `a_2`, `a_3`) so every column name is distinct.
pub fn unique_names<I: IntoIterator<Item = String>>(names: I) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", name, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Read a text column as Int64 and as finite Float64.
///
/// Cells are trimmed first; anything unparseable is null in both readings.
pub(crate) fn numeric_readings(column: &Column) -> Result<(Column, Column)> {
    let name = column.name().clone();
    let trimmed = || col(name.clone()).str().strip_chars(lit(NULL));
    let parsed = DataFrame::new(vec![column.clone()])?
        .lazy()
        .select([
            trimmed().cast(DataType::Int64).alias("int"),
            trimmed().cast(DataType::Float64).alias("float"),
        ])
        .collect()?;

    let ints = parsed.column("int")?.clone().with_name(name.clone());
    let floats: Float64Chunked = parsed
        .column("float")?
        .f64()?
        .into_iter()
        .map(|v| v.filter(|f| f.is_finite()))
        .collect();
    Ok((ints, floats.with_name(name).into_column()))
}

/// Narrowest type holding every present value of a text column.
///
/// All integers -> Int64, all numbers -> Float64, anything else stays text.
/// A column with no values at all is a missing numeric (Float64).
pub fn infer_column(column: Column) -> Result<Column> {
    if column.dtype() != &DataType::String {
        return Ok(column);
    }
    if column.null_count() == column.len() {
        return Ok(column.cast(&DataType::Float64)?);
    }
    let (ints, floats) = numeric_readings(&column)?;
    if floats.null_count() > column.null_count() {
        return Ok(column);
    }
    if ints.null_count() == floats.null_count() {
        Ok(ints)
    } else {
        Ok(floats)
    }
}

/// Parse a finite number. NaN and infinities count as unparseable.
pub fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Floats with no fractional part render like integers (`11.0` -> `11`).
pub fn render_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_column(name: &str, values: &[Option<&str>]) -> Column {
        Column::new(name.into(), values)
    }

    #[test]
    fn test_infer_int_column() {
        let inferred = infer_column(text_column("reg", &[Some("011"), Some("24"), None])).unwrap();
        assert_eq!(inferred.dtype(), &DataType::Int64);
        let values: Vec<Option<i64>> = inferred.i64().unwrap().into_iter().collect();
        assert_eq!(values, vec![Some(11), Some(24), None]);
    }

    #[test]
    fn test_infer_float_column() {
        let inferred = infer_column(text_column("x", &[Some("1.5"), Some(" 2 "), None])).unwrap();
        let values: Vec<Option<f64>> = inferred.f64().unwrap().into_iter().collect();
        assert_eq!(values, vec![Some(1.5), Some(2.0), None]);
    }

    #[test]
    fn test_infer_text_column() {
        let inferred = infer_column(text_column("dep", &[Some("2A"), Some("24")])).unwrap();
        assert_eq!(ColumnType::of(inferred.dtype()), ColumnType::Text);
    }

    #[test]
    fn test_infer_all_missing_is_float() {
        let inferred = infer_column(text_column("x", &[None, None])).unwrap();
        assert_eq!(inferred.dtype(), &DataType::Float64);
        assert_eq!(inferred.null_count(), 2);
    }

    #[test]
    fn test_non_finite_text_stays_text() {
        let inferred = infer_column(text_column("x", &[Some("NaN"), Some("1")])).unwrap();
        assert_eq!(ColumnType::of(inferred.dtype()), ColumnType::Text);
    }

    #[test]
    fn test_nan_text_is_not_a_number() {
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
    }

    #[test]
    fn test_render_float() {
        assert_eq!(render_float(11.0), "11");
        assert_eq!(render_float(2.5), "2.5");
    }

    #[test]
    fn test_unique_names() {
        let names = unique_names(["a", "b", "a", "a"].map(String::from));
        assert_eq!(names, vec!["a", "b", "a_2", "a_3"]);
    }

    #[test]
    fn test_rename_drop_and_views() {
        let mut table = Table::from(
            df!(
                "a" => [Some(1i64), Some(2), None],
                "b" => ["x", " y", "z"],
                "c" => [Some(76.0), Some(2.5), None]
            )
            .unwrap(),
        );

        assert!(table.rename_column("a", "alpha"));
        assert!(!table.rename_column("missing", "other"));
        assert_eq!(table.column_names(), vec!["alpha", "b", "c"]);

        assert_eq!(
            table.text_values("alpha").unwrap(),
            vec![Some("1".to_string()), Some("2".to_string()), None]
        );
        assert_eq!(
            table.text_values("c").unwrap(),
            vec![Some("76".to_string()), Some("2.5".to_string()), None]
        );
        assert_eq!(
            table.number_values("b").unwrap(),
            vec![None, None, None]
        );
        assert_eq!(table.text_values("nope"), None);

        assert!(table.drop_column("b"));
        assert_eq!(table.width(), 2);
        assert_eq!(
            table.schema(),
            vec![
                ("alpha".to_string(), ColumnType::Int),
                ("c".to_string(), ColumnType::Float),
            ]
        );
    }

    #[test]
    fn test_empty_table_height() {
        assert_eq!(Table::new().height(), 0);
        assert!(Table::new().is_empty());
    }
}
