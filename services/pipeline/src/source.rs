//! Raw CSV decoding into typed tables.

use std::path::Path;

use log::{debug, info};
use polars::prelude::{Column, DataFrame};

use crate::error::Result;
use crate::table::{infer_column, unique_names, Table};

/// Pick `;` over `,` only when it is strictly more frequent on the header line.
pub fn detect_separator(content: &str) -> u8 {
    let first_line = content.lines().next().unwrap_or("");
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Decode bytes as UTF-8, falling back to Windows-1252 for legacy exports.
pub fn decode(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
            debug!("Input is not UTF-8, decoded as windows-1252 (errors: {})", had_errors);
            decoded.into_owned()
        }
    };
    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// Parse CSV content into a table with inferred column types.
///
/// Rows shorter than the header are padded with missing cells; extra fields
/// are ignored. Empty cells are missing. Repeated header names get a numeric
/// suffix.
pub fn read_csv(bytes: &[u8], separator: Option<u8>) -> Result<Table> {
    let content = decode(bytes);
    let separator = separator.unwrap_or_else(|| detect_separator(&content));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = unique_names(reader.headers()?.iter().map(|h| h.to_string()));
    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

    for result in reader.records() {
        let record = result?;
        for (idx, column) in cells.iter_mut().enumerate() {
            let value = record
                .get(idx)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string());
            column.push(value);
        }
    }

    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, raw)| infer_column(Column::new(name.into(), raw)))
        .collect::<Result<Vec<Column>>>()?;
    let table = Table::from(DataFrame::new(columns)?);
    info!(
        "Read CSV: {} rows x {} columns (separator '{}')",
        table.height(),
        table.width(),
        separator as char
    );
    Ok(table)
}

pub fn load_raw(path: &Path, separator: Option<u8>) -> Result<Table> {
    info!("Loading raw file {}", path.display());
    let bytes = std::fs::read(path)?;
    read_csv(&bytes, separator)
}
