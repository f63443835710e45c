use thiserror::Error;

/// Errors raised by the transformation core.
///
/// Only structural problems surface here. Unparseable cells never do: they
/// become missing values and are handled by the fill/drop rules of each stage.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Missing column: {column} (available: {available:?})")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

impl TransformError {
    pub(crate) fn missing(column: &str, available: Vec<String>) -> Self {
        TransformError::MissingColumn {
            column: column.to_string(),
            available,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
