//! Cleaning, canonicalization and cross-joining of French regional open data
//! (region budgets, commune register, regional payroll).

pub mod aliases;
pub mod cleaner;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod table;
pub mod transform;

pub use error::{Result, TransformError};
pub use pipeline::{process, PipelineOutput, RawTables};
