//! Canonical record builders, one module per upstream dataset, plus the
//! region cross-join.

pub mod budgets;
pub mod communes;
pub mod employment;
pub mod region_stats;

pub use budgets::{transform_budgets, BudgetRecord};
pub use communes::{aggregate_by_region, extract_communes, CommuneRecord, RegionAggregate};
pub use employment::{transform_employment, EmploymentRecord};
pub use region_stats::{compute_region_stats, RegionStats};
