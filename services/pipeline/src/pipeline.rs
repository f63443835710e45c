//! Clean -> transform -> cross-join, over the three raw sources.
//!
//! `process` is pure and synchronous. Reading raw files and writing exports
//! are separate helpers so the binary decides where data comes from and goes.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::cleaner::{clean, CleanOptions};
use crate::error::Result;
use crate::source::load_raw;
use crate::table::Table;
use crate::transform::{
    aggregate_by_region, compute_region_stats, extract_communes, transform_budgets,
    transform_employment, BudgetRecord, CommuneRecord, EmploymentRecord, RegionAggregate,
    RegionStats,
};

/// A raw file in the ingestion area and the CSV dialect it is published in.
///
/// The collector writes `<key>.csv`; the pipeline reads it back with the
/// same separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFile {
    pub key: &'static str,
    pub separator: u8,
}

impl RawFile {
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.key)
    }

    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    pub fn load(&self, dir: &Path) -> Result<Table> {
        load_raw(&self.path(dir), Some(self.separator))
    }
}

pub const BUDGETS_RAW: RawFile = RawFile {
    key: "region_budgets",
    separator: b';',
};
pub const COMMUNES_RAW: RawFile = RawFile {
    key: "communes",
    separator: b',',
};
pub const EMPLOYMENT_RAW: RawFile = RawFile {
    key: "chomage_regional",
    separator: b';',
};

/// Raw tables as read from the ingestion area.
#[derive(Debug, Clone)]
pub struct RawTables {
    pub budgets: Table,
    pub communes: Table,
    /// Absent when the payroll dataset could not be obtained.
    pub employment: Option<Table>,
}

/// Canonical tables produced by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub budgets: Vec<BudgetRecord>,
    pub communes: Vec<CommuneRecord>,
    pub region_aggregates: Vec<RegionAggregate>,
    pub region_stats: Vec<RegionStats>,
    pub employment: Option<Vec<EmploymentRecord>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineCounts {
    pub budgets: usize,
    pub communes: usize,
    pub region_aggregates: usize,
    pub region_stats: usize,
    pub employment: Option<usize>,
}

impl PipelineOutput {
    pub fn counts(&self) -> PipelineCounts {
        PipelineCounts {
            budgets: self.budgets.len(),
            communes: self.communes.len(),
            region_aggregates: self.region_aggregates.len(),
            region_stats: self.region_stats.len(),
            employment: self.employment.as_ref().map(Vec::len),
        }
    }
}

/// Run every stage over already-loaded raw tables.
///
/// Fails on a missing load-bearing column in budgets or communes, or on a
/// frame error; nothing has been written anywhere at that point.
pub fn process(raw: &RawTables) -> Result<PipelineOutput> {
    info!("=== Cleaning ===");
    let options = CleanOptions::default();
    let budgets = clean(&raw.budgets, &options)?;
    let communes = clean(&raw.communes, &options)?;
    let employment = raw
        .employment
        .as_ref()
        .map(|t| clean(t, &options))
        .transpose()?;

    info!("=== Transforming ===");
    let budgets = transform_budgets(&budgets)?;
    let region_aggregates = aggregate_by_region(&communes)?;
    let region_stats = compute_region_stats(&budgets, &region_aggregates)?;
    let employment = employment.as_ref().map(transform_employment);
    let communes = extract_communes(&communes);

    Ok(PipelineOutput {
        budgets,
        communes,
        region_aggregates,
        region_stats,
        employment,
    })
}

/// Load the three raw files from `raw_dir`.
///
/// Budgets and communes are required. The payroll file is optional: a
/// missing or unreadable file is logged and left out.
pub fn load_raw_tables(raw_dir: &Path) -> Result<RawTables> {
    let budgets = BUDGETS_RAW.load(raw_dir)?;
    let communes = COMMUNES_RAW.load(raw_dir)?;
    let employment = match EMPLOYMENT_RAW.load(raw_dir) {
        Ok(table) => Some(table),
        Err(e) => {
            warn!("Could not load employment data, skipping: {}", e);
            None
        }
    };
    Ok(RawTables {
        budgets,
        communes,
        employment,
    })
}

fn write_table<T: Serialize>(dir: &Path, name: &str, records: &[T]) -> Result<PathBuf> {
    let path = dir.join(format!("{}.csv", name));
    let mut writer = csv::Writer::from_writer(File::create(&path)?);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("Exported {} rows to {}", records.len(), path.display());
    Ok(path)
}

/// Write each canonical table to `<dir>/<table>.csv`. Returns the files written.
pub fn export_csv(dir: &Path, output: &PipelineOutput) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = vec![
        write_table(dir, "region_budgets", &output.budgets)?,
        write_table(dir, "communes", &output.communes)?,
        write_table(dir, "region_aggregates", &output.region_aggregates)?,
        write_table(dir, "region_stats", &output.region_stats)?,
    ];
    if let Some(employment) = &output.employment {
        written.push(write_table(dir, "region_employment", employment)?);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::source::read_csv;

    const BUDGETS_CSV: &str = "exer;reg;lbudg;rec_totales_f;dep_totales_f;rec_totales_i;dep_totales_i;encours_de_dette\n\
        2023;011;REG ILE-DE-FRANCE;5000000;4500000;1000000;800000;2000000\n\
        2023;011;REG ILE-DE-FRANCE;5000000;4500000;1000000;800000;2000000\n\
        2023;053;REG BRETAGNE;900000;850000;100000;90000;10000\n";

    const COMMUNES_CSV: &str = "code_insee,nom_standard,reg_code,reg_nom,dep_code,dep_nom,population,superficie_km2,densite\n\
        75056,Paris,11,Ile-de-France,75,Paris,2165423,105.4,20545\n\
        75101,Paris 1er,11,Ile-de-France,75,Paris,16000,1.8,8889\n\
        45234,Orleans,24,Centre-Val de Loire,45,Loiret,116685,27.5,4243\n";

    const EMPLOYMENT_CSV: &str = "Région;Code région;Dernier jour du mois;Masse salariale brute\n\
        Ile-de-France;11;2023-01-31;1000\n\
        Ile-de-France;11;2023-02-28;1100\n";

    fn raw(employment: Option<&str>) -> RawTables {
        RawTables {
            budgets: read_csv(BUDGETS_CSV.as_bytes(), None).unwrap(),
            communes: read_csv(COMMUNES_CSV.as_bytes(), None).unwrap(),
            employment: employment.map(|csv| read_csv(csv.as_bytes(), None).unwrap()),
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pipeline-{}-{}", name, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    // -------------------------------------------------------------------------
    // PROCESS
    // -------------------------------------------------------------------------

    #[test]
    fn test_process_end_to_end() {
        let output = process(&raw(Some(EMPLOYMENT_CSV))).unwrap();

        assert_eq!(output.budgets.len(), 2, "duplicate budget row removed");
        assert_eq!(output.budgets[0].region_code, "011");
        assert_eq!(output.budgets[0].total_revenue, Some(6_000_000.0));

        assert_eq!(output.region_aggregates.len(), 2);
        assert_eq!(output.communes.len(), 3);

        // Bretagne has no communes in the register, so only Ile-de-France joins.
        assert_eq!(output.region_stats.len(), 1);
        let stats = &output.region_stats[0];
        assert_eq!(stats.region_code, "11");
        assert_eq!(stats.total_population, 2_181_423);
        assert_eq!(stats.revenue_per_capita, Some(2.75));

        let employment = output.employment.as_ref().unwrap();
        assert_eq!(employment.len(), 2);
        assert_eq!(employment[1].month, "2023-02");

        assert_eq!(
            output.counts(),
            PipelineCounts {
                budgets: 2,
                communes: 3,
                region_aggregates: 2,
                region_stats: 1,
                employment: Some(2),
            }
        );
    }

    #[test]
    fn test_process_without_employment() {
        let output = process(&raw(None)).unwrap();
        assert!(output.employment.is_none());
        assert_eq!(output.counts().employment, None);
        assert_eq!(output.region_stats.len(), 1);
    }

    #[test]
    fn test_process_missing_budget_column_fails() {
        let mut tables = raw(None);
        tables.budgets = read_csv(b"lbudg;rec_totales_f\nREG X;1\n", None).unwrap();
        let err = process(&tables).unwrap_err();
        assert!(matches!(err, TransformError::MissingColumn { .. }));
    }

    #[test]
    fn test_process_empty_join_is_not_an_error() {
        let mut tables = raw(None);
        tables.communes = read_csv(b"reg_code,population\n99,10\n", None).unwrap();
        let output = process(&tables).unwrap();
        assert!(output.region_stats.is_empty());
        assert_eq!(output.budgets.len(), 2);
    }

    #[test]
    fn test_process_keeps_first_budget_per_year_and_region() {
        let mut tables = raw(None);
        tables.budgets = read_csv(
            b"exer;reg;lbudg;rec_totales_f;rec_totales_i\n\
              2023;011;REG ILE-DE-FRANCE;5000000;1000000\n\
              2023;011;REG ILE-DE-FRANCE;7000000;1000000\n",
            None,
        )
        .unwrap();
        let output = process(&tables).unwrap();

        assert_eq!(output.budgets.len(), 1);
        assert_eq!(output.budgets[0].total_revenue, Some(6_000_000.0));
        assert_eq!(output.region_stats.len(), 1);
        assert_eq!(output.region_stats[0].total_revenue, Some(6_000_000.0));
    }

    #[test]
    fn test_process_huge_populations_do_not_overflow() {
        let mut tables = raw(None);
        tables.communes = read_csv(b"reg_code,population\n11,9e18\n11,8e18\n", None).unwrap();
        let output = process(&tables).unwrap();

        assert_eq!(output.region_aggregates[0].total_population, i64::MAX);
        assert_eq!(output.region_stats[0].total_population, i64::MAX);
        assert_eq!(output.region_stats[0].revenue_per_capita, Some(0.0));
    }

    // -------------------------------------------------------------------------
    // FILES
    // -------------------------------------------------------------------------

    #[test]
    fn test_raw_files() {
        assert_eq!(BUDGETS_RAW.file_name(), "region_budgets.csv");
        assert_eq!(COMMUNES_RAW.path(Path::new("raw")), Path::new("raw/communes.csv"));
        assert_eq!(EMPLOYMENT_RAW.separator, b';');
    }

    #[test]
    fn test_load_raw_tables_uses_each_file_separator() {
        let dir = scratch_dir("separators");
        // The budget name holds a comma; only the semicolon splits fields.
        fs::write(BUDGETS_RAW.path(&dir), "exer;reg;lbudg\n2023;011;REG A, B\n").unwrap();
        fs::write(COMMUNES_RAW.path(&dir), "reg_code,population\n11,5\n").unwrap();

        let tables = load_raw_tables(&dir).unwrap();
        assert_eq!(tables.budgets.column_names(), vec!["exer", "reg", "lbudg"]);
        assert_eq!(tables.communes.column_names(), vec!["reg_code", "population"]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_raw_tables_skips_missing_employment() {
        let dir = scratch_dir("load");
        fs::write(BUDGETS_RAW.path(&dir), BUDGETS_CSV).unwrap();
        fs::write(COMMUNES_RAW.path(&dir), COMMUNES_CSV).unwrap();

        let tables = load_raw_tables(&dir).unwrap();
        assert!(tables.employment.is_none());
        assert_eq!(tables.budgets.height(), 3);
        assert_eq!(tables.communes.height(), 3);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_raw_tables_requires_budgets() {
        let dir = scratch_dir("missing");
        fs::write(COMMUNES_RAW.path(&dir), COMMUNES_CSV).unwrap();
        assert!(matches!(load_raw_tables(&dir), Err(TransformError::Io(_))));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_export_csv() {
        let dir = scratch_dir("export");
        let output = process(&raw(None)).unwrap();
        let written = export_csv(&dir, &output).unwrap();
        assert_eq!(written.len(), 4);

        let budgets = fs::read_to_string(dir.join("region_budgets.csv")).unwrap();
        let mut lines = budgets.lines();
        assert_eq!(
            lines.next(),
            Some("year,region_code,region_name,total_revenue,total_expenditure,operating_revenue,operating_expenditure,investment_revenue,investment_expenditure,debt")
        );
        assert!(lines.next().unwrap().starts_with("2023,011,Ile-De-France,"));

        fs::remove_dir_all(&dir).ok();
    }
}
