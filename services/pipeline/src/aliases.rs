//! Column alias maps for the upstream CSV dialects.
//!
//! Each canonical field has a priority-ordered candidate list. Candidates are
//! the normalized (lowercase, `_`-separated) header names seen in the source
//! files, followed by the canonical name itself. These lists encode knowledge
//! of specific publications and change only with a new dialect.

use crate::table::Table;

/// Canonical field and its candidates, highest priority first.
pub type AliasMap = &'static [(&'static str, &'static [&'static str])];

// ── Region budgets (comptes individuels des régions) ─────────────────────────
pub mod budget {
    pub const YEAR: &str = "year";
    pub const REGION_CODE: &str = "region_code";
    pub const REGION_NAME: &str = "region_name";
    pub const OPERATING_REVENUE: &str = "operating_revenue";
    pub const OPERATING_EXPENDITURE: &str = "operating_expenditure";
    pub const INVESTMENT_REVENUE: &str = "investment_revenue";
    pub const INVESTMENT_EXPENDITURE: &str = "investment_expenditure";
    pub const DEBT: &str = "debt";

    pub const ALIASES: super::AliasMap = &[
        (YEAR, &["exer", "annee", "year"]),
        (REGION_CODE, &["reg", "code_region", "region_code"]),
        (REGION_NAME, &["lbudg", "nom_region", "region_name"]),
        (OPERATING_REVENUE, &["rec_totales_f", "operating_revenue"]),
        (OPERATING_EXPENDITURE, &["dep_totales_f", "operating_expenditure"]),
        (INVESTMENT_REVENUE, &["rec_totales_i", "investment_revenue"]),
        (INVESTMENT_EXPENDITURE, &["dep_totales_i", "investment_expenditure"]),
        (DEBT, &["encours_de_dette", "debt"]),
    ];
}

// ── Communes (communes et villes de France) ──────────────────────────────────
pub mod commune {
    pub const CODE_INSEE: &[&str] = &["code_insee", "code_commune_insee"];
    pub const NAME: &[&str] = &["nom_standard", "nom_commune", "name", "nom"];
    pub const REGION_CODE: &[&str] = &["reg_code", "code_region", "region_code"];
    pub const REGION_NAME: &[&str] = &["reg_nom", "nom_region", "region_name"];
    pub const DEPARTMENT_CODE: &[&str] = &["dep_code", "code_departement", "department_code"];
    pub const DEPARTMENT_NAME: &[&str] = &["dep_nom", "nom_departement", "department_name"];
    pub const POPULATION: &[&str] = &["population", "pop"];
    pub const AREA_KM2: &[&str] = &["superficie_km2", "area_km2", "superficie"];
    pub const DENSITY: &[&str] = &["densite", "density"];
}

// ── Regional salary mass / partial unemployment (Urssaf) ─────────────────────
//
// Accented headers normalize with the accent collapsed to `_`
// ("Région" -> "r_gion"), so both spellings are listed.
pub mod employment {
    pub const REGION_NAME: &str = "region_name";
    pub const REGION_CODE: &str = "region_code";
    pub const DATE: &str = "date";
    pub const MONTH: &str = "month";
    pub const SALARY_MASS: &str = "salary_mass";
    pub const SALARY_YOY_CHANGE: &str = "salary_yoy_change";
    pub const PARTIAL_UNEMPLOYMENT_BASE: &str = "partial_unemployment_base";
    pub const PARTIAL_UNEMPLOYMENT_SHARE: &str = "partial_unemployment_share";

    pub const REGION_NAME_CANDIDATES: &[&str] =
        &["region", "r_gion", "libelle_region", "nom_region", "region_name"];
    pub const REGION_CODE_CANDIDATES: &[&str] = &[
        "code_region",
        "code_r_gion",
        "reg_code",
        "code_reg",
        "region_code",
    ];

    pub const ALIASES: super::AliasMap = &[
        (
            DATE,
            &["dernier_jour_du_mois", "date_fin_de_mois", "fin_de_mois", "date"],
        ),
        (
            SALARY_MASS,
            &["masse_salariale_brute", "masse_salariale", "salary_mass"],
        ),
        (
            SALARY_YOY_CHANGE,
            &[
                "evolution_annuelle_masse_salariale_brute",
                "volution_annuelle_masse_salariale_brute",
                "glissement_annuel_masse_salariale",
                "salary_yoy_change",
            ],
        ),
        (
            PARTIAL_UNEMPLOYMENT_BASE,
            &[
                "assiette_chomage_partiel",
                "assiette_ch_mage_partiel",
                "partial_unemployment_base",
            ],
        ),
        (
            PARTIAL_UNEMPLOYMENT_SHARE,
            &[
                "part_assiette_chomage_partiel",
                "part_de_l_assiette_chomage_partiel",
                "part_de_l_assiette_ch_mage_partiel",
                "partial_unemployment_share",
            ],
        ),
    ];
}

/// First candidate present in the table, in candidate order.
pub fn resolve_column<'a>(table: &Table, candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|c| table.has_column(c))
}

/// Rename resolved aliases to their canonical names.
///
/// Fields with no matching candidate are skipped. When a lower-priority
/// column already carries the canonical name, the higher-priority alias
/// replaces it. Unrelated columns pass through untouched.
pub fn rename_aliases(table: &Table, aliases: AliasMap) -> Table {
    let mut out = table.clone();
    for (canonical, candidates) in aliases {
        rename_to(&mut out, canonical, candidates);
    }
    out
}

/// Resolve one field and rename it in place. Returns whether it was found.
pub fn rename_to(table: &mut Table, canonical: &str, candidates: &[&str]) -> bool {
    match resolve_column(table, candidates) {
        Some(found) if found == canonical => true,
        Some(found) => {
            let found = found.to_string();
            table.drop_column(canonical);
            table.rename_column(&found, canonical)
        }
        None => false,
    }
}
