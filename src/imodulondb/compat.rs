//! Checks a model for the information iModulonDB pages need, and fills in
//! what can be derived.

use super::tf::{get_tfs_to_scatter, parse_tf_string, tf_with_links};
use crate::data::{AnnotationTable, IcaData, Value};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Gene table columns and the site behavior when they are absent.
const GENE_COLUMNS: [(&str, &str); 6] = [
    ("gene_name", "Locus tags (gene_table.index) will be used."),
    ("gene_product", "Locus tags (gene_table.index) will be used."),
    (
        "cog",
        "COG info will not display & the gene scatter plot will not have color.",
    ),
    (
        "start",
        "The x axis of the scatter plot will be a numerical value instead of a genome location.",
    ),
    ("operon", "Operon info will not display."),
    (
        "regulator",
        "Regulator info will not display. If you have a TRN, add it to the model to \
         auto-generate this column.",
    ),
];

const SAMPLE_COLUMNS: [(&str, &str); 5] = [
    (
        "project",
        "This is a CRITICAL column defining the largest grouping of samples. Vertical bars in \
         the activity plot will separate projects.",
    ),
    (
        "condition",
        "This is an CRITICAL column defining the smallest grouping of samples. Biological \
         replicates must have matching projects and conditions, and they will appear as single \
         bars with averaged activities.",
    ),
    (
        "sample",
        "The sample_table.index will be used. Each entry must be unique. Note that the \
         preferred syntax is \"project__condition__#.\"",
    ),
    ("n_replicates", "This column will be generated for you."),
    (
        "doi",
        "Clicking on activity plot bars will not link to relevant papers for the samples.",
    ),
];

const IMODULON_COLUMNS: [(&str, &str); 8] = [
    ("name", "imodulon_table.index will be used."),
    ("regulator", "The regulator details will be left blank."),
    (
        "function",
        "The function will be blank in the dataset table and \"Uncharacterized\" in the \
         iModulon dashboard",
    ),
    (
        "category",
        "The categories will be filled in as \"Uncharacterized\".",
    ),
    ("n_genes", "This column will be computed for you."),
    ("precision", "This column will be left blank."),
    ("recall", "This column will be left blank."),
    ("exp_var", "This column will be left blank."),
];

/// A missing table, column or metadata field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableIssue {
    #[serde(rename = "Table")]
    pub table: String,
    #[serde(rename = "Missing Column")]
    pub missing_column: String,
    /// Site behavior if the issue remains; contains "CRITICAL" when the
    /// export cannot work around it.
    #[serde(rename = "Solution")]
    pub solution: String,
}

impl TableIssue {
    fn new(table: &str, missing_column: &str, solution: &str) -> Self {
        Self {
            table: table.to_string(),
            missing_column: missing_column.to_string(),
            solution: solution.to_string(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.solution.contains("CRITICAL")
    }
}

/// A regulator named in the iModulon table that lacks something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfIssue {
    pub regulator: String,
    /// Listed in the TRN; otherwise ignored by gene tables and histograms.
    pub in_trn: bool,
    /// Has a TF link.
    pub has_link: bool,
    /// Matches a gene with expression data; otherwise no regulator scatter.
    pub has_gene: bool,
}

/// Everything [`check_compatibility`] found.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub table_issues: Vec<TableIssue>,
    pub tf_issues: Vec<TfIssue>,
    /// Genes whose pages will have no external link.
    pub missing_gene_links: Vec<String>,
    /// Samples whose activity bars will not link to a paper.
    pub missing_dois: Vec<String>,
}

impl CompatibilityReport {
    pub fn has_critical_issues(&self) -> bool {
        self.table_issues.iter().any(TableIssue::is_critical)
    }

    pub fn is_clean(&self) -> bool {
        self.table_issues.is_empty()
            && self.tf_issues.is_empty()
            && self.missing_gene_links.is_empty()
            && self.missing_dois.is_empty()
    }
}

/// Whether every iModulon name is an integer.
pub(crate) fn integer_names(model: &IcaData) -> bool {
    model
        .imodulon_names()
        .iter()
        .all(|k| k.trim().parse::<i64>().is_ok())
}

/// List everything missing for an iModulonDB export without changing the
/// model.
pub fn check_compatibility(
    model: &IcaData,
    tfcomplex_to_gene: &HashMap<String, String>,
) -> CompatibilityReport {
    let mut issues = Vec::new();

    if model.x().is_none() {
        warn!("Critical issue: No X matrix");
        issues.push(TableIssue::new(
            "X",
            "all",
            "CRITICAL. Add the expression matrix so that gene pages can be generated.",
        ));
    }

    let meta = model.imodulondb_meta();
    for field in meta.unchanged_fields() {
        let solution = if field == "publication_link" {
            "The publication name will not be a hyperlink.".to_string()
        } else {
            let value = meta
                .fields()
                .iter()
                .find(|(name, _)| *name == field)
                .map(|(_, v)| v.to_string())
                .unwrap_or_default();
            format!("The default, \"{}\", will be used.", value)
        };
        issues.push(TableIssue::new("iModulonDB", field, &solution));
    }

    let genes = model.gene_table();
    for (column, solution) in GENE_COLUMNS {
        if genes.find_column_ci(column).is_none() {
            issues.push(TableIssue::new("Gene", column, solution));
        }
    }

    let samples = model.sample_table();
    let mut seen = HashSet::new();
    if !samples.columns().iter().all(|c| seen.insert(c.to_lowercase())) {
        warn!("Critical issue: Duplicated column names (case insensitive) in sample_table");
        issues.push(TableIssue::new(
            "Sample",
            "N/A - Duplicated Columns Exist",
            "Column names (case insensitive) should not be duplicated. Pay special attention \
             the 'sample' column.",
        ));
    }
    for (column, solution) in SAMPLE_COLUMNS {
        if samples.find_column_ci(column).is_some() {
            continue;
        }
        if column == "sample" && samples.index_name() == "sample" {
            continue;
        }
        if column == "project" || column == "condition" {
            warn!("Critical issue: No {} column in sample_table.", column);
        }
        issues.push(TableIssue::new("Sample", column, solution));
    }

    let imodulons = model.imodulon_table();
    for (column, solution) in IMODULON_COLUMNS {
        if imodulons.find_column_ci(column).is_none() {
            issues.push(TableIssue::new("iModulon", column, solution));
        }
    }

    let missing_gene_links = model
        .gene_names()
        .iter()
        .filter(|g| {
            model
                .gene_links()
                .get(*g)
                .map_or(true, |link| link.trim().is_empty())
        })
        .cloned()
        .collect();

    let missing_dois = match samples.find_column_ci("doi") {
        Some(doi) => samples
            .index()
            .iter()
            .filter(|s| samples.get(s, doi).map_or(true, Value::is_missing))
            .cloned()
            .collect(),
        None => samples.index().to_vec(),
    };

    CompatibilityReport {
        table_issues: issues,
        tf_issues: tf_issues(model, tfcomplex_to_gene),
        missing_gene_links,
        missing_dois,
    }
}

fn tf_issues(model: &IcaData, tfcomplex_to_gene: &HashMap<String, String>) -> Vec<TfIssue> {
    let table = model.imodulon_table();
    let Some(column) = table.find_column_ci("regulator") else {
        return Vec::new();
    };

    let mut issues: Vec<TfIssue> = Vec::new();
    for k in table.index() {
        let Some(tf_str) = table.get_str(k, column) else {
            continue;
        };
        let (_, no_trn) = parse_tf_string(model, &tf_str);
        let (_, no_link) = tf_with_links(model, &tf_str);
        let (_, no_gene) = get_tfs_to_scatter(model, &tf_str, tfcomplex_to_gene);

        for tf in no_trn.iter().chain(&no_link).chain(&no_gene) {
            if issues.iter().any(|i| &i.regulator == tf) {
                continue;
            }
            issues.push(TfIssue {
                regulator: tf.clone(),
                in_trn: !no_trn.contains(tf),
                has_link: !no_link.contains(tf),
                has_gene: !no_gene.contains(tf),
            });
        }
    }
    issues
}

/// Rename columns that differ from `expected` only by case.
fn normalize_case<'a>(table: &mut AnnotationTable, expected: impl IntoIterator<Item = &'a str>) -> Result<()> {
    for column in expected {
        if let Some(found) = table.find_column_ci(column).map(str::to_string) {
            if found != column {
                table.rename_column(&found, column)?;
            }
        }
    }
    Ok(())
}

/// Set `n_replicates` to the size of each sample's project/condition group.
pub fn generate_n_replicates_column(model: &mut IcaData) -> Result<()> {
    let table = model.sample_table_mut();
    if !(table.has_column("project") && table.has_column("condition")) {
        warn!("Unable to write n_replicates column. Add project & condition columns (required).");
        return Ok(());
    }
    let groups = table.group_by(&["project", "condition"])?;
    table.ensure_column("n_replicates");
    for (_, samples) in groups {
        let n = samples.len();
        for sample in &samples {
            table.set(sample, "n_replicates", n)?;
        }
    }
    Ok(())
}

/// Check the model and apply every fix the export relies on.
///
/// Column names are normalized to lower case, `gene_name`/`gene_product`
/// default to the locus tag, `n_replicates` is regenerated, missing
/// iModulon columns are added (`name`, `n_genes` computed, the rest blank),
/// non-integer iModulon names are replaced by `0..n` and a
/// `regulator_readable` column is written. Returns the report from before
/// the fixes.
pub fn prepare_for_export(
    model: &mut IcaData,
    tfcomplex_to_gene: &HashMap<String, String>,
) -> Result<CompatibilityReport> {
    let report = check_compatibility(model, tfcomplex_to_gene);

    let genes = model.gene_table_mut();
    normalize_case(genes, GENE_COLUMNS.iter().map(|(c, _)| *c))?;
    for column in ["gene_name", "gene_product"] {
        if !genes.has_column(column) {
            for locus in genes.index().to_vec() {
                genes.set(&locus, column, locus.as_str())?;
            }
        }
    }

    normalize_case(model.sample_table_mut(), SAMPLE_COLUMNS.iter().map(|(c, _)| *c))?;
    generate_n_replicates_column(model)?;

    let numbered = integer_names(model);
    let n_genes: Vec<usize> = {
        let binarized = model.m_binarized()?;
        (0..binarized.n_cols())
            .map(|k| binarized.col_values(k).iter().filter(|v| **v > 0.0).count())
            .collect()
    };
    let names = model.imodulon_names().to_vec();
    let table = model.imodulon_table_mut();
    normalize_case(table, IMODULON_COLUMNS.iter().map(|(c, _)| *c))?;
    for (column, _) in IMODULON_COLUMNS {
        if table.has_column(column) {
            continue;
        }
        table.ensure_column(column);
        for (k, name) in names.iter().enumerate() {
            let value = match column {
                "name" if numbered => Value::from(format!("iModulon {}", name)),
                "name" => Value::from(name.as_str()),
                "n_genes" => Value::from(n_genes[k]),
                _ => Value::Missing,
            };
            table.set(name, column, value)?;
        }
    }

    if !numbered {
        let renames: HashMap<String, String> = names
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i.to_string()))
            .collect();
        model.rename_imodulons(&renames)?;
    }

    let table = model.imodulon_table_mut();
    table.ensure_column("regulator_readable");
    for k in table.index().to_vec() {
        let readable = match table.get_str(&k, "regulator") {
            Some(reg) => Value::from(reg.replace('/', " or ").replace('+', " and ")),
            None => Value::Missing,
        };
        table.set(&k, "regulator_readable", readable)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LabeledMatrix, Trn, TrnEdge};
    use crate::imodulondb::ImodulondbMeta;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn create_test_model() -> IcaData {
        let m = LabeledMatrix::from_rows(
            &[vec![0.9, 0.0], vec![0.8, 0.1], vec![0.0, -0.7], vec![0.1, 0.0]],
            ids("b", 4),
            vec!["GlpR".into(), "Crp-1".into()],
        )
        .unwrap();
        let a = LabeledMatrix::from_rows(
            &[vec![1.0, 2.0, 3.0], vec![0.0, 1.0, -1.0]],
            vec!["GlpR".into(), "Crp-1".into()],
            ids("s", 3),
        )
        .unwrap();
        let x = LabeledMatrix::from_rows(&vec![vec![0.0; 3]; 4], ids("b", 4), ids("s", 3)).unwrap();

        let mut samples = AnnotationTable::new(ids("s", 3));
        for (s, project, condition) in [("s0", "p", "ctrl"), ("s1", "p", "ctrl"), ("s2", "p", "heat")] {
            samples.set(s, "Project", project).unwrap();
            samples.set(s, "condition", condition).unwrap();
        }
        samples.set("s0", "DOI", "10.1/x").unwrap();

        let mut imodulons = AnnotationTable::new(vec!["GlpR".into(), "Crp-1".into()]);
        imodulons.set("GlpR", "regulator", "glpR+crp").unwrap();

        IcaData::builder(m, a)
            .x(x)
            .sample_table(samples)
            .imodulon_table(imodulons)
            .trn(Trn::new(vec![TrnEdge::new("glpR", "b0")]))
            .thresholds(vec![0.5, 0.5])
            .gene_links(HashMap::from([("b0".to_string(), "http://g/b0".to_string())]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_check_reports_missing_pieces() {
        let model = create_test_model();
        let report = check_compatibility(&model, &HashMap::new());

        assert!(!report.has_critical_issues());
        let missing: Vec<(&str, &str)> = report
            .table_issues
            .iter()
            .map(|i| (i.table.as_str(), i.missing_column.as_str()))
            .collect();
        assert!(missing.contains(&("iModulonDB", "organism")));
        assert!(missing.contains(&("Gene", "cog")));
        assert!(missing.contains(&("Sample", "n_replicates")));
        assert!(!missing.contains(&("Sample", "project")));
        assert!(missing.contains(&("iModulon", "function")));
        assert!(!missing.contains(&("iModulon", "regulator")));

        assert_eq!(report.missing_gene_links, vec!["b1", "b2", "b3"]);
        assert_eq!(report.missing_dois, vec!["s1", "s2"]);

        let crp = report.tf_issues.iter().find(|i| i.regulator == "crp").unwrap();
        assert!(!crp.in_trn);
        assert!(!crp.has_link);
        let glpr = report.tf_issues.iter().find(|i| i.regulator == "glpR").unwrap();
        assert!(glpr.in_trn);
    }

    #[test]
    fn test_missing_x_is_critical() {
        let model = create_test_model();
        let stripped = IcaData::builder(model.m().clone(), model.a().clone())
            .thresholds(vec![0.5, 0.5])
            .imodulondb_meta(ImodulondbMeta::default())
            .build()
            .unwrap();
        let report = check_compatibility(&stripped, &HashMap::new());
        assert!(report.has_critical_issues());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_prepare_for_export() {
        let mut model = create_test_model();
        prepare_for_export(&mut model, &HashMap::new()).unwrap();

        assert_eq!(model.imodulon_names(), &["0", "1"]);
        let table = model.imodulon_table();
        assert_eq!(table.get_str("0", "name").unwrap(), "GlpR");
        assert_eq!(table.get_str("1", "name").unwrap(), "Crp-1");
        assert_eq!(table.get_f64("0", "n_genes"), Some(2.0));
        assert_eq!(table.get_f64("1", "n_genes"), Some(1.0));
        assert!(table.get("0", "function").unwrap().is_missing());
        assert_eq!(table.get_str("0", "regulator_readable").unwrap(), "glpR and crp");

        let samples = model.sample_table();
        assert!(samples.has_column("project"));
        assert!(samples.has_column("doi"));
        assert_eq!(samples.get_f64("s0", "n_replicates"), Some(2.0));
        assert_eq!(samples.get_f64("s2", "n_replicates"), Some(1.0));

        assert_eq!(model.gene_table().get_str("b2", "gene_name").unwrap(), "b2");
    }

    #[test]
    fn test_numbered_imodulons_get_default_names() {
        let mut model = create_test_model();
        let renames = HashMap::from([
            ("GlpR".to_string(), "0".to_string()),
            ("Crp-1".to_string(), "1".to_string()),
        ]);
        model.rename_imodulons(&renames).unwrap();
        prepare_for_export(&mut model, &HashMap::new()).unwrap();
        assert_eq!(model.imodulon_table().get_str("1", "name").unwrap(), "iModulon 1");
    }
}
