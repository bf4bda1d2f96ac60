//! Writes a model to the iModulonDB site layout.
//!
//! ```text
//! <path>/organisms/<organism>/
//!     annotation/gene_files/{gene_info.csv, trn.csv}
//!     <dataset>/
//!         dataset_meta.csv, num_ims.txt, html_for_splash.html
//!         data_files/*.csv
//!         iModulon_files/im_list.json, <k>/<k>_*.csv
//!         gene_page_files/gene_list.json, <gene>/<gene>_*.csv
//! ```

use super::compat::prepare_for_export;
use super::tables::{
    activity_bar_df, dataset_table, gene_activity_bar_df, gene_basics, gene_hist_df,
    gene_imodulon_table_df, gene_presence, gene_scatter_df, gene_table_df, imodulon_basics,
    imodulon_table_df, regulon_scatter_df, regulon_venn_df, series, DEFAULT_HIST_BINS,
    DEFAULT_HIST_TOL,
};
use crate::data::{IcaData, Value};
use crate::error::{ImodError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options of [`export`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Categories in the order the dataset page lists them.
    pub cat_order: Option<Vec<String>>,
    /// Regulator complexes mapped to the gene whose expression represents
    /// them, e.g. `FlhDC -> flhD`.
    pub tfcomplex_to_gene: HashMap<String, String>,
    pub skip_imodulons: bool,
    pub skip_genes: bool,
    /// Rewrite the organism annotation files even if they exist.
    pub rewrite_annotations: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            cat_order: None,
            tfcomplex_to_gene: HashMap::new(),
            skip_imodulons: false,
            skip_genes: false,
            rewrite_annotations: true,
        }
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cat_order(mut self, order: Vec<String>) -> Self {
        self.cat_order = Some(order);
        self
    }

    pub fn with_tfcomplex_to_gene(mut self, map: HashMap<String, String>) -> Self {
        self.tfcomplex_to_gene = map;
        self
    }

    pub fn with_skip_imodulons(mut self, skip: bool) -> Self {
        self.skip_imodulons = skip;
        self
    }

    pub fn with_skip_genes(mut self, skip: bool) -> Self {
        self.skip_genes = skip;
        self
    }

    pub fn with_rewrite_annotations(mut self, rewrite: bool) -> Self {
        self.rewrite_annotations = rewrite;
        self
    }
}

/// Export a model for iModulonDB and return the dataset folder.
///
/// The model is copied and prepared with
/// [`prepare_for_export`](super::prepare_for_export) first; the caller's
/// model is not changed. Requires X.
pub fn export(model: &IcaData, path: &Path, opts: &ExportOptions) -> Result<PathBuf> {
    if model.x().is_none() {
        return Err(ImodError::InvalidParameter(
            "export requires the X matrix for gene pages".to_string(),
        ));
    }
    let mut model = model.clone();
    let report = prepare_for_export(&mut model, &opts.tfcomplex_to_gene)?;
    debug!(
        n_table_issues = report.table_issues.len(),
        n_tf_issues = report.tf_issues.len(),
        "Prepared model for export"
    );

    info!("Writing main site files");
    let folder = write_main_site_files(&model, path, opts)?;

    if !opts.skip_imodulons {
        info!(n_imodulons = model.n_imodulons(), "Writing iModulon page files");
        let im_folder = folder.join("iModulon_files");
        model
            .imodulon_names()
            .par_iter()
            .map(|k| write_imodulon_files(&model, k, &im_folder, opts))
            .collect::<Result<Vec<_>>>()?;
    }

    if !opts.skip_genes {
        info!(n_genes = model.n_genes(), "Writing gene page files");
        let gene_folder = folder.join("gene_page_files");
        model
            .gene_names()
            .par_iter()
            .map(|g| write_gene_files(&model, g, &gene_folder))
            .collect::<Result<Vec<_>>>()?;
    }

    let meta = model.imodulondb_meta();
    info!(
        organism = %meta.organism_folder,
        dataset = %meta.dataset_folder,
        "Export complete"
    );
    Ok(folder)
}

/// Dataset-level files: annotation, metadata, data files, search lists and
/// the splash page snippet.
fn write_main_site_files(model: &IcaData, path: &Path, opts: &ExportOptions) -> Result<PathBuf> {
    let meta = model.imodulondb_meta();
    let organism_folder = path.join("organisms").join(&meta.organism_folder);
    let annotation = organism_folder.join("annotation");
    let rewrite = opts.rewrite_annotations || !annotation.is_dir();
    if rewrite {
        let gene_files = annotation.join("gene_files");
        fs::create_dir_all(&gene_files)?;
        model.gene_table().to_csv(gene_files.join("gene_info.csv"))?;
        model.trn().to_csv(gene_files.join("trn.csv"))?;
    }

    let folder = organism_folder.join(&meta.dataset_folder);
    let data_files = folder.join("data_files");
    fs::create_dir_all(&data_files)?;

    dataset_table(model)?.to_csv(folder.join("dataset_meta.csv"))?;
    fs::write(folder.join("num_ims.txt"), model.n_imodulons().to_string())?;

    if let Some(x) = model.x() {
        x.to_csv(data_files.join("log_tpm.csv"))?;
    }
    model.a().to_csv(data_files.join("A.csv"))?;
    model.m().to_csv(data_files.join("M.csv"))?;
    imodulon_table_df(model, opts.cat_order.as_deref())?.to_csv(data_files.join("iM_table.csv"))?;
    model.sample_table().to_csv(data_files.join("sample_table.csv"))?;
    let (matrix, list) = gene_presence(model)?;
    matrix.to_csv(data_files.join("gene_presence_matrix.csv"))?;
    list.to_csv(data_files.join("gene_presence_list.csv"))?;
    let thresholds = model
        .imodulon_names()
        .iter()
        .zip(model.thresholds())
        .map(|(k, t)| (k.clone(), Value::from(*t)))
        .collect();
    series("0", thresholds)?.to_csv(data_files.join("M_thresholds.csv"))?;

    let im_folder = folder.join("iModulon_files");
    fs::create_dir_all(&im_folder)?;
    fs::write(im_folder.join("im_list.json"), serde_json::to_string(&imodulon_list(model))?)?;

    let gene_folder = folder.join("gene_page_files");
    fs::create_dir_all(&gene_folder)?;
    fs::write(gene_folder.join("gene_list.json"), serde_json::to_string(&gene_search_list(model))?)?;

    fs::write(folder.join("html_for_splash.html"), splash_html(model))?;
    Ok(folder)
}

fn json_value(value: Option<&Value>, fill: &str) -> serde_json::Value {
    match value {
        Some(Value::Number(v)) => json!(v),
        Some(Value::Text(s)) => json!(s),
        _ => json!(fill),
    }
}

/// Searchable iModulon records sorted by name.
fn imodulon_list(model: &IcaData) -> Vec<serde_json::Value> {
    let table = model.imodulon_table();
    let mut records: Vec<(String, serde_json::Value)> = model
        .imodulon_names()
        .iter()
        .map(|k| {
            let component = match k.parse::<i64>() {
                Ok(n) => json!(n),
                Err(_) => json!(k),
            };
            let name = table.get_str(k, "name").unwrap_or_else(|| "N/A".to_string());
            let record = json!({
                "component": component,
                "name": name,
                "regulator": json_value(table.get(k, "regulator"), "N/A"),
                "Function": json_value(table.get(k, "function"), "N/A"),
            });
            (name, record)
        })
        .collect();
    records.sort_by(|a, b| a.0.cmp(&b.0));
    records.into_iter().map(|(_, r)| r).collect()
}

/// Searchable gene records sorted by gene name.
fn gene_search_list(model: &IcaData) -> Vec<serde_json::Value> {
    let table = model.gene_table();
    let mut records: Vec<(String, serde_json::Value)> = model
        .gene_names()
        .iter()
        .map(|g| {
            let name = table.get_str(g, "gene_name").unwrap_or_else(|| "not available".to_string());
            let record = json!({
                "gene_name": name,
                "gene_id": g,
                "gene_product": json_value(table.get(g, "gene_product"), "not available"),
            });
            (name, record)
        })
        .collect();
    records.sort_by(|a, b| a.0.cmp(&b.0));
    records.into_iter().map(|(_, r)| r).collect()
}

/// Accordion entry linking the dataset from the site's splash page.
fn splash_html(model: &IcaData) -> String {
    let meta = model.imodulondb_meta();
    format!(
        concat!(
            "<div class=\"panel\">\n",
            "  <div class=\"panel-header\">\n",
            "    <h2 class=\"mb-0\">\n",
            "      <button class=\"btn btn-link collapsed organism\" type=\"button\"",
            " data-toggle=\"collapse\" data-target=\"#new_org\" aria-expanded=\"false\"",
            " aria-controls=\"new_org\">\n        <i>{organism}</i>\n",
            "      </button>\n    </h2>\n  </div>\n",
            "  <div id=\"new_org\" class=\"collapse\" aria-labelledby=\"headingThree\"",
            " data-parent=\"#organismAccordion\">\n",
            "    <div class=\"panel-body\">\n",
            "      <ul class=\"nav navbar-dark flex-column\">\n",
            "          <li class=\"nav-item dataset\">\n",
            "              <a class=\"nav-link active\" href=\"dataset.html?organism={org_folder}",
            "&dataset={data_folder}\"><i class=\"fas fa-angle-right pr-2\"></i>{dataset}\n",
            "              </a>\n          </li>\n",
            "      </ul>\n    </div>\n  </div>\n</div>",
        ),
        organism = meta.organism,
        org_folder = meta.organism_folder,
        data_folder = meta.dataset_folder,
        dataset = meta.dataset,
    )
}

/// Activities keyed by the `sample` column when present.
fn sample_labels(model: &IcaData) -> Vec<String> {
    let samples = model.sample_table();
    model
        .sample_names()
        .iter()
        .map(|s| samples.get_str(s, "sample").unwrap_or_else(|| s.clone()))
        .collect()
}

fn write_imodulon_files(model: &IcaData, k: &str, im_folder: &Path, opts: &ExportOptions) -> Result<()> {
    let gene_table = gene_table_df(model, k)?;
    let gene_hist = gene_hist_df(model, k, DEFAULT_HIST_BINS, DEFAULT_HIST_TOL)?;
    let gene_scatter = gene_scatter_df(model, k)?;
    let activity_bar = activity_bar_df(model, k)?;
    let venn = regulon_venn_df(model, k)?;
    let scatter = regulon_scatter_df(model, k, &opts.tfcomplex_to_gene)?;
    let n_scatter = scatter.as_ref().map_or(0, |t| t.n_columns().saturating_sub(1));
    let basics = imodulon_basics(model, k, venn.is_some(), n_scatter)?;

    let folder = im_folder.join(k);
    fs::create_dir_all(&folder)?;
    let file = |suffix: &str| folder.join(format!("{}_{}.csv", k, suffix));
    basics.to_csv(file("meta"))?;
    gene_table.to_csv(file("gene_table"))?;
    gene_hist.to_csv(file("gene_hist"))?;
    gene_scatter.to_csv(file("gene_scatter"))?;
    activity_bar.to_csv(file("activity_bar"))?;
    if let Some(venn) = venn {
        venn.to_csv(file("reg_venn"))?;
    }
    if let Some(scatter) = scatter {
        scatter.to_csv(file("reg_scatter"))?;
    }

    let index = model.imodulon_index(k)?;
    let weights = model
        .gene_names()
        .iter()
        .zip(model.m().col_values(index))
        .map(|(g, w)| (g.clone(), Value::from(w)))
        .collect();
    series(k, weights)?.to_csv(file("gene_weights"))?;
    let activities = sample_labels(model)
        .into_iter()
        .zip(model.a().row_values(index))
        .map(|(s, a)| (s, Value::from(a)))
        .collect();
    series(k, activities)?.to_csv(file("activity"))?;
    Ok(())
}

fn write_gene_files(model: &IcaData, gene: &str, gene_folder: &Path) -> Result<()> {
    let folder = gene_folder.join(gene);
    fs::create_dir_all(&folder)?;
    let file = |suffix: &str| folder.join(format!("{}_{}.csv", gene, suffix));

    gene_basics(model, gene)?.to_csv(file("meta"))?;
    gene_activity_bar_df(model, gene)?.to_csv(file("activity_bar"))?;
    if let Some(expression) = model.x().and_then(|x| x.row(gene)) {
        let rows = model
            .sample_names()
            .iter()
            .cloned()
            .zip(expression)
            .map(|(s, v)| (s, Value::from(v)))
            .collect();
        series(gene, rows)?.to_csv(file("expression"))?;
    }
    gene_imodulon_table_df(model, gene)?.to_csv(file("perGene_table"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AnnotationTable;
    use crate::synthetic::{generate_synthetic, SyntheticConfig};
    use tempfile::TempDir;

    #[test]
    fn test_export_synthetic_dataset() {
        let tmp = TempDir::new().unwrap();
        let mut data = generate_synthetic(&SyntheticConfig::default()).unwrap();
        data.model
            .compute_trn_enrichment(&Default::default(), true)
            .unwrap();

        let folder = export(&data.model, tmp.path(), &ExportOptions::default()).unwrap();
        assert_eq!(folder, tmp.path().join("organisms/synthetic/synthetic"));
        assert!(tmp
            .path()
            .join("organisms/synthetic/annotation/gene_files/gene_info.csv")
            .is_file());
        assert_eq!(fs::read_to_string(folder.join("num_ims.txt")).unwrap(), "5");
        for file in ["log_tpm", "A", "M", "iM_table", "sample_table", "M_thresholds"] {
            assert!(folder.join("data_files").join(format!("{}.csv", file)).is_file());
        }

        let im_list: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(folder.join("iModulon_files/im_list.json")).unwrap())
                .unwrap();
        assert_eq!(im_list.len(), 5);
        assert!(im_list[0].get("Function").is_some());

        let meta = AnnotationTable::from_csv(folder.join("iModulon_files/0/0_meta.csv")).unwrap();
        assert_eq!(meta.get_str("TF", "0").unwrap(), "reg0");
        assert!(folder.join("iModulon_files/0/0_reg_venn.csv").is_file());
        assert!(folder.join("iModulon_files/0/0_activity_bar.csv").is_file());

        let gene = &data.model.gene_names()[0];
        assert!(folder
            .join("gene_page_files")
            .join(gene)
            .join(format!("{}_perGene_table.csv", gene))
            .is_file());

        // The caller's model keeps its own tables.
        assert!(!data.model.imodulon_table().has_column("regulator_readable"));
    }

    #[test]
    fn test_export_requires_x() {
        let tmp = TempDir::new().unwrap();
        let data = generate_synthetic(&SyntheticConfig::default()).unwrap();
        let model = IcaData::builder(data.model.m().clone(), data.model.a().clone())
            .thresholds(data.model.thresholds().to_vec())
            .build()
            .unwrap();
        assert!(export(&model, tmp.path(), &ExportOptions::default()).is_err());
    }

    #[test]
    fn test_skip_pages() {
        let tmp = TempDir::new().unwrap();
        let data = generate_synthetic(&SyntheticConfig::default()).unwrap();
        let opts = ExportOptions::new().with_skip_imodulons(true).with_skip_genes(true);
        let folder = export(&data.model, tmp.path(), &opts).unwrap();
        assert!(folder.join("html_for_splash.html").is_file());
        assert!(!folder.join("iModulon_files/0").exists());
        assert!(!folder.join("gene_page_files").join(&data.model.gene_names()[0]).exists());
    }
}
