//! Dataset configuration files.
//!
//! A dataset is described by a YAML file naming the matrix and table files
//! of a model plus its threshold settings. Relative paths resolve against
//! the directory holding the YAML file.

use crate::data::{
    delimited_reader, AnnotationTable, IcaData, LabeledMatrix, ThresholdMethod, Trn,
    DEFAULT_DAGOSTINO_CUTOFF,
};
use crate::error::{ImodError, Result};
use crate::imodulondb::ImodulondbMeta;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

fn default_cutoff() -> f64 {
    DEFAULT_DAGOSTINO_CUTOFF
}

/// Files and settings making up an iModulon dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Gene weights (genes × iModulons).
    #[serde(rename = "M")]
    pub m: PathBuf,
    /// Activities (iModulons × samples).
    #[serde(rename = "A")]
    pub a: PathBuf,
    /// Expression (genes × samples).
    #[serde(default, rename = "X", skip_serializing_if = "Option::is_none")]
    pub x: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene_table: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_table: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imodulon_table: Option<PathBuf>,
    /// Regulatory network edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trn: Option<PathBuf>,
    /// Two-column file of iModulon thresholds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<PathBuf>,
    /// Two-column file of gene links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene_links: Option<PathBuf>,
    /// Two-column file of regulator links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tf_links: Option<PathBuf>,
    #[serde(default = "default_cutoff")]
    pub dagostino_cutoff: f64,
    #[serde(default)]
    pub threshold_method: ThresholdMethod,
    #[serde(default)]
    pub optimize_cutoff: bool,
    #[serde(default)]
    pub imodulondb: ImodulondbMeta,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl DatasetConfig {
    /// Config with only the required matrices.
    pub fn new<P: Into<PathBuf>>(m: P, a: P) -> Self {
        Self {
            name: None,
            m: m.into(),
            a: a.into(),
            x: None,
            gene_table: None,
            sample_table: None,
            imodulon_table: None,
            trn: None,
            thresholds: None,
            gene_links: None,
            tf_links: None,
            dagostino_cutoff: DEFAULT_DAGOSTINO_CUTOFF,
            threshold_method: ThresholdMethod::default(),
            optimize_cutoff: false,
            imodulondb: ImodulondbMeta::default(),
            base_dir: None,
        }
    }

    /// Load from YAML string. Paths resolve against the working directory.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(ImodError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ImodError::from)
    }

    /// Load a YAML file. Paths resolve against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_yaml(&std::fs::read_to_string(path)?)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Set the directory relative paths resolve against.
    pub fn with_base_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Resolve a configured path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Read every configured file and build the model.
    pub fn load(&self) -> Result<IcaData> {
        let m = LabeledMatrix::from_csv(self.resolve(&self.m))?;
        let a = LabeledMatrix::from_csv(self.resolve(&self.a))?;
        info!(
            n_genes = m.n_rows(),
            n_imodulons = m.n_cols(),
            n_samples = a.n_cols(),
            "Loaded M and A"
        );

        let imodulons = m.col_ids().to_vec();
        let mut builder = IcaData::builder(m, a)
            .dagostino_cutoff(self.dagostino_cutoff)
            .threshold_method(self.threshold_method)
            .optimize_cutoff(self.optimize_cutoff)
            .imodulondb_meta(self.imodulondb.clone());

        if let Some(path) = &self.x {
            builder = builder.x(LabeledMatrix::from_csv(self.resolve(path))?);
        }
        if let Some(path) = &self.gene_table {
            builder = builder.gene_table(AnnotationTable::from_csv(self.resolve(path))?);
        }
        if let Some(path) = &self.sample_table {
            builder = builder.sample_table(AnnotationTable::from_csv(self.resolve(path))?);
        }
        if let Some(path) = &self.imodulon_table {
            builder = builder.imodulon_table(AnnotationTable::from_csv(self.resolve(path))?);
        }
        if let Some(path) = &self.trn {
            builder = builder.trn(Trn::from_csv(self.resolve(path))?);
        }
        if let Some(path) = &self.gene_links {
            builder = builder.gene_links(read_pairs(&self.resolve(path))?);
        }
        if let Some(path) = &self.tf_links {
            builder = builder.tf_links(read_pairs(&self.resolve(path))?);
        }

        if let Some(path) = &self.thresholds {
            builder = builder.thresholds(read_thresholds(&self.resolve(path), &imodulons)?);
        }
        builder.build()
    }

    /// Annotated example configuration.
    pub fn example() -> &'static str {
        r#"# iModulon dataset configuration
# Paths are relative to this file.
name: my_dataset
M: M.csv
A: A.csv
X: log_tpm.csv
gene_table: gene_table.csv
sample_table: sample_table.csv
# imodulon_table: imodulon_table.csv
trn: trn.csv
# thresholds: M_thresholds.csv
# gene_links: gene_links.csv
# tf_links: tf_links.csv
dagostino_cutoff: 550
threshold_method: dagostino
optimize_cutoff: false
imodulondb:
  organism: Escherichia coli
  dataset: My dataset
  strain: K-12 MG1655
  organism_folder: e_coli
  dataset_folder: my_dataset
"#
    }
}

impl IcaData {
    /// Load a model from a dataset YAML file.
    pub fn from_config<P: AsRef<Path>>(path: P) -> Result<Self> {
        DatasetConfig::from_file(path)?.load()
    }
}

/// Thresholds in model order from a two-column file.
fn read_thresholds(path: &Path, imodulons: &[String]) -> Result<Vec<f64>> {
    let pairs = read_pairs(path)?;
    imodulons
        .iter()
        .map(|im| {
            let raw = pairs
                .get(im)
                .ok_or_else(|| ImodError::UnknownImodulon(format!("{} has no threshold", im)))?;
            raw.parse::<f64>().map_err(|_| {
                ImodError::InvalidParameter(format!("threshold '{}' of {} is not a number", raw, im))
            })
        })
        .collect()
}

/// Read a two-column file (key, value) with a header row.
pub fn read_pairs(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = delimited_reader(path)?;
    let mut pairs = HashMap::new();
    for record in reader.records() {
        let record = record?;
        match (record.get(0), record.get(1)) {
            (Some(key), Some(value)) if !key.trim().is_empty() => {
                pairs.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => continue,
        }
    }
    Ok(pairs)
}
