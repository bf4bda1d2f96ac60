//! Synthetic iModulon models with known ground truth.
//!
//! Planted iModulons are contiguous blocks of genes with large weights on a
//! small Gaussian background. Each block has a regulator in the generated
//! TRN that targets the block plus a few decoy genes, so thresholding,
//! enrichment and cutoff optimization can be checked against known answers.

use crate::config::DatasetConfig;
use crate::data::{AnnotationTable, IcaData, LabeledMatrix, Trn, TrnEdge};
use crate::error::{ImodError, Result};
use crate::imodulondb::ImodulondbMeta;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const COG_CATEGORIES: [&str; 4] = [
    "Energy production and conversion",
    "Transcription",
    "Amino acid transport and metabolism",
    "No COG annotation",
];

/// Configuration for synthetic model generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Name of the dataset.
    pub name: String,
    /// Number of genes.
    pub n_genes: usize,
    /// Number of planted iModulons.
    pub n_imodulons: usize,
    /// Genes per planted iModulon.
    pub genes_per_imodulon: usize,
    /// Number of projects.
    pub n_projects: usize,
    /// Conditions per project.
    pub conditions_per_project: usize,
    /// Replicates per condition.
    pub replicates: usize,
    /// Standard deviation of background gene weights.
    pub background_sd: f64,
    /// Mean weight of iModulon genes.
    pub imodulon_weight: f64,
    /// Standard deviation of condition activities.
    pub activity_sd: f64,
    /// Standard deviation of expression noise.
    pub noise_sd: f64,
    /// TRN targets per regulator outside its iModulon.
    pub decoy_targets: usize,
    /// D'Agostino cutoff of the generated model.
    pub dagostino_cutoff: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            n_genes: 300,
            n_imodulons: 5,
            genes_per_imodulon: 12,
            n_projects: 2,
            conditions_per_project: 3,
            replicates: 2,
            background_sd: 0.01,
            imodulon_weight: 0.3,
            activity_sd: 5.0,
            noise_sd: 0.1,
            decoy_targets: 3,
            dagostino_cutoff: 50.0,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    /// Create a new config with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Set model dimensions.
    pub fn with_dimensions(mut self, n_genes: usize, n_imodulons: usize, genes_per_imodulon: usize) -> Self {
        self.n_genes = n_genes;
        self.n_imodulons = n_imodulons;
        self.genes_per_imodulon = genes_per_imodulon;
        self
    }

    /// Set the sample layout.
    pub fn with_samples(mut self, n_projects: usize, conditions_per_project: usize, replicates: usize) -> Self {
        self.n_projects = n_projects;
        self.conditions_per_project = conditions_per_project;
        self.replicates = replicates;
        self
    }

    /// Set noise levels.
    pub fn with_noise(mut self, background_sd: f64, noise_sd: f64) -> Self {
        self.background_sd = background_sd;
        self.noise_sd = noise_sd;
        self
    }

    pub fn with_decoys(mut self, decoy_targets: usize) -> Self {
        self.decoy_targets = decoy_targets;
        self
    }

    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.dagostino_cutoff = cutoff;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        let planted = self.n_imodulons * self.genes_per_imodulon;
        let needed = planted + self.n_imodulons + self.decoy_targets;
        if self.n_imodulons == 0 || self.genes_per_imodulon == 0 {
            return Err(ImodError::InvalidParameter(
                "at least one iModulon with one gene is required".to_string(),
            ));
        }
        if self.n_genes < needed {
            return Err(ImodError::InvalidParameter(format!(
                "{} genes cannot hold {} planted genes, {} regulator genes and {} decoys",
                self.n_genes, planted, self.n_imodulons, self.decoy_targets
            )));
        }
        if self.n_projects == 0 || self.conditions_per_project == 0 || self.replicates == 0 {
            return Err(ImodError::InvalidParameter(
                "projects, conditions and replicates must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Planted structure of a synthetic model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruth {
    /// Member genes of each iModulon.
    pub members: HashMap<String, Vec<String>>,
    /// Regulator of each iModulon.
    pub regulators: HashMap<String, String>,
    /// Reference (control) samples with activities near zero.
    pub reference_samples: Vec<String>,
}

impl GroundTruth {
    /// Planted member genes of an iModulon, in gene order.
    pub fn genes_of(&self, imodulon: &str) -> &[String] {
        self.members.get(imodulon).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Planted regulator of an iModulon.
    pub fn regulator_of(&self, imodulon: &str) -> Option<&str> {
        self.regulators.get(imodulon).map(String::as_str)
    }

    /// As CSV lines: `imodulon,regulator,gene_id`.
    pub fn to_csv(&self) -> String {
        let mut imodulons: Vec<&String> = self.members.keys().collect();
        imodulons.sort();
        let mut lines = vec!["imodulon,regulator,gene_id".to_string()];
        for im in imodulons {
            let reg = self.regulator_of(im).unwrap_or("");
            for gene in self.genes_of(im) {
                lines.push(format!("{},{},{}", im, reg, gene));
            }
        }
        lines.join("\n")
    }
}

/// Result of synthetic model generation.
#[derive(Debug, Clone)]
pub struct SyntheticModel {
    /// Generated model.
    pub model: IcaData,
    /// Ground truth.
    pub ground_truth: GroundTruth,
    /// Configuration used.
    pub config: SyntheticConfig,
}

impl SyntheticModel {
    /// Write the model as a dataset directory loadable with
    /// [`DatasetConfig::from_file`].
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        self.model.m().to_csv(dir.join("M.csv"))?;
        self.model.a().to_csv(dir.join("A.csv"))?;
        if let Some(x) = self.model.x() {
            x.to_csv(dir.join("log_tpm.csv"))?;
        }
        self.model.gene_table().to_csv(dir.join("gene_table.csv"))?;
        self.model.sample_table().to_csv(dir.join("sample_table.csv"))?;
        self.model.trn().to_csv(dir.join("trn.csv"))?;
        std::fs::write(dir.join("ground_truth.csv"), self.ground_truth.to_csv())?;
        std::fs::write(dir.join("synthetic.yaml"), serde_yaml::to_string(&self.config)?)?;

        let mut dataset = DatasetConfig::new("M.csv", "A.csv");
        dataset.name = Some(self.config.name.clone());
        dataset.x = Some("log_tpm.csv".into());
        dataset.gene_table = Some("gene_table.csv".into());
        dataset.sample_table = Some("sample_table.csv".into());
        dataset.trn = Some("trn.csv".into());
        dataset.dagostino_cutoff = self.config.dagostino_cutoff;
        dataset.imodulondb = self.model.imodulondb_meta().clone();
        std::fs::write(dir.join("dataset.yaml"), dataset.to_yaml()?)?;
        Ok(())
    }
}

/// Simple deterministic RNG (xorshift64).
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() as f64) / (u64::MAX as f64)
    }

    /// Box-Muller normal draw.
    fn next_normal(&mut self, mean: f64, sd: f64) -> f64 {
        let u1 = self.next_f64().max(1e-10);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + sd * z
    }

    fn next_index(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Generate a synthetic model.
pub fn generate_synthetic(config: &SyntheticConfig) -> Result<SyntheticModel> {
    config.validate()?;
    let mut rng = Rng::new(config.seed);

    let n_genes = config.n_genes;
    let n_ims = config.n_imodulons;
    let block = config.genes_per_imodulon;

    let genes: Vec<String> = (0..n_genes).map(|i| format!("b{:04}", i)).collect();
    let imodulons: Vec<String> = (0..n_ims).map(|k| k.to_string()).collect();

    // Weights
    let mut m = DMatrix::from_fn(n_genes, n_ims, |_, _| 0.0);
    for k in 0..n_ims {
        for g in 0..n_genes {
            m[(g, k)] = if g / block == k && g < n_ims * block {
                config.imodulon_weight + rng.next_normal(0.0, config.imodulon_weight * 0.1).abs()
            } else {
                rng.next_normal(0.0, config.background_sd)
            };
        }
    }

    // Samples and activities
    let mut samples = Vec::new();
    let mut sample_table_rows = Vec::new();
    let mut reference_samples = Vec::new();
    let mut a_columns: Vec<Vec<f64>> = Vec::new();
    for p in 0..config.n_projects {
        let project = format!("project{}", p);
        for c in 0..config.conditions_per_project {
            let is_reference = p == 0 && c == 0;
            let condition = if is_reference {
                "control".to_string()
            } else {
                format!("cond{}", c)
            };
            let means: Vec<f64> = (0..n_ims)
                .map(|_| {
                    if is_reference {
                        0.0
                    } else {
                        rng.next_normal(0.0, config.activity_sd)
                    }
                })
                .collect();
            for r in 0..config.replicates {
                let sample = format!("{}__{}__{}", project, condition, r + 1);
                let spread = config.activity_sd * 0.05;
                a_columns.push(means.iter().map(|mu| rng.next_normal(*mu, spread)).collect());
                if is_reference {
                    reference_samples.push(sample.clone());
                }
                sample_table_rows.push((sample.clone(), project.clone(), condition.clone()));
                samples.push(sample);
            }
        }
    }
    let a = DMatrix::from_fn(n_ims, samples.len(), |k, s| a_columns[s][k]);
    let noise = DMatrix::from_fn(n_genes, samples.len(), |_, _| rng.next_normal(0.0, config.noise_sd));
    let x = &m * &a + noise;

    // Annotation
    let mut gene_table = AnnotationTable::new(genes.clone());
    gene_table.set_index_name("locus_tag");
    let regulator_gene = |k: usize| n_ims * block + k;
    for (i, gene) in genes.iter().enumerate() {
        let name = match (0..n_ims).find(|&k| regulator_gene(k) == i) {
            Some(k) => format!("reg{}", k),
            None => format!("syn{}", i),
        };
        gene_table.set(gene, "gene_name", name)?;
        gene_table.set(gene, "gene_product", format!("synthetic protein {}", i))?;
        gene_table.set(gene, "cog", COG_CATEGORIES[i % COG_CATEGORIES.len()])?;
        gene_table.set(gene, "start", (i * 1000 + 1) as f64)?;
        gene_table.set(gene, "operon", format!("op{}", i / 3))?;
    }

    let mut sample_table = AnnotationTable::new(samples.clone());
    sample_table.set_index_name("sample_id");
    for (sample, project, condition) in &sample_table_rows {
        sample_table.set(sample, "project", project.as_str())?;
        sample_table.set(sample, "condition", condition.as_str())?;
        sample_table.set(sample, "doi", format!("doi:synthetic/{}", project))?;
    }

    // TRN: each regulator targets its block plus decoys outside every block.
    let mut edges = Vec::new();
    let mut members = HashMap::new();
    let mut regulators = HashMap::new();
    let decoy_pool: Vec<usize> = (n_ims * block + n_ims..n_genes).collect();
    for k in 0..n_ims {
        let regulator = format!("reg{}", k);
        let block_genes: Vec<String> = genes[k * block..(k + 1) * block].to_vec();
        for gene in &block_genes {
            edges.push(TrnEdge::new(&regulator, gene));
        }
        let mut decoys: Vec<usize> = Vec::new();
        while decoys.len() < config.decoy_targets {
            let g = decoy_pool[rng.next_index(decoy_pool.len())];
            if !decoys.contains(&g) {
                decoys.push(g);
            }
        }
        for g in decoys {
            edges.push(TrnEdge::new(&regulator, &genes[g]));
        }
        members.insert(imodulons[k].clone(), block_genes);
        regulators.insert(imodulons[k].clone(), regulator);
    }

    let model = IcaData::builder(
        LabeledMatrix::new(m, genes.clone(), imodulons.clone())?,
        LabeledMatrix::new(a, imodulons, samples.clone())?,
    )
    .x(LabeledMatrix::new(x, genes, samples)?)
    .gene_table(gene_table)
    .sample_table(sample_table)
    .trn(Trn::new(edges))
    .dagostino_cutoff(config.dagostino_cutoff)
    .imodulondb_meta(ImodulondbMeta {
        organism: "Synthetic organism".to_string(),
        dataset: config.name.clone(),
        organism_folder: "synthetic".to_string(),
        dataset_folder: config.name.clone(),
        ..Default::default()
    })
    .build()?;

    Ok(SyntheticModel {
        model,
        ground_truth: GroundTruth {
            members,
            regulators,
            reference_samples,
        },
        config: config.clone(),
    })
}
