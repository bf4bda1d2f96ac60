//! The iModulon model container.
//!
//! `IcaData` bundles the gene weights (M, gene × iModulon), the iModulon
//! activities (A, iModulon × sample), the optional expression matrix
//! (X, gene × sample) and the gene, sample and iModulon annotation tables.
//! Labels are shared across all of them and checked once on construction,
//! so every accessor can index by position afterwards.

use super::{AnnotationTable, LabeledMatrix, Trn, Value};
use crate::enrichment::{self, EnrichmentResult, TrnEnrichmentOptions};
use crate::error::{ImodError, Result};
use crate::imodulondb::ImodulondbMeta;
use crate::stats::{compute_threshold, kmeans_threshold};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Default D'Agostino K² cutoff.
pub const DEFAULT_DAGOSTINO_CUTOFF: f64 = 550.0;

/// Genes per iModulon used to find its best regulator during optimization.
const OPTIMIZE_TOP_GENES: usize = 20;

/// FDR used when choosing regulators during optimization.
const OPTIMIZE_FDR: f64 = 1e-5;

/// How iModulon thresholds are derived from gene weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    /// Iterative D'Agostino K² test.
    #[default]
    Dagostino,
    /// Three-cluster k-means on absolute weights.
    KMeans,
}

impl FromStr for ThresholdMethod {
    type Err = ImodError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dagostino" => Ok(ThresholdMethod::Dagostino),
            "kmeans" => Ok(ThresholdMethod::KMeans),
            other => Err(ImodError::InvalidParameter(format!(
                "unknown threshold method '{}'; expected dagostino or kmeans",
                other
            ))),
        }
    }
}

/// One gene of an iModulon with its weight and gene-table annotation.
#[derive(Debug, Clone, Serialize)]
pub struct ImodulonGene {
    pub gene_id: String,
    pub gene_weight: f64,
    /// Values of the gene table columns, in `ImodulonView::columns` order.
    pub annotation: Vec<Value>,
}

/// Member genes of an iModulon, sorted by weight (largest first).
#[derive(Debug, Clone, Serialize)]
pub struct ImodulonView {
    pub imodulon: String,
    pub threshold: f64,
    pub columns: Vec<String>,
    pub genes: Vec<ImodulonGene>,
}

impl ImodulonView {
    /// Number of member genes.
    #[inline]
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// Whether the iModulon has no genes above threshold.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Member gene ids in view order.
    pub fn gene_ids(&self) -> Vec<&str> {
        self.genes.iter().map(|g| g.gene_id.as_str()).collect()
    }

    /// Annotation value of a member gene.
    pub fn get(&self, gene_id: &str, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.genes
            .iter()
            .find(|g| g.gene_id == gene_id)
            .and_then(|g| g.annotation.get(col))
    }

    /// As a table indexed by gene with `gene_weight` as the first column.
    pub fn to_table(&self) -> Result<AnnotationTable> {
        let index: Vec<String> = self.genes.iter().map(|g| g.gene_id.clone()).collect();
        let mut table = AnnotationTable::new(index);
        table.ensure_column("gene_weight");
        for column in &self.columns {
            table.ensure_column(column);
        }
        for gene in &self.genes {
            table.set(&gene.gene_id, "gene_weight", gene.gene_weight)?;
            for (column, value) in self.columns.iter().zip(&gene.annotation) {
                table.set(&gene.gene_id, column, value.clone())?;
            }
        }
        Ok(table)
    }
}

/// Outcome of the D'Agostino cutoff search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoffOptimization {
    /// Cutoff with the highest mean F1 score.
    pub best_cutoff: f64,
    /// Cutoffs tried.
    pub cutoffs: Vec<f64>,
    /// Mean F1 score of the seed regulators at each cutoff.
    pub mean_f1: Vec<f64>,
    /// `(iModulon, regulator)` pairs scored at each cutoff.
    pub seed_regulators: Vec<(String, String)>,
}

/// Independent component analysis model of a transcriptome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcaData {
    m: LabeledMatrix,
    a: LabeledMatrix,
    x: Option<LabeledMatrix>,
    gene_table: AnnotationTable,
    sample_table: AnnotationTable,
    imodulon_table: AnnotationTable,
    trn: Trn,
    thresholds: Vec<f64>,
    dagostino_cutoff: f64,
    threshold_method: ThresholdMethod,
    cutoff_optimized: bool,
    gene_links: HashMap<String, String>,
    tf_links: HashMap<String, String>,
    imodulondb_meta: ImodulondbMeta,
}

/// Builder for [`IcaData`]; M and A are required.
#[derive(Debug, Clone)]
pub struct IcaDataBuilder {
    m: LabeledMatrix,
    a: LabeledMatrix,
    x: Option<LabeledMatrix>,
    gene_table: Option<AnnotationTable>,
    sample_table: Option<AnnotationTable>,
    imodulon_table: Option<AnnotationTable>,
    trn: Option<Trn>,
    thresholds: Option<Vec<f64>>,
    dagostino_cutoff: f64,
    threshold_method: ThresholdMethod,
    optimize_cutoff: bool,
    gene_links: HashMap<String, String>,
    tf_links: HashMap<String, String>,
    imodulondb_meta: ImodulondbMeta,
}

impl IcaDataBuilder {
    /// Start from gene weights and activities.
    pub fn new(m: LabeledMatrix, a: LabeledMatrix) -> Self {
        Self {
            m,
            a,
            x: None,
            gene_table: None,
            sample_table: None,
            imodulon_table: None,
            trn: None,
            thresholds: None,
            dagostino_cutoff: DEFAULT_DAGOSTINO_CUTOFF,
            threshold_method: ThresholdMethod::Dagostino,
            optimize_cutoff: false,
            gene_links: HashMap::new(),
            tf_links: HashMap::new(),
            imodulondb_meta: ImodulondbMeta::default(),
        }
    }

    pub fn x(mut self, x: LabeledMatrix) -> Self {
        self.x = Some(x);
        self
    }

    pub fn gene_table(mut self, table: AnnotationTable) -> Self {
        self.gene_table = Some(table);
        self
    }

    pub fn sample_table(mut self, table: AnnotationTable) -> Self {
        self.sample_table = Some(table);
        self
    }

    pub fn imodulon_table(mut self, table: AnnotationTable) -> Self {
        self.imodulon_table = Some(table);
        self
    }

    pub fn trn(mut self, trn: Trn) -> Self {
        self.trn = Some(trn);
        self
    }

    /// Explicit thresholds, one per iModulon. These take precedence over
    /// computed or optimized thresholds.
    pub fn thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn dagostino_cutoff(mut self, cutoff: f64) -> Self {
        self.dagostino_cutoff = cutoff;
        self
    }

    pub fn threshold_method(mut self, method: ThresholdMethod) -> Self {
        self.threshold_method = method;
        self
    }

    /// Optimize the D'Agostino cutoff against the TRN on construction.
    pub fn optimize_cutoff(mut self, optimize: bool) -> Self {
        self.optimize_cutoff = optimize;
        self
    }

    pub fn gene_links(mut self, links: HashMap<String, String>) -> Self {
        self.gene_links = links;
        self
    }

    pub fn tf_links(mut self, links: HashMap<String, String>) -> Self {
        self.tf_links = links;
        self
    }

    pub fn imodulondb_meta(mut self, meta: ImodulondbMeta) -> Self {
        self.imodulondb_meta = meta;
        self
    }

    /// Validate labels, align tables and initialise thresholds.
    pub fn build(self) -> Result<IcaData> {
        let IcaDataBuilder {
            m,
            a,
            x,
            gene_table,
            sample_table,
            imodulon_table,
            trn,
            thresholds,
            dagostino_cutoff,
            threshold_method,
            optimize_cutoff,
            gene_links,
            tf_links,
            imodulondb_meta,
        } = self;

        if m.n_rows() == 0 || m.n_cols() == 0 {
            return Err(ImodError::EmptyData("M matrix has no genes or no iModulons".to_string()));
        }
        if a.n_cols() == 0 {
            return Err(ImodError::EmptyData("A matrix has no samples".to_string()));
        }
        if m.col_ids() != a.row_ids() {
            return Err(ImodError::LabelMismatch(
                "M columns and A rows must name the same iModulons in the same order".to_string(),
            ));
        }
        if let Some(x) = &x {
            if x.row_ids() != m.row_ids() {
                return Err(ImodError::LabelMismatch(
                    "X rows and M rows must name the same genes in the same order".to_string(),
                ));
            }
            if x.col_ids() != a.col_ids() {
                return Err(ImodError::LabelMismatch(
                    "X columns and A columns must name the same samples in the same order"
                        .to_string(),
                ));
            }
        }
        validate_cutoff(dagostino_cutoff)?;

        let genes = m.row_ids().to_vec();
        let samples = a.col_ids().to_vec();
        let imodulons = m.col_ids().to_vec();
        let align = |table: Option<AnnotationTable>, index: &[String], name: &str| match table {
            Some(t) => t.align_to(index, name),
            None => AnnotationTable::new(index.to_vec()),
        };

        let mut model = IcaData {
            gene_table: align(gene_table, &genes, "gene"),
            sample_table: align(sample_table, &samples, "sample"),
            imodulon_table: align(imodulon_table, &imodulons, "iModulon"),
            m,
            a,
            x,
            trn: Trn::default(),
            thresholds: Vec::new(),
            dagostino_cutoff,
            threshold_method,
            cutoff_optimized: false,
            gene_links: HashMap::new(),
            tf_links,
            imodulondb_meta,
        };
        model.set_gene_links(gene_links);
        model.apply_trn(trn.unwrap_or_default())?;

        match thresholds {
            Some(t) => model.set_thresholds(t)?,
            None if optimize_cutoff && !model.trn.is_empty() => model.reoptimize_thresholds()?,
            None => model.recompute_thresholds(dagostino_cutoff)?,
        }
        Ok(model)
    }
}

fn validate_cutoff(cutoff: f64) -> Result<()> {
    if !(cutoff.is_finite() && cutoff > 0.0) {
        return Err(ImodError::InvalidParameter(format!(
            "D'Agostino cutoff must be positive, got {}",
            cutoff
        )));
    }
    Ok(())
}

/// Thresholds for every column of M.
fn component_thresholds(
    m: &LabeledMatrix,
    method: ThresholdMethod,
    cutoff: f64,
) -> Result<Vec<f64>> {
    (0..m.n_cols())
        .into_par_iter()
        .map(|k| {
            let weights = m.col_values(k);
            match method {
                ThresholdMethod::Dagostino => compute_threshold(&weights, cutoff),
                ThresholdMethod::KMeans => kmeans_threshold(&weights),
            }
        })
        .collect()
}

impl IcaData {
    /// Model with default settings from M and A alone.
    pub fn new(m: LabeledMatrix, a: LabeledMatrix) -> Result<Self> {
        IcaDataBuilder::new(m, a).build()
    }

    /// Start a builder.
    pub fn builder(m: LabeledMatrix, a: LabeledMatrix) -> IcaDataBuilder {
        IcaDataBuilder::new(m, a)
    }

    // Accessors

    #[inline]
    pub fn m(&self) -> &LabeledMatrix {
        &self.m
    }

    #[inline]
    pub fn a(&self) -> &LabeledMatrix {
        &self.a
    }

    #[inline]
    pub fn x(&self) -> Option<&LabeledMatrix> {
        self.x.as_ref()
    }

    #[inline]
    pub fn gene_names(&self) -> &[String] {
        self.m.row_ids()
    }

    #[inline]
    pub fn sample_names(&self) -> &[String] {
        self.a.col_ids()
    }

    #[inline]
    pub fn imodulon_names(&self) -> &[String] {
        self.m.col_ids()
    }

    #[inline]
    pub fn n_genes(&self) -> usize {
        self.m.n_rows()
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.a.n_cols()
    }

    #[inline]
    pub fn n_imodulons(&self) -> usize {
        self.m.n_cols()
    }

    #[inline]
    pub fn gene_table(&self) -> &AnnotationTable {
        &self.gene_table
    }

    #[inline]
    pub fn sample_table(&self) -> &AnnotationTable {
        &self.sample_table
    }

    #[inline]
    pub fn imodulon_table(&self) -> &AnnotationTable {
        &self.imodulon_table
    }

    /// Mutable gene table. Its index must stay equal to the gene names.
    pub fn gene_table_mut(&mut self) -> &mut AnnotationTable {
        &mut self.gene_table
    }

    /// Mutable sample table. Its index must stay equal to the sample names.
    pub fn sample_table_mut(&mut self) -> &mut AnnotationTable {
        &mut self.sample_table
    }

    /// Mutable iModulon table. Its index must stay equal to the iModulon names.
    pub fn imodulon_table_mut(&mut self) -> &mut AnnotationTable {
        &mut self.imodulon_table
    }

    #[inline]
    pub fn trn(&self) -> &Trn {
        &self.trn
    }

    #[inline]
    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    #[inline]
    pub fn dagostino_cutoff(&self) -> f64 {
        self.dagostino_cutoff
    }

    #[inline]
    pub fn threshold_method(&self) -> ThresholdMethod {
        self.threshold_method
    }

    #[inline]
    pub fn cutoff_optimized(&self) -> bool {
        self.cutoff_optimized
    }

    #[inline]
    pub fn gene_links(&self) -> &HashMap<String, String> {
        &self.gene_links
    }

    #[inline]
    pub fn tf_links(&self) -> &HashMap<String, String> {
        &self.tf_links
    }

    #[inline]
    pub fn imodulondb_meta(&self) -> &ImodulondbMeta {
        &self.imodulondb_meta
    }

    pub fn set_imodulondb_meta(&mut self, meta: ImodulondbMeta) {
        self.imodulondb_meta = meta;
    }

    pub fn set_tf_links(&mut self, links: HashMap<String, String>) {
        self.tf_links = links;
    }

    /// Replace gene links. Links for genes outside the model are dropped.
    pub fn set_gene_links(&mut self, links: HashMap<String, String>) {
        let genes: HashSet<&str> = self.gene_names().iter().map(String::as_str).collect();
        let extra = links.keys().filter(|g| !genes.contains(g.as_str())).count();
        if extra > 0 {
            warn!(n_extra = extra, "Dropping gene links for genes not in the model");
        }
        self.gene_links = links
            .into_iter()
            .filter(|(g, _)| genes.contains(g.as_str()))
            .collect();
    }

    /// Position of an iModulon.
    pub fn imodulon_index(&self, imodulon: &str) -> Result<usize> {
        self.m
            .col_index(imodulon)
            .ok_or_else(|| ImodError::UnknownImodulon(imodulon.to_string()))
    }

    /// Threshold of one iModulon.
    pub fn threshold(&self, imodulon: &str) -> Result<f64> {
        Ok(self.thresholds[self.imodulon_index(imodulon)?])
    }

    // Thresholds

    /// Set thresholds explicitly, one per iModulon.
    pub fn set_thresholds(&mut self, thresholds: Vec<f64>) -> Result<()> {
        if thresholds.len() != self.n_imodulons() {
            return Err(ImodError::DimensionMismatch {
                expected: self.n_imodulons(),
                actual: thresholds.len(),
            });
        }
        if let Some(t) = thresholds.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(ImodError::InvalidParameter(format!(
                "thresholds must be finite and non-negative, got {}",
                t
            )));
        }
        self.thresholds = thresholds;
        self.cutoff_optimized = false;
        Ok(())
    }

    /// Recompute every threshold with the configured method at `cutoff`.
    pub fn recompute_thresholds(&mut self, cutoff: f64) -> Result<()> {
        validate_cutoff(cutoff)?;
        self.thresholds = component_thresholds(&self.m, self.threshold_method, cutoff)?;
        self.dagostino_cutoff = cutoff;
        self.cutoff_optimized = false;
        debug!(cutoff, method = ?self.threshold_method, "Recomputed thresholds");
        Ok(())
    }

    /// Optimize the D'Agostino cutoff and recompute thresholds, unless the
    /// current cutoff was already optimized against the current TRN.
    pub fn reoptimize_thresholds(&mut self) -> Result<()> {
        if self.cutoff_optimized {
            info!(
                "Cutoff already optimized, and no new TRN data provided. \
                 Reoptimization will return same cutoff."
            );
            return Ok(());
        }
        let optimization = self.optimize_cutoff()?;
        self.recompute_thresholds(optimization.best_cutoff)?;
        self.cutoff_optimized = true;
        info!(cutoff = optimization.best_cutoff, "Optimized D'Agostino cutoff");
        Ok(())
    }

    /// Search D'Agostino cutoffs 50, 100, ..., 1950 for the one whose
    /// iModulons best match their regulators.
    ///
    /// Each iModulon's 20 highest-weighted genes are tested against single
    /// regulators; the most significant regulator (FDR 1e-5) becomes that
    /// iModulon's seed. A cutoff is scored by the mean F1 score of the seeds
    /// against the genes above the thresholds it produces.
    pub fn optimize_cutoff(&self) -> Result<CutoffOptimization> {
        if self.threshold_method != ThresholdMethod::Dagostino {
            return Err(ImodError::InvalidParameter(
                "cutoff optimization applies to the dagostino threshold method".to_string(),
            ));
        }
        if self.trn.is_empty() {
            return Err(ImodError::InvalidParameter(
                "cutoff optimization requires a non-empty TRN".to_string(),
            ));
        }

        let all_genes = self.gene_set();
        let opts = TrnEnrichmentOptions {
            max_regs: 1,
            fdr: OPTIMIZE_FDR,
            ..Default::default()
        };
        let seeds: Vec<(usize, String)> = (0..self.n_imodulons())
            .into_par_iter()
            .map(|k| -> Result<Option<(usize, String)>> {
                let top = self.top_genes(k, OPTIMIZE_TOP_GENES);
                let enriched =
                    enrichment::compute_trn_enrichment(&top, &all_genes, &self.trn, &opts)?;
                Ok(enriched
                    .into_iter()
                    .min_by(|a, b| a.pvalue.total_cmp(&b.pvalue))
                    .map(|best| (k, best.label)))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        let cutoffs: Vec<f64> = (1..40).map(|i| (i * 50) as f64).collect();
        let seed_regulators: Vec<(String, String)> = seeds
            .iter()
            .map(|(k, reg)| (self.imodulon_names()[*k].clone(), reg.clone()))
            .collect();

        if seeds.is_empty() {
            warn!(
                cutoff = self.dagostino_cutoff,
                "No iModulon is enriched for a regulator; keeping the current cutoff"
            );
            return Ok(CutoffOptimization {
                best_cutoff: self.dagostino_cutoff,
                cutoffs,
                mean_f1: Vec::new(),
                seed_regulators,
            });
        }

        let weights: Vec<Vec<f64>> = seeds.iter().map(|(k, _)| self.m.col_values(*k)).collect();
        let mean_f1 = cutoffs
            .par_iter()
            .map(|&cutoff| -> Result<f64> {
                let mut total = 0.0;
                for ((k, regulator), w) in seeds.iter().zip(&weights) {
                    let threshold = compute_threshold(w, cutoff)?;
                    let genes = self.genes_above(*k, threshold);
                    total += enrichment::compute_regulon_enrichment(
                        &genes, regulator, &all_genes, &self.trn,
                    )?
                    .f1score;
                }
                Ok(total / seeds.len() as f64)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut best = 0;
        for (i, f1) in mean_f1.iter().enumerate() {
            if *f1 > mean_f1[best] {
                best = i;
            }
        }
        debug!(n_seeds = seeds.len(), best_f1 = mean_f1[best], "Scored cutoffs");

        Ok(CutoffOptimization {
            best_cutoff: cutoffs[best],
            cutoffs,
            mean_f1,
            seed_regulators,
        })
    }

    // Membership

    fn gene_set(&self) -> HashSet<String> {
        self.gene_names().iter().cloned().collect()
    }

    fn genes_above(&self, k: usize, threshold: f64) -> HashSet<String> {
        self.gene_names()
            .iter()
            .enumerate()
            .filter(|(g, _)| self.m.get(*g, k).abs() > threshold)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn top_genes(&self, k: usize, n: usize) -> HashSet<String> {
        let mut order: Vec<usize> = (0..self.n_genes()).collect();
        order.sort_by(|&a, &b| self.m.get(b, k).abs().total_cmp(&self.m.get(a, k).abs()));
        order
            .into_iter()
            .take(n)
            .map(|g| self.gene_names()[g].clone())
            .collect()
    }

    fn member_set(&self, k: usize) -> HashSet<String> {
        self.genes_above(k, self.thresholds[k])
    }

    /// 1.0 where |M| exceeds the iModulon threshold, 0.0 elsewhere.
    pub fn m_binarized(&self) -> Result<LabeledMatrix> {
        let data = DMatrix::from_fn(self.n_genes(), self.n_imodulons(), |g, k| {
            if self.m.get(g, k).abs() > self.thresholds[k] {
                1.0
            } else {
                0.0
            }
        });
        LabeledMatrix::new(data, self.gene_names().to_vec(), self.imodulon_names().to_vec())
    }

    /// Genes whose absolute weight exceeds the threshold, in model order.
    pub fn imodulon_genes(&self, imodulon: &str) -> Result<Vec<String>> {
        let k = self.imodulon_index(imodulon)?;
        let threshold = self.thresholds[k];
        Ok(self
            .gene_names()
            .iter()
            .enumerate()
            .filter(|(g, _)| self.m.get(*g, k).abs() > threshold)
            .map(|(_, name)| name.clone())
            .collect())
    }

    /// Member genes with weights and gene-table annotation.
    pub fn view_imodulon(&self, imodulon: &str) -> Result<ImodulonView> {
        let k = self.imodulon_index(imodulon)?;
        let threshold = self.thresholds[k];
        let columns = self.gene_table.columns().to_vec();

        let mut genes: Vec<ImodulonGene> = self
            .gene_names()
            .iter()
            .enumerate()
            .filter(|(g, _)| self.m.get(*g, k).abs() > threshold)
            .map(|(g, name)| ImodulonGene {
                gene_id: name.clone(),
                gene_weight: self.m.get(g, k),
                annotation: columns
                    .iter()
                    .map(|c| self.gene_table.get(name, c).cloned().unwrap_or(Value::Missing))
                    .collect(),
            })
            .collect();
        genes.sort_by(|a, b| b.gene_weight.total_cmp(&a.gene_weight));

        Ok(ImodulonView {
            imodulon: imodulon.to_string(),
            threshold,
            columns,
            genes,
        })
    }

    // Gene names

    /// Locus tag of a gene name, via the gene table `gene_name` column.
    pub fn name2num(&self, gene_name: &str) -> Result<String> {
        if !self.gene_table.has_column("gene_name") {
            return Err(ImodError::MissingColumn("gene_name".to_string()));
        }
        let loci: Vec<&String> = self
            .gene_table
            .index()
            .iter()
            .filter(|g| self.gene_table.get_str(g, "gene_name").as_deref() == Some(gene_name))
            .collect();
        match loci.as_slice() {
            [] => Err(ImodError::UnknownGene(gene_name.to_string())),
            [locus] => Ok((*locus).clone()),
            [locus, ..] => {
                warn!(
                    "Found multiple genes named {}. Only reporting first locus tag",
                    gene_name
                );
                Ok((*locus).clone())
            }
        }
    }

    /// Gene name of a locus tag; the locus itself when no name is known.
    pub fn num2name(&self, locus: &str) -> String {
        self.gene_table
            .get_str(locus, "gene_name")
            .unwrap_or_else(|| locus.to_string())
    }

    // iModulon curation

    /// iModulons dominated by one gene (top |weight| > 2 × second).
    pub fn find_single_gene_imodulons(&self) -> Vec<String> {
        (0..self.n_imodulons())
            .filter(|&k| {
                let mut weights: Vec<f64> = self.m.col_values(k).iter().map(|w| w.abs()).collect();
                weights.sort_by(|a, b| b.total_cmp(a));
                weights.len() >= 2 && weights[0] > 2.0 * weights[1]
            })
            .map(|k| self.imodulon_names()[k].clone())
            .collect()
    }

    /// Like [`find_single_gene_imodulons`](Self::find_single_gene_imodulons),
    /// also flagging them in the `single_gene` column of the iModulon table.
    pub fn mark_single_gene_imodulons(&mut self) -> Result<Vec<String>> {
        let single = self.find_single_gene_imodulons();
        for imodulon in &single {
            self.imodulon_table.set(imodulon, "single_gene", true)?;
        }
        Ok(single)
    }

    /// Rename iModulons in M, A, the iModulon table and thresholds.
    pub fn rename_imodulons(&mut self, map: &HashMap<String, String>) -> Result<()> {
        let unknown: Vec<&String> = map
            .keys()
            .filter(|k| self.m.col_index(k).is_none())
            .collect();
        if !unknown.is_empty() {
            warn!(?unknown, "Ignoring renames of unknown iModulons");
        }
        let m = self.m.rename_cols(map)?;
        let a = self.a.rename_rows(map)?;
        let mut table = self.imodulon_table.clone();
        table.rename_index(map)?;

        self.m = m;
        self.a = a;
        self.imodulon_table = table;
        Ok(())
    }

    // TRN

    /// Replace the TRN. Clears the optimized-cutoff flag.
    pub fn set_trn(&mut self, trn: Trn) -> Result<()> {
        self.apply_trn(trn)?;
        self.cutoff_optimized = false;
        Ok(())
    }

    /// Filter the TRN to model genes and record regulators in the gene table.
    fn apply_trn(&mut self, trn: Trn) -> Result<()> {
        let genes = self.gene_set();
        let (filtered, dropped) = trn.filter_genes(&genes);
        if !dropped.is_empty() {
            warn!(
                n_dropped = dropped.len(),
                "The following genes are in the TRN but not in the M matrix: {:?}",
                dropped
            );
        }

        if !filtered.is_empty() {
            let mut regulators: HashMap<&str, Vec<&str>> = HashMap::new();
            for edge in filtered.edges() {
                let regs = regulators.entry(edge.gene_id.as_str()).or_default();
                if !regs.contains(&edge.regulator.as_str()) {
                    regs.push(edge.regulator.as_str());
                }
            }
            self.gene_table.ensure_column("regulator");
            for gene in self.m.row_ids() {
                let value = match regulators.get(gene.as_str()) {
                    Some(regs) => Value::from(regs.join(",")),
                    None => Value::Missing,
                };
                self.gene_table.set(gene, "regulator", value)?;
            }
        }
        self.trn = filtered;
        Ok(())
    }

    // Enrichment

    /// Enrichment of an iModulon in a regulon such as `crp+glpR`.
    ///
    /// With `save`, the result is written to the iModulon table.
    pub fn compute_regulon_enrichment(
        &mut self,
        imodulon: &str,
        regulator: &str,
        save: bool,
    ) -> Result<EnrichmentResult> {
        let k = self.imodulon_index(imodulon)?;
        let mut result = enrichment::compute_regulon_enrichment(
            &self.member_set(k),
            regulator,
            &self.gene_set(),
            &self.trn,
        )?;
        result.imodulon = Some(imodulon.to_string());
        if save {
            self.save_enrichment(&result)?;
        }
        Ok(result)
    }

    /// TRN-wide enrichment of every iModulon.
    ///
    /// Results are grouped by iModulon in model order and sorted by q-value
    /// within each group. With `save`, the best regulator of every enriched
    /// iModulon is written to the iModulon table.
    pub fn compute_trn_enrichment(
        &mut self,
        opts: &TrnEnrichmentOptions,
        save: bool,
    ) -> Result<Vec<EnrichmentResult>> {
        let all_genes = self.gene_set();
        let per_imodulon = (0..self.n_imodulons())
            .into_par_iter()
            .map(|k| {
                let mut results = enrichment::compute_trn_enrichment(
                    &self.member_set(k),
                    &all_genes,
                    &self.trn,
                    opts,
                )?;
                for result in &mut results {
                    result.imodulon = Some(self.imodulon_names()[k].clone());
                }
                Ok(results)
            })
            .collect::<Result<Vec<_>>>()?;

        if save {
            for best in per_imodulon.iter().filter_map(|r| r.first()) {
                self.save_enrichment(best)?;
            }
        }
        Ok(per_imodulon.into_iter().flatten().collect())
    }

    fn save_enrichment(&mut self, result: &EnrichmentResult) -> Result<()> {
        let imodulon = result
            .imodulon
            .clone()
            .ok_or_else(|| ImodError::InvalidParameter("enrichment has no iModulon".to_string()))?;
        let table = &mut self.imodulon_table;
        table.set(&imodulon, "regulator", result.label.as_str())?;
        table.set(&imodulon, "pvalue", result.pvalue)?;
        table.set(&imodulon, "qvalue", result.qvalue.unwrap_or(f64::NAN))?;
        table.set(&imodulon, "precision", result.precision)?;
        table.set(&imodulon, "recall", result.recall)?;
        table.set(&imodulon, "f1score", result.f1score)?;
        table.set(&imodulon, "TP", result.tp)?;
        table.set(&imodulon, "regulon_size", result.target_set_size)?;
        table.set(&imodulon, "n_regs", result.n_regs)?;
        Ok(())
    }

    // Variance

    /// Fraction of the variance of X explained by one iModulon.
    pub fn explained_variance(&self, imodulon: &str) -> Result<f64> {
        let k = self.imodulon_index(imodulon)?;
        self.explained_variance_of(&[k])
    }

    /// Fraction of the variance of X explained by all iModulons together.
    pub fn total_explained_variance(&self) -> Result<f64> {
        let all: Vec<usize> = (0..self.n_imodulons()).collect();
        self.explained_variance_of(&all)
    }

    /// `1 - ‖Σ M_k A_k − X₀‖² / ‖X₀‖²`, clipped to [0, 1], where X₀ is X
    /// with each sample centered across genes.
    fn explained_variance_of(&self, components: &[usize]) -> Result<f64> {
        let x = self.x.as_ref().ok_or_else(|| {
            ImodError::InvalidParameter("explained variance requires the X matrix".to_string())
        })?;
        let mut baseline = x.matrix().clone();
        for mut column in baseline.column_iter_mut() {
            let mean = column.mean();
            column.add_scalar_mut(-mean);
        }
        let base_err = baseline.norm_squared();
        if base_err == 0.0 {
            return Err(ImodError::Numerical("X has no variance".to_string()));
        }

        let mut reconstruction = DMatrix::zeros(self.n_genes(), self.n_samples());
        for &k in components {
            reconstruction += self.m.matrix().column(k) * self.a.matrix().row(k);
        }
        let err = (reconstruction - baseline).norm_squared();
        Ok((1.0 - err / base_err).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TrnEdge;
    use crate::synthetic::{generate_synthetic, SyntheticConfig};
    use approx::assert_relative_eq;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    /// 30 genes, 3 iModulons: "iM0" holds g0-g4, "iM1" holds g5-g7
    /// (negative weights), "iM2" is dominated by g10.
    fn create_test_m() -> LabeledMatrix {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|g| {
                (0..3)
                    .map(|k| {
                        let background = (((g * 7 + k * 3) % 11) as f64 - 5.0) * 0.002;
                        match (k, g) {
                            (0, 0..=4) => 0.3 + g as f64 * 0.01,
                            (1, 5..=7) => -0.25,
                            (2, 10) => 0.5,
                            (2, 11) => 0.1,
                            _ => background,
                        }
                    })
                    .collect()
            })
            .collect();
        LabeledMatrix::from_rows(&rows, ids("g", 30), ids("iM", 3)).unwrap()
    }

    fn create_test_a() -> LabeledMatrix {
        let rows: Vec<Vec<f64>> = (0..3)
            .map(|k| (0..6).map(|s| (s as f64 - 2.5) * (k as f64 + 1.0)).collect())
            .collect();
        LabeledMatrix::from_rows(&rows, ids("iM", 3), ids("s", 6)).unwrap()
    }

    fn create_test_trn() -> Trn {
        let mut edges: Vec<TrnEdge> = (0..5).map(|g| TrnEdge::new("glpR", &format!("g{}", g))).collect();
        edges.push(TrnEdge::new("glpR", "g20"));
        edges.push(TrnEdge::new("crp", "g0"));
        edges.push(TrnEdge::new("crp", "g1"));
        edges.push(TrnEdge::new("crp", "g5"));
        edges.push(TrnEdge::new("lacI", "b9999"));
        Trn::new(edges)
    }

    fn create_test_model() -> IcaData {
        let m = create_test_m();
        let a = create_test_a();
        let x_data = m.matrix() * a.matrix();
        let x = LabeledMatrix::new(x_data, ids("g", 30), ids("s", 6)).unwrap();

        let mut gene_table = AnnotationTable::new(ids("g", 30));
        for g in 0..30 {
            gene_table
                .set(&format!("g{}", g), "gene_name", format!("gen{}", g))
                .unwrap();
        }

        IcaData::builder(m, a)
            .x(x)
            .gene_table(gene_table)
            .trn(create_test_trn())
            .thresholds(vec![0.2, 0.2, 0.2])
            .build()
            .unwrap()
    }

    #[test]
    fn test_simple_model() {
        let model = IcaData::builder(create_test_m(), create_test_a())
            .dagostino_cutoff(50.0)
            .build()
            .unwrap();
        assert_eq!(model.n_genes(), 30);
        assert_eq!(model.n_imodulons(), 3);
        assert_eq!(model.thresholds().len(), 3);
        assert!(model.thresholds().iter().all(|t| t.is_finite()));
        assert!(!model.cutoff_optimized());
        assert_eq!(model.gene_table().index(), model.gene_names());
        assert_eq!(model.imodulon_table().index(), model.imodulon_names());
    }

    #[test]
    fn test_label_mismatch() {
        let a = create_test_a()
            .rename_rows(&HashMap::from([("iM0".to_string(), "other".to_string())]))
            .unwrap();
        let result = IcaData::new(create_test_m(), a);
        assert!(matches!(result, Err(ImodError::LabelMismatch(_))));
    }

    #[test]
    fn test_x_must_match() {
        let x = LabeledMatrix::new(DMatrix::zeros(30, 5), ids("g", 30), ids("s", 5)).unwrap();
        let result = IcaData::builder(create_test_m(), create_test_a()).x(x).build();
        assert!(matches!(result, Err(ImodError::LabelMismatch(_))));
    }

    #[test]
    fn test_explicit_thresholds_win() {
        let model = IcaData::builder(create_test_m(), create_test_a())
            .trn(create_test_trn())
            .optimize_cutoff(true)
            .thresholds(vec![0.1, 0.2, 0.3])
            .build()
            .unwrap();
        assert_eq!(model.thresholds(), &[0.1, 0.2, 0.3]);
        assert!(!model.cutoff_optimized());
    }

    #[test]
    fn test_wrong_threshold_count() {
        let result = IcaData::builder(create_test_m(), create_test_a())
            .thresholds(vec![0.1])
            .build();
        assert!(matches!(result, Err(ImodError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_trn_filtered_and_recorded() {
        let model = create_test_model();
        assert!(!model.trn().contains_regulator("lacI"));
        assert_eq!(model.trn().len(), 9);
        assert_eq!(model.gene_table().get_str("g0", "regulator").unwrap(), "glpR,crp");
        assert!(model.gene_table().get_str("g29", "regulator").is_none());
    }

    #[test]
    fn test_imodulon_genes_and_binarized() {
        let model = create_test_model();
        assert_eq!(model.imodulon_genes("iM0").unwrap(), ids("g", 5));
        assert_eq!(model.imodulon_genes("iM1").unwrap(), vec!["g5", "g6", "g7"]);
        assert_eq!(model.imodulon_genes("iM2").unwrap(), vec!["g10"]);

        let binarized = model.m_binarized().unwrap();
        let total: f64 = binarized.matrix().iter().sum();
        assert_eq!(total, 9.0);
        assert!(model.imodulon_genes("missing").is_err());
    }

    #[test]
    fn test_view_imodulon_sorted() {
        let model = create_test_model();
        let view = model.view_imodulon("iM0").unwrap();
        assert_eq!(view.gene_ids(), vec!["g4", "g3", "g2", "g1", "g0"]);
        assert_eq!(view.get("g4", "gene_name").unwrap().as_text(), Some("gen4"));

        let table = view.to_table().unwrap();
        assert_eq!(table.columns()[0], "gene_weight");
        assert_relative_eq!(table.get_f64("g0", "gene_weight").unwrap(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_name_conversion() {
        let model = create_test_model();
        assert_eq!(model.name2num("gen3").unwrap(), "g3");
        assert!(matches!(model.name2num("nope"), Err(ImodError::UnknownGene(_))));
        assert_eq!(model.num2name("g3"), "gen3");
        assert_eq!(model.num2name("unknown"), "unknown");
    }

    #[test]
    fn test_single_gene_imodulons() {
        let mut model = create_test_model();
        assert_eq!(model.find_single_gene_imodulons(), vec!["iM2"]);
        model.mark_single_gene_imodulons().unwrap();
        assert_eq!(model.imodulon_table().get_str("iM2", "single_gene").unwrap(), "True");
    }

    #[test]
    fn test_rename_imodulons() {
        let mut model = create_test_model();
        let map = HashMap::from([("iM0".to_string(), "GlpR".to_string())]);
        model.rename_imodulons(&map).unwrap();
        assert_eq!(model.imodulon_names()[0], "GlpR");
        assert_eq!(model.a().row_ids()[0], "GlpR");
        assert_eq!(model.imodulon_table().index()[0], "GlpR");
        assert_relative_eq!(model.threshold("GlpR").unwrap(), 0.2);

        let clash = HashMap::from([("iM1".to_string(), "GlpR".to_string())]);
        assert!(model.rename_imodulons(&clash).is_err());
        assert_eq!(model.imodulon_names()[1], "iM1");
    }

    #[test]
    fn test_regulon_enrichment_save() {
        let mut model = create_test_model();
        let result = model.compute_regulon_enrichment("iM0", "glpR", true).unwrap();
        assert_eq!(result.tp, 5);
        assert_relative_eq!(result.precision, 1.0);
        assert_relative_eq!(result.recall, 5.0 / 6.0, epsilon = 1e-12);

        let table = model.imodulon_table();
        assert_eq!(table.get_str("iM0", "regulator").unwrap(), "glpR");
        assert_eq!(table.get_f64("iM0", "TP").unwrap(), 5.0);

        let combined = model.compute_regulon_enrichment("iM0", "glpR+crp", false).unwrap();
        assert_eq!(combined.n_regs, 2);
        assert_eq!(combined.tp, 2);
    }

    #[test]
    fn test_trn_enrichment_saves_best() {
        let mut model = create_test_model();
        let opts = TrnEnrichmentOptions {
            fdr: 0.05,
            ..Default::default()
        };
        let results = model.compute_trn_enrichment(&opts, true).unwrap();
        assert!(results
            .iter()
            .any(|r| r.imodulon.as_deref() == Some("iM0") && r.label == "glpR"));
        assert_eq!(model.imodulon_table().get_str("iM0", "regulator").unwrap(), "glpR");
    }

    #[test]
    fn test_set_trn_clears_optimized_flag() {
        let mut model = create_test_model();
        model.cutoff_optimized = true;
        model.set_trn(create_test_trn()).unwrap();
        assert!(!model.cutoff_optimized());
    }

    #[test]
    fn test_reoptimize_skips_when_optimized() {
        let mut model = create_test_model();
        model.cutoff_optimized = true;
        let before = model.thresholds().to_vec();
        model.reoptimize_thresholds().unwrap();
        assert_eq!(model.thresholds(), before.as_slice());
    }

    #[test]
    fn test_optimize_cutoff_flow() {
        let synthetic = generate_synthetic(&SyntheticConfig::default()).unwrap();
        let planted = &synthetic.model;

        let mut model = IcaData::builder(planted.m().clone(), planted.a().clone())
            .x(planted.x().unwrap().clone())
            .gene_table(planted.gene_table().clone())
            .sample_table(planted.sample_table().clone())
            .trn(planted.trn().clone())
            .dagostino_cutoff(1776.0)
            .optimize_cutoff(true)
            .build()
            .unwrap();
        assert!(model.cutoff_optimized());
        assert_eq!(model.dagostino_cutoff(), 50.0);

        let optimization = model.optimize_cutoff().unwrap();
        assert_eq!(optimization.best_cutoff, 50.0);
        assert_eq!(optimization.cutoffs.len(), 39);
        assert_eq!(optimization.mean_f1.len(), optimization.cutoffs.len());
        assert_eq!(optimization.seed_regulators.len(), 5);
        for (imodulon, regulator) in &optimization.seed_regulators {
            assert_eq!(synthetic.ground_truth.regulator_of(imodulon), Some(regulator.as_str()));
        }
        let best = optimization.mean_f1[0];
        assert!(best > 0.5);
        assert!(optimization.mean_f1.iter().all(|f1| *f1 <= best));

        model.set_trn(planted.trn().clone()).unwrap();
        assert!(!model.cutoff_optimized());

        model.recompute_thresholds(1776.0).unwrap();
        assert_eq!(model.dagostino_cutoff(), 1776.0);
        model.reoptimize_thresholds().unwrap();
        assert!(model.cutoff_optimized());
        assert_eq!(model.dagostino_cutoff(), 50.0);
        assert_eq!(model.thresholds(), planted.thresholds());
    }

    #[test]
    fn test_kmeans_thresholds_from_builder() {
        // Three tiers per iModulon: strong members, a weaker block, near-zero background.
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|g| {
                (0..2)
                    .map(|k| {
                        let background = (((g * 7 + k * 3) % 11) as f64 - 5.0) * 0.002;
                        match (k, g) {
                            (0, 0..=7) => 1.0 + g as f64 * 0.02,
                            (0, 8..=17) => 0.3,
                            (1, 22..=28) => -0.8,
                            (1, 12..=21) => 0.25,
                            _ => background,
                        }
                    })
                    .collect()
            })
            .collect();
        let m = LabeledMatrix::from_rows(&rows, ids("g", 30), ids("iM", 2)).unwrap();
        let a = LabeledMatrix::from_rows(
            &[vec![1.0, -1.0, 0.5], vec![0.0, 2.0, -2.0]],
            ids("iM", 2),
            ids("s", 3),
        )
        .unwrap();

        let model = IcaData::builder(m, a)
            .threshold_method(ThresholdMethod::KMeans)
            .build()
            .unwrap();
        assert_eq!(model.threshold_method(), ThresholdMethod::KMeans);
        assert_relative_eq!(model.thresholds()[0], 0.65, epsilon = 1e-12);
        assert_relative_eq!(model.thresholds()[1], 0.525, epsilon = 1e-12);
        assert_eq!(model.imodulon_genes("iM0").unwrap(), ids("g", 8));
        let im1: Vec<String> = (22..=28).map(|g| format!("g{}", g)).collect();
        assert_eq!(model.imodulon_genes("iM1").unwrap(), im1);
    }

    #[test]
    fn test_recompute_thresholds() {
        let mut model = create_test_model();
        model.recompute_thresholds(1776.0).unwrap();
        assert_eq!(model.dagostino_cutoff(), 1776.0);
        assert!(!model.cutoff_optimized());
        assert!(model.recompute_thresholds(-1.0).is_err());
    }

    #[test]
    fn test_optimize_requires_trn() {
        let model = IcaData::builder(create_test_m(), create_test_a())
            .thresholds(vec![0.2, 0.2, 0.2])
            .build()
            .unwrap();
        assert!(model.optimize_cutoff().is_err());
    }

    #[test]
    fn test_explained_variance() {
        let model = create_test_model();
        let total = model.total_explained_variance().unwrap();
        let single = model.explained_variance("iM0").unwrap();
        assert!((0.0..=1.0).contains(&single));
        assert!(total >= single);
    }

    #[test]
    fn test_explained_variance_requires_x() {
        let model = IcaData::builder(create_test_m(), create_test_a())
            .thresholds(vec![0.2, 0.2, 0.2])
            .build()
            .unwrap();
        assert!(model.explained_variance("iM0").is_err());
    }

    #[test]
    fn test_threshold_method_from_str() {
        assert_eq!("KMeans".parse::<ThresholdMethod>().unwrap(), ThresholdMethod::KMeans);
        assert!("otsu".parse::<ThresholdMethod>().is_err());
    }
}
