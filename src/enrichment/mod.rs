//! Gene set enrichment against regulons of a transcriptional regulatory
//! network.
//!
//! An iModulon is compared to a regulon with a one-sided Fisher exact test
//! on the 2×2 contingency table of the gene universe. Full TRN enrichment
//! tests every regulator (or combination of regulators) that targets at
//! least one iModulon gene and keeps the results that pass a
//! Benjamini-Hochberg FDR cutoff.

mod regulon;

pub use regulon::RegulonExpr;

use crate::correct::correct_bh_total;
use crate::data::Trn;
use crate::error::{ImodError, Result};
use crate::stats::fisher_exact_greater;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Regulator count above which combinatorial enrichment requires `force`.
pub const MAX_COMBINATORIAL_REGULATORS: usize = 50;

/// Enrichment of one gene set against one regulon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// iModulon the gene set came from, when computed through a model.
    #[serde(default)]
    pub imodulon: Option<String>,
    /// Regulon label, e.g. `crp+glpR`.
    #[serde(rename = "regulator")]
    pub label: String,
    pub pvalue: f64,
    /// BH-adjusted p-value; only set by TRN-wide enrichment.
    #[serde(default)]
    pub qvalue: Option<f64>,
    /// Fraction of the gene set found in the regulon.
    pub precision: f64,
    /// Fraction of the regulon found in the gene set.
    pub recall: f64,
    pub f1score: f64,
    #[serde(rename = "TP")]
    pub tp: usize,
    #[serde(rename = "regulon_size")]
    pub target_set_size: usize,
    #[serde(rename = "imodulon_size")]
    pub gene_set_size: usize,
    pub n_regs: usize,
}

/// How regulators are combined in TRN-wide enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMethod {
    /// Both intersections (`+`) and unions (`/`).
    #[default]
    Both,
    /// Intersections only.
    And,
    /// Unions only.
    Or,
}

impl FromStr for EnrichmentMethod {
    type Err = ImodError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "both" => Ok(EnrichmentMethod::Both),
            "and" => Ok(EnrichmentMethod::And),
            "or" => Ok(EnrichmentMethod::Or),
            other => Err(ImodError::InvalidParameter(format!(
                "unknown enrichment method '{}'; expected both, and or or",
                other
            ))),
        }
    }
}

/// Options for TRN-wide enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrnEnrichmentOptions {
    /// Largest number of regulators combined into one regulon.
    pub max_regs: usize,
    /// FDR cutoff on BH q-values.
    pub fdr: f64,
    pub method: EnrichmentMethod,
    /// Allow combinatorial enrichment with many candidate regulators.
    pub force: bool,
    /// Minimum TRN evidence level; `None` keeps every edge.
    pub evidence: Option<f64>,
}

impl Default for TrnEnrichmentOptions {
    fn default() -> Self {
        Self {
            max_regs: 1,
            fdr: 1e-2,
            method: EnrichmentMethod::Both,
            force: false,
            evidence: None,
        }
    }
}

/// 2×2 contingency table `[[tp, fp], [fn, tn]]` of a gene set against a
/// target set.
///
/// `fp` counts gene set members outside the target and `fn` counts target
/// members outside the gene set.
pub fn contingency(
    gene_set: &HashSet<String>,
    target: &HashSet<String>,
    all_genes: &HashSet<String>,
) -> Result<[[u64; 2]; 2]> {
    if let Some(gene) = gene_set.iter().chain(target).find(|g| !all_genes.contains(*g)) {
        return Err(ImodError::UnknownGene(format!(
            "{} is not in the gene universe",
            gene
        )));
    }
    let tp = gene_set.intersection(target).count();
    let fp = gene_set.len() - tp;
    let fn_ = target.len() - tp;
    let tn = all_genes.len() - gene_set.union(target).count();
    Ok([[tp as u64, fp as u64], [fn_ as u64, tn as u64]])
}

/// Enrichment of `gene_set` in `target`.
pub fn compute_enrichment(
    gene_set: &HashSet<String>,
    target: &HashSet<String>,
    all_genes: &HashSet<String>,
    label: &str,
) -> Result<EnrichmentResult> {
    let table = contingency(gene_set, target, all_genes)?;
    let tp = table[0][0] as usize;

    let mut result = EnrichmentResult {
        imodulon: None,
        label: label.to_string(),
        pvalue: 1.0,
        qvalue: None,
        precision: 0.0,
        recall: 0.0,
        f1score: 0.0,
        tp,
        target_set_size: target.len(),
        gene_set_size: gene_set.len(),
        n_regs: 1,
    };
    if tp == 0 {
        return Ok(result);
    }

    result.pvalue = fisher_exact_greater(table).p_value;
    result.precision = tp as f64 / gene_set.len() as f64;
    result.recall = tp as f64 / target.len() as f64;
    result.f1score =
        2.0 * result.precision * result.recall / (result.precision + result.recall);
    Ok(result)
}

/// Enrichment of `gene_set` in the regulon described by `regulator`.
pub fn compute_regulon_enrichment(
    gene_set: &HashSet<String>,
    regulator: &str,
    all_genes: &HashSet<String>,
    trn: &Trn,
) -> Result<EnrichmentResult> {
    let expr = RegulonExpr::parse(regulator)?;
    let target = expr.genes(trn);
    let mut result = compute_enrichment(gene_set, &target, all_genes, regulator)?;
    result.n_regs = expr.n_regs();
    Ok(result)
}

/// Enrichment of `gene_set` against every regulator (and combination of up
/// to `max_regs` regulators) that targets one of its genes.
///
/// Results passing the FDR cutoff are returned sorted by q-value.
pub fn compute_trn_enrichment(
    gene_set: &HashSet<String>,
    all_genes: &HashSet<String>,
    trn: &Trn,
    opts: &TrnEnrichmentOptions,
) -> Result<Vec<EnrichmentResult>> {
    if opts.max_regs == 0 {
        return Err(ImodError::InvalidParameter(
            "max_regs must be at least 1".to_string(),
        ));
    }
    let filtered;
    let trn = match opts.evidence {
        Some(min) => {
            filtered = trn.filter_evidence(min);
            &filtered
        }
        None => trn,
    };

    let regulators = trn.regulators_of(gene_set);
    if regulators.len() > MAX_COMBINATORIAL_REGULATORS && opts.max_regs > 1 && !opts.force {
        return Err(ImodError::TooManyRegulators(regulators.len()));
    }

    let labels = regulon_labels(&regulators, opts.max_regs, opts.method);
    let n_tests = labels.len();
    let results = labels
        .par_iter()
        .map(|label| compute_regulon_enrichment(gene_set, label, all_genes, trn))
        .collect::<Result<Vec<_>>>()?;

    // Regulons without overlap have p = 1; the padded correction accounts for them.
    let tested: Vec<EnrichmentResult> = results.into_iter().filter(|r| r.tp > 0).collect();
    let p_values: Vec<f64> = tested.iter().map(|r| r.pvalue).collect();
    let labels: Vec<String> = tested.iter().map(|r| r.label.clone()).collect();
    let corrected = correct_bh_total(&p_values, &labels, n_tests);

    Ok(corrected
        .significant_indices(opts.fdr)
        .into_iter()
        .map(|i| {
            let mut result = tested[i].clone();
            result.qvalue = Some(corrected.q_values[i]);
            result
        })
        .collect())
}

/// Regulon strings for every combination of 1..=`max_regs` regulators.
fn regulon_labels(regulators: &[String], max_regs: usize, method: EnrichmentMethod) -> Vec<String> {
    let mut labels = Vec::new();
    for size in 1..=max_regs.min(regulators.len()) {
        for combo in combinations(regulators.len(), size) {
            let names: Vec<&str> = combo.iter().map(|&i| regulators[i].as_str()).collect();
            if size == 1 {
                labels.push(names[0].to_string());
                continue;
            }
            if method != EnrichmentMethod::Or {
                labels.push(names.join("+"));
            }
            if method != EnrichmentMethod::And {
                labels.push(names.join("/"));
            }
        }
    }
    labels
}

/// All `k`-subsets of `0..n` in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        let mut i = k;
        while i > 0 && idx[i - 1] == n - k + i - 1 {
            i -= 1;
        }
        if i == 0 {
            return out;
        }
        idx[i - 1] += 1;
        for j in i..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}
