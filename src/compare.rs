//! Comparison of iModulons across datasets and organisms.

use crate::data::{delimited_reader, AnnotationTable, LabeledMatrix};
use crate::error::{ImodError, Result};
use crate::stats::CorrelationMethod;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Default minimum |correlation| for a link.
pub const DEFAULT_COMPARE_CUTOFF: f64 = 0.25;

/// Gene pairs between two organisms, e.g. bidirectional best hits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrthologTable {
    pairs: Vec<(String, String)>,
}

impl OrthologTable {
    /// Table from `(gene, subject)` pairs.
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// Load from a delimited file with `gene` and `subject` columns.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = delimited_reader(path.as_ref())?;
        let headers = reader.headers()?.clone();
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| ImodError::MissingColumn(name.to_string()))
        };
        let gene_col = find("gene")?;
        let subject_col = find("subject")?;

        let mut pairs = Vec::new();
        for record in reader.records() {
            let record = record?;
            if let (Some(gene), Some(subject)) = (record.get(gene_col), record.get(subject_col)) {
                let (gene, subject) = (gene.trim(), subject.trim());
                if !gene.is_empty() && !subject.is_empty() {
                    pairs.push((gene.to_string(), subject.to_string()));
                }
            }
        }
        Ok(Self { pairs })
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Data indexed by gene that can be restricted to and relabelled by genes.
pub trait GeneIndexed: Sized {
    /// Row labels.
    fn gene_ids(&self) -> &[String];

    /// Rows `ids`, in that order, relabelled as `labels`.
    fn take_genes(&self, ids: &[String], labels: &[String]) -> Result<Self>;
}

impl GeneIndexed for LabeledMatrix {
    fn gene_ids(&self) -> &[String] {
        self.row_ids()
    }

    fn take_genes(&self, ids: &[String], labels: &[String]) -> Result<Self> {
        let selected = self.select_rows(ids)?;
        LabeledMatrix::new(selected.matrix().clone(), labels.to_vec(), selected.col_ids().to_vec())
    }
}

impl GeneIndexed for AnnotationTable {
    fn gene_ids(&self) -> &[String] {
        self.index()
    }

    fn take_genes(&self, ids: &[String], labels: &[String]) -> Result<Self> {
        let mut table = self.align_to(ids, "gene");
        let map: HashMap<String, String> = ids.iter().cloned().zip(labels.iter().cloned()).collect();
        table.rename_index(&map)?;
        Ok(table)
    }
}

/// Put two gene-indexed datasets on a common gene index.
///
/// Without orthologs both are restricted to their shared genes in the order
/// of `df1`. With orthologs, `df1` keeps genes that have an ortholog in
/// `df2`, and the matching `df2` rows are relabelled with the `df1` gene
/// names. Only the first pair seen for a gene or subject is used.
pub fn convert_gene_index<T: GeneIndexed>(
    df1: &T,
    df2: &T,
    orthologs: Option<&OrthologTable>,
) -> Result<(T, T)> {
    let (genes, subjects) = match orthologs {
        None => {
            let in2: HashSet<&String> = df2.gene_ids().iter().collect();
            let shared: Vec<String> = df1
                .gene_ids()
                .iter()
                .filter(|g| in2.contains(g))
                .cloned()
                .collect();
            (shared.clone(), shared)
        }
        Some(table) => {
            let in1: HashSet<&String> = df1.gene_ids().iter().collect();
            let in2: HashSet<&String> = df2.gene_ids().iter().collect();
            let mut partner: HashMap<&String, &String> = HashMap::new();
            let mut used: HashSet<&String> = HashSet::new();
            for (gene, subject) in table.pairs() {
                if in1.contains(gene)
                    && in2.contains(subject)
                    && !partner.contains_key(gene)
                    && used.insert(subject)
                {
                    partner.insert(gene, subject);
                }
            }
            df1.gene_ids()
                .iter()
                .filter_map(|g| partner.get(g).map(|s| (g.clone(), (*s).clone())))
                .unzip()
        }
    };

    if genes.is_empty() {
        return Err(ImodError::EmptyData(
            "the two datasets share no genes".to_string(),
        ));
    }
    debug!(n_shared = genes.len(), "Converted gene index");
    Ok((df1.take_genes(&genes, &genes)?, df2.take_genes(&subjects, &genes)?))
}

/// A correlated pair of components from two datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentLink {
    pub component1: String,
    pub component2: String,
    /// Signed correlation of the gene weights.
    pub correlation: f64,
}

impl ComponentLink {
    /// |correlation|.
    #[inline]
    pub fn strength(&self) -> f64 {
        self.correlation.abs()
    }
}

/// Correlate every component of `m1` with every component of `m2` on their
/// shared genes and keep pairs with |correlation| ≥ `cutoff`, strongest
/// first.
pub fn compare_ica(
    m1: &LabeledMatrix,
    m2: &LabeledMatrix,
    orthologs: Option<&OrthologTable>,
    cutoff: f64,
    method: CorrelationMethod,
) -> Result<Vec<ComponentLink>> {
    if !(0.0..=1.0).contains(&cutoff) {
        return Err(ImodError::InvalidParameter(format!(
            "cutoff must be between 0 and 1, got {}",
            cutoff
        )));
    }
    let (s1, s2) = convert_gene_index(m1, m2, orthologs)?;
    if s1.n_rows() < 3 {
        warn!(n_shared = s1.n_rows(), "Very few shared genes; correlations are unreliable");
    }

    let pairs: Vec<(usize, usize)> = (0..s1.n_cols())
        .flat_map(|i| (0..s2.n_cols()).map(move |j| (i, j)))
        .collect();
    let mut links: Vec<ComponentLink> = pairs
        .par_iter()
        .filter_map(|&(i, j)| {
            let r = method.correlate(&s1.col_values(i), &s2.col_values(j));
            (r.is_finite() && r.abs() >= cutoff).then(|| ComponentLink {
                component1: s1.col_ids()[i].clone(),
                component2: s2.col_ids()[j].clone(),
                correlation: r,
            })
        })
        .collect();
    links.sort_by(|a, b| b.strength().total_cmp(&a.strength()));
    Ok(links)
}
