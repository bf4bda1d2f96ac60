//! Transcriptional regulatory network (TRN) edge list.

use super::{delimited_reader, delimited_writer, is_missing};
use crate::error::{ImodError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// One regulator → target gene edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrnEdge {
    /// Regulator name.
    pub regulator: String,
    /// Target gene locus tag.
    pub gene_id: String,
    /// Target gene name, if recorded.
    pub gene_name: Option<String>,
    /// Regulatory effect (e.g. "+", "-", "+-").
    pub effect: Option<String>,
    /// Evidence level; higher is stronger.
    pub evidence: Option<f64>,
}

impl TrnEdge {
    /// Edge with only regulator and target.
    pub fn new(regulator: &str, gene_id: &str) -> Self {
        Self {
            regulator: regulator.to_string(),
            gene_id: gene_id.to_string(),
            gene_name: None,
            effect: None,
            evidence: None,
        }
    }
}

/// Regulatory network as a list of edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trn {
    edges: Vec<TrnEdge>,
}

impl Trn {
    /// Create from edges.
    pub fn new(edges: Vec<TrnEdge>) -> Self {
        Self { edges }
    }

    /// Load from a delimited file with `regulator` and `gene_id` columns.
    ///
    /// Optional columns `gene_name`, `effect` and `evidence` are read when
    /// present. Column names are matched case-insensitively.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = delimited_reader(path.as_ref())?;
        let header = reader.headers()?.clone();
        let find = |name: &str| header.iter().position(|h| h.trim().eq_ignore_ascii_case(name));

        let reg_col = find("regulator").ok_or_else(|| ImodError::MissingColumn("regulator".into()))?;
        let gene_col = find("gene_id").ok_or_else(|| ImodError::MissingColumn("gene_id".into()))?;
        let name_col = find("gene_name");
        let effect_col = find("effect");
        let evidence_col = find("evidence");

        let text = |record: &csv::StringRecord, col: Option<usize>| -> Option<String> {
            col.and_then(|c| record.get(c))
                .filter(|v| !is_missing(v))
                .map(|v| v.trim().to_string())
        };

        let mut edges = Vec::new();
        for record in reader.records() {
            let record = record?;
            let regulator = text(&record, Some(reg_col));
            let gene_id = text(&record, Some(gene_col));
            let (regulator, gene_id) = match (regulator, gene_id) {
                (Some(r), Some(g)) => (r, g),
                _ => continue,
            };
            edges.push(TrnEdge {
                regulator,
                gene_id,
                gene_name: text(&record, name_col),
                effect: text(&record, effect_col),
                evidence: text(&record, evidence_col).and_then(|v| v.parse().ok()),
            });
        }
        Ok(Self { edges })
    }

    /// Write to a delimited file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = delimited_writer(path.as_ref())?;
        writer.write_record(["regulator", "gene_id", "gene_name", "effect", "evidence"])?;
        for e in &self.edges {
            let evidence = e.evidence.map(|v| v.to_string()).unwrap_or_default();
            writer.write_record([
                e.regulator.as_str(),
                e.gene_id.as_str(),
                e.gene_name.as_deref().unwrap_or(""),
                e.effect.as_deref().unwrap_or(""),
                evidence.as_str(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// All edges.
    pub fn edges(&self) -> &[TrnEdge] {
        &self.edges
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Sorted unique regulator names.
    pub fn regulators(&self) -> Vec<String> {
        self.edges
            .iter()
            .map(|e| e.regulator.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Check whether a regulator has any edge.
    pub fn contains_regulator(&self, regulator: &str) -> bool {
        self.edges.iter().any(|e| e.regulator == regulator)
    }

    /// Target genes of a regulator.
    pub fn genes_of(&self, regulator: &str) -> HashSet<String> {
        self.edges
            .iter()
            .filter(|e| e.regulator == regulator)
            .map(|e| e.gene_id.clone())
            .collect()
    }

    /// Regulators that target at least one gene of `genes`, sorted.
    pub fn regulators_of<'a, I>(&self, genes: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let genes: HashSet<&str> = genes.into_iter().map(String::as_str).collect();
        self.edges
            .iter()
            .filter(|e| genes.contains(e.gene_id.as_str()))
            .map(|e| e.regulator.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Keep only edges whose target is in `genes`. Returns the dropped target ids.
    pub fn filter_genes(&self, genes: &HashSet<String>) -> (Self, Vec<String>) {
        let mut dropped = BTreeSet::new();
        let edges = self
            .edges
            .iter()
            .filter(|e| {
                let keep = genes.contains(&e.gene_id);
                if !keep {
                    dropped.insert(e.gene_id.clone());
                }
                keep
            })
            .cloned()
            .collect();
        (Self { edges }, dropped.into_iter().collect())
    }

    /// Keep only edges with at least `min_evidence`. Edges without evidence are dropped.
    pub fn filter_evidence(&self, min_evidence: f64) -> Self {
        let edges = self
            .edges
            .iter()
            .filter(|e| e.evidence.map(|v| v >= min_evidence).unwrap_or(false))
            .cloned()
            .collect();
        Self { edges }
    }
}
