//! Activities of new expression profiles under an existing model.
//!
//! New data is restricted to the genes the model knows, centered on its
//! reference samples and projected through the pseudo-inverse of the shared
//! rows of M.

use crate::data::{AnnotationTable, IcaData, LabeledMatrix};
use crate::error::{ImodError, Result};
use nalgebra::DMatrix;
use tracing::{debug, warn};

/// Fraction of model genes below which the overlap is reported.
const LOW_OVERLAP: f64 = 0.9;

/// New data aligned to the model genes.
struct SharedGenes {
    genes: Vec<String>,
    m: DMatrix<f64>,
    x: LabeledMatrix,
}

fn shared_genes(model: &IcaData, data: &LabeledMatrix) -> Result<SharedGenes> {
    let genes: Vec<String> = model
        .gene_names()
        .iter()
        .filter(|g| data.row_index(g).is_some())
        .cloned()
        .collect();
    if genes.is_empty() {
        return Err(ImodError::EmptyData(
            "expression data shares no genes with the model".to_string(),
        ));
    }

    let missing = model.n_genes() - genes.len();
    if missing > 0 {
        let fraction = genes.len() as f64 / model.n_genes() as f64;
        if fraction < LOW_OVERLAP {
            warn!(
                n_missing = missing,
                "Only {:.1}% of model genes are in the expression data",
                fraction * 100.0
            );
        } else {
            warn!(n_missing = missing, "Some model genes are missing from the expression data");
        }
    }

    let rows: Vec<usize> = genes
        .iter()
        .filter_map(|g| model.m().row_index(g))
        .collect();
    let m = model.m().matrix().select_rows(rows.iter());
    let x = data.select_rows(&genes)?;
    Ok(SharedGenes { genes, m, x })
}

/// Subtract, for every gene, its mean over the reference samples.
fn center(x: &LabeledMatrix, reference: Option<&[String]>) -> Result<LabeledMatrix> {
    let reference = match reference {
        Some(r) if !r.is_empty() => r,
        _ => return Ok(x.clone()),
    };
    let columns = reference
        .iter()
        .map(|s| x.col_index(s).ok_or_else(|| ImodError::UnknownSample(s.clone())))
        .collect::<Result<Vec<_>>>()?;

    let mut data = x.matrix().clone();
    for (i, mut row) in data.row_iter_mut().enumerate() {
        let mean = columns.iter().map(|&c| x.get(i, c)).sum::<f64>() / columns.len() as f64;
        row.add_scalar_mut(-mean);
    }
    LabeledMatrix::new(data, x.row_ids().to_vec(), x.col_ids().to_vec())
}

/// Singular values of the shared M at or below this are treated as zero.
const PINV_EPS: f64 = 1e-10;

/// A = pinv(M) X on the shared genes.
fn project(m: &DMatrix<f64>, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let pinv = m
        .clone()
        .pseudo_inverse(PINV_EPS)
        .map_err(|e| ImodError::Numerical(format!("pseudo-inverse of M failed: {}", e)))?;
    Ok(pinv * x)
}

/// Infer iModulon activities of new expression profiles.
///
/// `data` is genes × samples. With `reference` samples, every gene is first
/// centered on its mean over those samples; the reference samples then sit
/// near zero activity.
pub fn infer_activities(
    model: &IcaData,
    data: &LabeledMatrix,
    reference: Option<&[String]>,
) -> Result<LabeledMatrix> {
    let shared = shared_genes(model, data)?;
    let centered = center(&shared.x, reference)?;
    let a = project(&shared.m, centered.matrix())?;
    debug!(n_shared = shared.genes.len(), n_samples = data.n_cols(), "Projected activities");
    LabeledMatrix::new(a, model.imodulon_names().to_vec(), data.col_ids().to_vec())
}

/// Project a new dataset onto a model.
///
/// The result is a model on the shared genes with the inferred activities,
/// the centered expression data, the model's gene and iModulon tables, TRN
/// and thresholds, and the given sample table.
pub fn project_dataset(
    model: &IcaData,
    data: &LabeledMatrix,
    reference: Option<&[String]>,
    sample_table: Option<AnnotationTable>,
) -> Result<IcaData> {
    let shared = shared_genes(model, data)?;
    let centered = center(&shared.x, reference)?;
    let a = project(&shared.m, centered.matrix())?;
    let a = LabeledMatrix::new(a, model.imodulon_names().to_vec(), data.col_ids().to_vec())?;
    let m = model.m().select_rows(&shared.genes)?;

    let mut builder = IcaData::builder(m, a)
        .x(centered)
        .gene_table(model.gene_table().clone())
        .imodulon_table(model.imodulon_table().clone())
        .trn(model.trn().clone())
        .thresholds(model.thresholds().to_vec())
        .dagostino_cutoff(model.dagostino_cutoff())
        .threshold_method(model.threshold_method())
        .gene_links(model.gene_links().clone())
        .tf_links(model.tf_links().clone())
        .imodulondb_meta(model.imodulondb_meta().clone());
    if let Some(table) = sample_table {
        builder = builder.sample_table(table);
    }
    builder.build()
}
