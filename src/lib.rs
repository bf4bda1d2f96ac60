//! iModulon analysis library
//!
//! Tools for working with precomputed independent component analysis (ICA)
//! decompositions of transcriptomic data. A decomposition splits log-TPM
//! expression X (genes × samples) into gene weights M (genes × iModulons)
//! and activities A (iModulons × samples).
//!
//! # Overview
//!
//! - **data**: Model container (`IcaData`), labeled matrices, annotation
//!   tables and the transcriptional regulatory network (TRN)
//! - **stats**: D'Agostino K² normality test, thresholds, Fisher's exact
//!   test, correlation
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **enrichment**: Regulon enrichment of iModulon gene sets against the TRN
//! - **inference**: Activities of new expression data under a fixed model
//! - **compare**: Matching components between two decompositions
//! - **imodulondb**: Export to the iModulonDB website layout
//! - **config** / **io**: YAML dataset configs and JSON model files
//! - **synthetic**: Planted models for testing
//!
//! # Example
//!
//! ```no_run
//! use imodulon::prelude::*;
//!
//! let mut model = IcaData::from_config("dataset.yaml").unwrap();
//! model.compute_trn_enrichment(&TrnEnrichmentOptions::default(), true).unwrap();
//!
//! let new_data = LabeledMatrix::from_csv("new_log_tpm.csv").unwrap();
//! let reference = vec!["control__1".to_string(), "control__2".to_string()];
//! let activities = infer_activities(&model, &new_data, Some(reference.as_slice())).unwrap();
//!
//! export(&model, std::path::Path::new("site"), &ExportOptions::default()).unwrap();
//! ```

pub mod compare;
pub mod config;
pub mod correct;
pub mod data;
pub mod enrichment;
pub mod error;
pub mod imodulondb;
pub mod inference;
pub mod io;
pub mod stats;
pub mod synthetic;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::compare::{
        compare_ica, convert_gene_index, ComponentLink, GeneIndexed, OrthologTable,
        DEFAULT_COMPARE_CUTOFF,
    };
    pub use crate::config::DatasetConfig;
    pub use crate::correct::{correct_bh, fdr_filter};
    pub use crate::data::{
        AnnotationTable, CutoffOptimization, IcaData, IcaDataBuilder, ImodulonView, LabeledMatrix,
        ThresholdMethod, Trn, TrnEdge, Value,
    };
    pub use crate::enrichment::{
        compute_enrichment, compute_regulon_enrichment, compute_trn_enrichment, EnrichmentMethod,
        EnrichmentResult, RegulonExpr, TrnEnrichmentOptions,
    };
    pub use crate::error::{ImodError, Result};
    pub use crate::imodulondb::{
        check_compatibility, export, prepare_for_export, CompatibilityReport, ExportOptions,
        ImodulondbMeta,
    };
    pub use crate::inference::{infer_activities, project_dataset};
    pub use crate::io::{load_json_model, save_to_json};
    pub use crate::stats::{compute_threshold, kmeans_threshold, normaltest, CorrelationMethod};
    pub use crate::synthetic::{generate_synthetic, SyntheticConfig, SyntheticModel};
}
