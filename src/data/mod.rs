//! Data structures for ICA-derived models.

mod ica_data;
mod labeled_matrix;
mod table;
mod trn;

pub use ica_data::{
    CutoffOptimization, IcaData, IcaDataBuilder, ImodulonGene, ImodulonView, ThresholdMethod,
    DEFAULT_DAGOSTINO_CUTOFF,
};
pub use labeled_matrix::LabeledMatrix;
pub use table::{AnnotationTable, Value};
pub use trn::{Trn, TrnEdge};

pub(crate) use labeled_matrix::check_unique;

use crate::error::Result;
use std::fs::File;
use std::path::Path;

/// Tab for `.tsv`/`.txt`, comma otherwise.
pub(crate) fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("txt") => b'\t',
        _ => b',',
    }
}

pub(crate) fn delimited_reader(path: &Path) -> Result<csv::Reader<File>> {
    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .flexible(true)
        .has_headers(true)
        .from_path(path)?;
    Ok(reader)
}

pub(crate) fn delimited_writer(path: &Path) -> Result<csv::Writer<File>> {
    let writer = csv::WriterBuilder::new()
        .delimiter(delimiter_for(path))
        .from_path(path)?;
    Ok(writer)
}

/// Empty cells and NA/NaN markers.
pub(crate) fn is_missing(raw: &str) -> bool {
    let v = raw.trim();
    v.is_empty() || v == "NA" || v == "na" || v.eq_ignore_ascii_case("nan")
}

/// Parse a numeric matrix cell; missing markers become NaN.
pub(crate) fn parse_cell(raw: &str) -> Option<f64> {
    if is_missing(raw) {
        return Some(f64::NAN);
    }
    raw.trim().parse::<f64>().ok()
}
