//! Whole-model persistence as JSON.
//!
//! The file wraps the model with the crate version and a save timestamp:
//!
//! ```json
//! { "version": "0.1.0", "saved_at": "2024-01-01T00:00:00+00:00", "model": { ... } }
//! ```
//!
//! JSON has no NaN, so matrices with non-finite entries are rejected on save.

use crate::data::{IcaData, LabeledMatrix};
use crate::error::{ImodError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

#[derive(Serialize)]
struct SavedModelRef<'a> {
    version: &'a str,
    saved_at: String,
    model: &'a IcaData,
}

#[derive(Deserialize)]
struct SavedModel {
    #[allow(dead_code)]
    version: String,
    saved_at: String,
    model: IcaData,
}

fn check_finite(name: &str, matrix: &LabeledMatrix) -> Result<()> {
    for (j, column) in matrix.matrix().column_iter().enumerate() {
        if let Some(i) = column.iter().position(|v| !v.is_finite()) {
            return Err(ImodError::InvalidValue {
                value: format!("{} in {}", column[i], name),
                row: i,
                col: j,
            });
        }
    }
    Ok(())
}

/// Save a model to a JSON file.
pub fn save_to_json<P: AsRef<Path>>(model: &IcaData, path: P) -> Result<()> {
    check_finite("M", model.m())?;
    check_finite("A", model.a())?;
    if let Some(x) = model.x() {
        check_finite("X", x)?;
    }

    let saved = SavedModelRef {
        version: env!("CARGO_PKG_VERSION"),
        saved_at: Utc::now().to_rfc3339(),
        model,
    };
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer(writer, &saved)?;
    info!(path = %path.as_ref().display(), "Saved model");
    Ok(())
}

/// Load a model written by [`save_to_json`].
pub fn load_json_model<P: AsRef<Path>>(path: P) -> Result<IcaData> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let saved: SavedModel = serde_json::from_reader(reader)?;
    info!(
        path = %path.as_ref().display(),
        saved_at = %saved.saved_at,
        "Loaded model"
    );
    Ok(saved.model)
}
