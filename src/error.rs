//! Error types for the imodulon library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum ImodError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid value '{value}' at row {row}, column {col}")]
    InvalidValue {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Label mismatch: {0}")]
    LabelMismatch(String),

    #[error("Duplicate label '{label}' in {axis}")]
    DuplicateLabel { label: String, axis: String },

    #[error("Unknown iModulon: {0}")]
    UnknownImodulon(String),

    #[error("Unknown gene: {0}")]
    UnknownGene(String),

    #[error("Unknown sample: {0}")]
    UnknownSample(String),

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Complex regulon '{0}' mixes '+' and '/'; wrap terms in brackets, e.g. [a + b] / [c]")]
    ComplexRegulon(String),

    #[error("Too many regulators ({0}) for combinatorial enrichment; set force to run anyway")]
    TooManyRegulators(usize),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, ImodError>;
