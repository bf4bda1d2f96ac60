//! Statistical primitives: normality testing, thresholds, Fisher's exact
//! test and correlation.

pub mod correlation;
pub mod fisher;
pub mod normality;
pub mod threshold;

pub use correlation::{pearson, ranks, spearman, CorrelationMethod};
pub use fisher::{fisher_exact_greater, FisherResult};
pub use normality::{kurtosistest, normaltest, skewtest, NormalTestResult};
pub use threshold::{compute_threshold, kmeans_threshold};
