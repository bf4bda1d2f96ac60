//! D'Agostino-Pearson omnibus normality test.
//!
//! Follows the small-sample transformations of D'Agostino (1970) for
//! skewness and Anscombe & Glynn (1983) for kurtosis, combined into the
//! K² statistic of D'Agostino & Pearson (1973).

use crate::error::{ImodError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::erf::erfc;

/// Minimum sample size accepted by the skewness transformation.
pub const MIN_SAMPLES: usize = 8;

/// Result of a z-transformed moment test or the omnibus test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalTestResult {
    /// Test statistic (z for the moment tests, K² for the omnibus test).
    pub statistic: f64,
    /// P-value (two-sided for z, upper tail of χ²(2) for K²).
    pub p_value: f64,
}

/// Biased central moments (m2, m3, m4).
fn central_moments(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - mean;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    (m2 / n, m3 / n, m4 / n)
}

fn check_input(values: &[f64]) -> Result<()> {
    if values.len() < MIN_SAMPLES {
        return Err(ImodError::InvalidParameter(format!(
            "normality test requires at least {} values, got {}",
            MIN_SAMPLES,
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ImodError::Numerical(
            "normality test input contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn two_sided_p(z: f64) -> f64 {
    erfc(z.abs() / std::f64::consts::SQRT_2)
}

fn skew_z(n: f64, b1: f64) -> f64 {
    let y = b1 * (((n + 1.0) * (n + 3.0)) / (6.0 * (n - 2.0))).sqrt();
    let beta2 = 3.0 * (n * n + 27.0 * n - 70.0) * (n + 1.0) * (n + 3.0)
        / ((n - 2.0) * (n + 5.0) * (n + 7.0) * (n + 9.0));
    let w2 = -1.0 + (2.0 * (beta2 - 1.0)).sqrt();
    let delta = 1.0 / (0.5 * w2.ln()).sqrt();
    let alpha = (2.0 / (w2 - 1.0)).sqrt();
    delta * (y / alpha).asinh()
}

fn kurtosis_z(n: f64, b2: f64) -> f64 {
    let e = 3.0 * (n - 1.0) / (n + 1.0);
    let var_b2 = 24.0 * n * (n - 2.0) * (n - 3.0) / ((n + 1.0).powi(2) * (n + 3.0) * (n + 5.0));
    let x = (b2 - e) / var_b2.sqrt();
    let sqrt_beta1 = 6.0 * (n * n - 5.0 * n + 2.0) / ((n + 7.0) * (n + 9.0))
        * ((6.0 * (n + 3.0) * (n + 5.0)) / (n * (n - 2.0) * (n - 3.0))).sqrt();
    let a = 6.0
        + 8.0 / sqrt_beta1 * (2.0 / sqrt_beta1 + (1.0 + 4.0 / (sqrt_beta1 * sqrt_beta1)).sqrt());
    let term1 = 1.0 - 2.0 / (9.0 * a);
    let denom = 1.0 + x * (2.0 / (a - 4.0)).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    let term2 = denom.signum() * ((1.0 - 2.0 / a) / denom.abs()).powf(1.0 / 3.0);
    (term1 - term2) / (2.0 / (9.0 * a)).sqrt()
}

/// Test whether the skewness differs from that of a normal distribution.
pub fn skewtest(values: &[f64]) -> Result<NormalTestResult> {
    check_input(values)?;
    let (m2, m3, _) = central_moments(values);
    let b1 = if m2 > 0.0 { m3 / m2.powf(1.5) } else { 0.0 };
    let z = skew_z(values.len() as f64, b1);
    Ok(NormalTestResult {
        statistic: z,
        p_value: two_sided_p(z),
    })
}

/// Test whether the kurtosis differs from that of a normal distribution.
pub fn kurtosistest(values: &[f64]) -> Result<NormalTestResult> {
    check_input(values)?;
    let (m2, _, m4) = central_moments(values);
    let b2 = if m2 > 0.0 { m4 / (m2 * m2) } else { 3.0 };
    let z = kurtosis_z(values.len() as f64, b2);
    Ok(NormalTestResult {
        statistic: z,
        p_value: two_sided_p(z),
    })
}

/// D'Agostino-Pearson K² test of normality.
///
/// A constant input has zero skewness and normal kurtosis by convention,
/// which keeps thresholding well defined for degenerate components.
pub fn normaltest(values: &[f64]) -> Result<NormalTestResult> {
    let s = skewtest(values)?.statistic;
    let k = kurtosistest(values)?.statistic;
    let k2 = s * s + k * k;
    if !k2.is_finite() {
        return Err(ImodError::Numerical(
            "K² statistic is not finite".to_string(),
        ));
    }
    let chi2 = ChiSquared::new(2.0).map_err(|e| ImodError::Numerical(e.to_string()))?;
    Ok(NormalTestResult {
        statistic: k2,
        p_value: chi2.sf(k2),
    })
}
