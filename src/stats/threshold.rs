//! Gene weight thresholds that decide iModulon membership.

use super::normality::{normaltest, MIN_SAMPLES};
use crate::error::{ImodError, Result};

/// Margin added above the largest weight when no gene passes the threshold.
const EMPTY_MARGIN: f64 = 0.05;

/// D'Agostino K² based threshold for one component.
///
/// Genes are ordered by absolute weight. The gene with the largest weight is
/// removed repeatedly until the K² statistic of the remaining (signed)
/// weights falls to `cutoff` or below. The removed genes form the
/// iModulon; the threshold is the midpoint between its smallest member and
/// the largest remaining gene. When nothing is removed the threshold sits
/// just above the largest weight so the iModulon is empty.
pub fn compute_threshold(weights: &[f64], cutoff: f64) -> Result<f64> {
    if weights.len() < MIN_SAMPLES {
        return Err(ImodError::InvalidParameter(format!(
            "component has {} genes; at least {} are required",
            weights.len(),
            MIN_SAMPLES
        )));
    }

    let mut ordered: Vec<f64> = weights.to_vec();
    ordered.sort_by(|a, b| a.abs().total_cmp(&b.abs()));
    let abs: Vec<f64> = ordered.iter().map(|w| w.abs()).collect();
    let n = ordered.len();

    let mut n_keep = n;
    let mut k2 = normaltest(&ordered[..n_keep])?.statistic;
    while k2 > cutoff && n_keep > MIN_SAMPLES {
        n_keep -= 1;
        k2 = normaltest(&ordered[..n_keep])?.statistic;
    }

    if n_keep == n {
        Ok(abs[n - 1] + EMPTY_MARGIN)
    } else {
        Ok((abs[n_keep] + abs[n_keep - 1]) / 2.0)
    }
}

/// K-means based threshold for one component.
///
/// Absolute weights are split into three clusters. The smallest cluster holds
/// the iModulon genes; the threshold is the midpoint between its minimum and
/// the maximum of the second smallest cluster.
pub fn kmeans_threshold(weights: &[f64]) -> Result<f64> {
    let abs: Vec<f64> = weights.iter().map(|w| w.abs()).collect();
    let labels = kmeans_1d(&abs, 3)?;

    let mut sizes = [0usize; 3];
    for &l in &labels {
        sizes[l] += 1;
    }
    let mut order: Vec<usize> = (0..3).filter(|&c| sizes[c] > 0).collect();
    if order.len() < 2 {
        return Err(ImodError::Numerical(
            "k-means produced fewer than two clusters".to_string(),
        ));
    }
    // Stable ordering: smaller cluster first, ties by larger centre first
    let centre = |c: usize| -> f64 {
        let (sum, count) = abs
            .iter()
            .zip(&labels)
            .filter(|(_, &l)| l == c)
            .fold((0.0, 0usize), |(s, n), (v, _)| (s + v, n + 1));
        sum / count as f64
    };
    order.sort_by(|&a, &b| {
        sizes[a]
            .cmp(&sizes[b])
            .then_with(|| centre(b).total_cmp(&centre(a)))
    });

    let members = |c: usize| abs.iter().zip(&labels).filter(move |(_, &l)| l == c).map(|(v, _)| *v);
    let member_min = members(order[0]).fold(f64::INFINITY, f64::min);
    let other_max = members(order[1]).fold(f64::NEG_INFINITY, f64::max);
    Ok((member_min + other_max) / 2.0)
}

/// Lloyd's algorithm in one dimension with quantile initialisation.
fn kmeans_1d(values: &[f64], k: usize) -> Result<Vec<usize>> {
    if values.len() < k {
        return Err(ImodError::InvalidParameter(format!(
            "k-means needs at least {} values, got {}",
            k,
            values.len()
        )));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut centres: Vec<f64> = (0..k)
        .map(|c| {
            let q = (2 * c + 1) as f64 / (2 * k) as f64;
            sorted[((sorted.len() - 1) as f64 * q).round() as usize]
        })
        .collect();

    let mut labels = vec![0usize; values.len()];
    for _ in 0..300 {
        let mut changed = false;
        for (i, v) in values.iter().enumerate() {
            let best = (0..k)
                .min_by(|&a, &b| (v - centres[a]).abs().total_cmp(&(v - centres[b]).abs()))
                .unwrap_or(0);
            if labels[i] != best {
                labels[i] = best;
                changed = true;
            }
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (v, &l) in values.iter().zip(&labels) {
            sums[l] += v;
            counts[l] += 1;
        }
        for c in 0..k {
            if counts[c] > 0 {
                centres[c] = sums[c] / counts[c] as f64;
            }
        }

        if !changed {
            break;
        }
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Deterministic near-normal background plus strong outliers.
    fn component(n_background: usize, outliers: &[f64]) -> Vec<f64> {
        let mut seed = 7u64;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) as f64 / (1u64 << 31) as f64) - 0.5
        };
        let mut weights: Vec<f64> = (0..n_background)
            .map(|_| {
                // Sum of uniforms approximates a normal draw
                (0..6).map(|_| next()).sum::<f64>() * 0.01
            })
            .collect();
        weights.extend_from_slice(outliers);
        weights
    }

    #[test]
    fn test_threshold_separates_outliers() {
        let weights = component(400, &[0.25, -0.3, 0.28, 0.35]);
        let threshold = compute_threshold(&weights, 50.0).unwrap();

        let members: Vec<f64> = weights.iter().copied().filter(|w| w.abs() > threshold).collect();
        assert_eq!(members.len(), 4);
        let background_max = weights[..400].iter().fold(0.0f64, |m, w| m.max(w.abs()));
        assert!(threshold > background_max);
        assert!(threshold < 0.25);
    }

    #[test]
    fn test_no_outliers_gives_empty_imodulon() {
        let weights = component(300, &[]);
        let threshold = compute_threshold(&weights, 550.0).unwrap();
        let max_abs = weights.iter().fold(0.0f64, |m, w| m.max(w.abs()));
        assert_relative_eq!(threshold, max_abs + 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_lower_cutoff_is_stricter() {
        let weights = component(400, &[0.12, -0.15, 0.2, 0.3, -0.4]);
        let loose = compute_threshold(&weights, 2000.0).unwrap();
        let strict = compute_threshold(&weights, 50.0).unwrap();
        assert!(strict <= loose);
    }

    #[test]
    fn test_too_few_genes() {
        assert!(compute_threshold(&[0.1, 0.2, 0.3], 550.0).is_err());
    }

    #[test]
    fn test_kmeans_threshold() {
        let mut weights = vec![0.01, -0.02, 0.015, -0.01, 0.02, 0.005, -0.012, 0.018];
        weights.extend_from_slice(&[0.1, -0.11, 0.09, 0.1, -0.12, 0.095]);
        weights.extend_from_slice(&[0.5, -0.55]);
        let threshold = kmeans_threshold(&weights).unwrap();
        // Midpoint between 0.5 and 0.12
        assert_relative_eq!(threshold, 0.31, epsilon = 1e-12);
    }

    #[test]
    fn test_kmeans_labels_cover_all_values() {
        let values = vec![1.0, 1.1, 5.0, 5.2, 9.0, 9.1];
        let labels = kmeans_1d(&values, 3).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[2]);
        assert_ne!(labels[2], labels[4]);
    }
}
