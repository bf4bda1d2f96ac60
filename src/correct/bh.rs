//! Benjamini-Hochberg false discovery rate correction.

use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Test labels in original order.
    pub labels: Vec<String>,
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values (q-values).
    pub q_values: Vec<f64>,
    /// Number of tests the correction accounted for.
    pub n_tests: usize,
}

impl BhCorrected {
    /// Get q-value for a specific label.
    pub fn get_qvalue(&self, label: &str) -> Option<f64> {
        let idx = self.labels.iter().position(|l| l == label)?;
        self.q_values.get(idx).copied()
    }

    /// Count results at or below an FDR threshold.
    pub fn n_significant(&self, fdr: f64) -> usize {
        self.q_values.iter().filter(|&&q| q <= fdr).count()
    }

    /// Indices of results at or below an FDR threshold, sorted by q-value.
    pub fn significant_indices(&self, fdr: f64) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .q_values
            .iter()
            .enumerate()
            .filter(|(_, &q)| q <= fdr)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by(|&a, &b| self.q_values[a].total_cmp(&self.q_values[b]));
        indices
    }
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// For each p-value, the adjusted p-value (q-value) is calculated as:
/// q[i] = min(p[i] * n / rank[i], q[i+1])
pub fn correct_bh(p_values: &[f64], labels: &[String]) -> BhCorrected {
    correct_bh_total(p_values, labels, p_values.len())
}

/// BH correction where `total` tests were performed but only the given
/// p-values were kept.
///
/// The missing tests are treated as p = 1, which is how enrichment results
/// that skipped regulators without overlap are corrected.
pub fn correct_bh_total(p_values: &[f64], labels: &[String], total: usize) -> BhCorrected {
    let n_given = p_values.len();
    let n = total.max(n_given);
    if n == 0 {
        return BhCorrected {
            labels: vec![],
            p_values: vec![],
            q_values: vec![],
            n_tests: 0,
        };
    }

    let mut padded = p_values.to_vec();
    padded.resize(n, 1.0);

    // Create sorted index
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| padded[a].total_cmp(&padded[b]));

    let mut q_sorted = vec![0.0; n];
    let n_f64 = n as f64;

    // Start from largest p-value
    q_sorted[n - 1] = padded[indices[n - 1]].min(1.0);

    // Work backwards
    for i in (0..n - 1).rev() {
        let rank = i + 1;
        let adjusted = padded[indices[i]] * n_f64 / rank as f64;
        q_sorted[i] = adjusted.min(q_sorted[i + 1]).min(1.0);
    }

    // Restore original order
    let mut q_values = vec![0.0; n];
    for (i, &orig_idx) in indices.iter().enumerate() {
        q_values[orig_idx] = q_sorted[i];
    }
    q_values.truncate(n_given);

    BhCorrected {
        labels: labels.to_vec(),
        p_values: p_values.to_vec(),
        q_values,
        n_tests: n,
    }
}

/// Correct, then keep the indices with q ≤ `fdr`, ordered by q-value.
///
/// Returns `(index, q_value)` pairs referring back to the input order.
pub fn fdr_filter(p_values: &[f64], fdr: f64, total: Option<usize>) -> Vec<(usize, f64)> {
    let labels: Vec<String> = (0..p_values.len()).map(|i| i.to_string()).collect();
    let corrected = correct_bh_total(p_values, &labels, total.unwrap_or(p_values.len()));
    corrected
        .significant_indices(fdr)
        .into_iter()
        .map(|i| (i, corrected.q_values[i]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("reg_{}", i)).collect()
    }

    #[test]
    fn test_bh_basic() {
        let p_values = vec![0.01, 0.04, 0.03, 0.005];
        let corrected = correct_bh(&p_values, &labels(4));

        assert_eq!(corrected.n_tests, 4);
        assert_eq!(corrected.p_values, p_values);
        assert_eq!(corrected.get_qvalue("reg_3"), Some(corrected.q_values[3]));
    }

    #[test]
    fn test_bh_ordering() {
        // P-values in non-sorted order
        let p_values = vec![0.04, 0.01, 0.03, 0.005];
        let corrected = correct_bh(&p_values, &labels(4));

        // q = 0.005 * 4 / 1 = 0.02
        assert_relative_eq!(corrected.q_values[3], 0.02, epsilon = 1e-10);
        // q = min(0.01 * 4 / 2, q[next]) = 0.02
        assert_relative_eq!(corrected.q_values[1], 0.02, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_known_values() {
        let p_values = vec![0.005, 0.01, 0.02, 0.04, 0.1];
        let corrected = correct_bh(&p_values, &labels(5));

        assert_relative_eq!(corrected.q_values[0], 0.025, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[1], 0.025, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[2], 1.0 / 30.0, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[3], 0.05, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[4], 0.1, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_bounded() {
        let p_values = vec![0.5, 0.6, 0.7, 0.8, 0.9];
        let corrected = correct_bh(&p_values, &labels(5));
        for q in &corrected.q_values {
            assert!(*q <= 1.0);
        }
    }

    #[test]
    fn test_bh_empty() {
        let corrected = correct_bh(&[], &[]);
        assert_eq!(corrected.n_tests, 0);
        assert!(corrected.q_values.is_empty());
    }

    #[test]
    fn test_total_padding_inflates_qvalues() {
        let p_values = vec![0.001, 0.01];
        let plain = correct_bh(&p_values, &labels(2));
        let padded = correct_bh_total(&p_values, &labels(2), 10);

        assert_eq!(padded.n_tests, 10);
        assert_eq!(padded.q_values.len(), 2);
        // 0.001 * 10 / 1
        assert_relative_eq!(padded.q_values[0], 0.01, epsilon = 1e-12);
        // 0.01 * 10 / 2
        assert_relative_eq!(padded.q_values[1], 0.05, epsilon = 1e-12);
        assert!(padded.q_values[1] > plain.q_values[1]);
    }

    #[test]
    fn test_fdr_filter_sorted_by_qvalue() {
        let p_values = vec![0.04, 0.0001, 0.9, 0.001];
        let kept = fdr_filter(&p_values, 0.01, None);
        let indices: Vec<usize> = kept.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(kept[0].1 <= kept[1].1);
    }

    #[test]
    fn test_fdr_filter_inclusive() {
        // q of the single test equals the cutoff exactly
        let kept = fdr_filter(&[0.05], 0.05, None);
        assert_eq!(kept.len(), 1);
    }
}
