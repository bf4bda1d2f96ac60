//! One-sided Fisher exact test on 2×2 contingency tables.

use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_binomial;

/// Result of a Fisher exact test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FisherResult {
    /// Sample odds ratio `(a·d) / (b·c)`.
    pub odds_ratio: f64,
    /// P-value of the one-sided test.
    pub p_value: f64,
}

/// Fisher exact test with the alternative "greater".
///
/// `table` is `[[a, b], [c, d]]`. The p-value is the probability of
/// observing `a` or more under the hypergeometric null with the table's
/// margins fixed.
pub fn fisher_exact_greater(table: [[u64; 2]; 2]) -> FisherResult {
    let [[a, b], [c, d]] = table;
    let n = a + b + c + d;
    let row1 = a + b;
    let col1 = a + c;

    let odds_ratio = if b * c == 0 {
        if a * d == 0 {
            f64::NAN
        } else {
            f64::INFINITY
        }
    } else {
        (a * d) as f64 / (b * c) as f64
    };

    if n == 0 {
        return FisherResult {
            odds_ratio,
            p_value: 1.0,
        };
    }

    let x_max = row1.min(col1);
    let ln_total = ln_binomial(n, col1);
    let p_value: f64 = (a..=x_max)
        .map(|x| (ln_binomial(row1, x) + ln_binomial(n - row1, col1 - x) - ln_total).exp())
        .sum();

    FisherResult {
        odds_ratio,
        p_value: p_value.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_known_value() {
        // P(X >= 8) = (270 + 10) / C(16, 9)
        let result = fisher_exact_greater([[8, 2], [1, 5]]);
        assert_relative_eq!(result.odds_ratio, 20.0, epsilon = 1e-12);
        assert_relative_eq!(result.p_value, 280.0 / 11440.0, epsilon = 1e-10);
    }

    #[test]
    fn test_zero_overlap_is_not_significant() {
        let result = fisher_exact_greater([[0, 10], [10, 80]]);
        assert_relative_eq!(result.p_value, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_perfect_overlap() {
        // 5 of 100 genes, identical sets
        let result = fisher_exact_greater([[5, 0], [0, 95]]);
        assert!(result.odds_ratio.is_infinite());
        // 1 / C(100, 5)
        assert_relative_eq!(result.p_value, 1.0 / 75_287_520.0, max_relative = 1e-8);
    }

    #[test]
    fn test_empty_table() {
        let result = fisher_exact_greater([[0, 0], [0, 0]]);
        assert_eq!(result.p_value, 1.0);
    }
}
