// =============================================================================
// Statistical Inference
// =============================================================================
//
// Turns an estimate and its standard error into a test statistic, a p-value
// and a confidence interval. Every effect, prediction and coefficient row in
// the crate goes through here.
//
// WHICH REFERENCE DISTRIBUTION?
// -----------------------------
//   - Normal:      z-statistics. The default, and what marginal-effects
//                  software conventionally reports.
//   - Student's t: t-statistics on the model's residual degrees of freedom.
//                  Matters for small samples with an estimated dispersion.
//
// Simulation-based intervals skip both and use percentiles of the draws.
//
// IMPORTANT CAVEATS:
// - Statistical significance ≠ practical significance
// - With large samples, tiny effects become "significant"
//
// =============================================================================

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Reference distribution for test statistics and interval half-widths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    /// Standard normal (z)
    Normal,
    /// Student's t with the model's residual degrees of freedom
    StudentT,
}

impl Default for Distribution {
    fn default() -> Self {
        Distribution::Normal
    }
}

fn standard_normal() -> Option<Normal> {
    Normal::new(0.0, 1.0).ok()
}

// =============================================================================
// P-Value Calculation
// =============================================================================

/// Calculate two-tailed p-value from a z-statistic.
///
/// # Arguments
/// * `z` - The z-statistic (estimate / standard_error)
pub fn pvalue_z(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    match standard_normal() {
        // P(|Z| > |z|) = 2 * (1 - Φ(|z|))
        Some(normal) => 2.0 * (1.0 - normal.cdf(z.abs())),
        None => f64::NAN,
    }
}

/// Calculate two-tailed p-value from a t-statistic.
///
/// # Arguments
/// * `t` - The t-statistic (estimate / standard_error)
/// * `df` - Degrees of freedom (n - p, or n - edf for additive models)
pub fn pvalue_t(t: f64, df: f64) -> f64 {
    if !t.is_finite() || !(df > 0.0) {
        return f64::NAN;
    }
    // Normal approximation for very large df
    if df > 1000.0 {
        return pvalue_z(t);
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t_dist) => 2.0 * (1.0 - t_dist.cdf(t.abs())),
        Err(_) => f64::NAN,
    }
}

/// Two-tailed p-value under `distribution`.
pub fn pvalue(statistic: f64, distribution: Distribution, df: f64) -> f64 {
    match distribution {
        Distribution::Normal => pvalue_z(statistic),
        Distribution::StudentT => pvalue_t(statistic, df),
    }
}

// =============================================================================
// Confidence Intervals
// =============================================================================

/// Two-sided critical value: z_{1-α/2} or t_{df, 1-α/2}.
///
/// NaN for a confidence level outside (0, 1) or non-positive df under t.
pub fn critical_value(distribution: Distribution, df: f64, confidence: f64) -> f64 {
    if !(confidence > 0.0 && confidence < 1.0) {
        return f64::NAN;
    }
    let upper = 1.0 - (1.0 - confidence) / 2.0;
    match distribution {
        Distribution::StudentT if df.is_finite() && df <= 1000.0 => {
            if !(df > 0.0) {
                return f64::NAN;
            }
            match StudentsT::new(0.0, 1.0, df) {
                Ok(t_dist) => t_dist.inverse_cdf(upper),
                Err(_) => f64::NAN,
            }
        }
        _ => standard_normal().map_or(f64::NAN, |normal| normal.inverse_cdf(upper)),
    }
}

/// Calculate confidence interval using z-distribution.
///
/// # Arguments
/// * `estimate` - Point estimate
/// * `std_error` - Standard error of the estimate
/// * `confidence` - Confidence level (e.g., 0.95 for 95% CI)
pub fn confidence_interval_z(estimate: f64, std_error: f64, confidence: f64) -> (f64, f64) {
    confidence_interval(estimate, std_error, Distribution::Normal, f64::INFINITY, confidence)
}

/// Calculate confidence interval using t-distribution.
pub fn confidence_interval_t(estimate: f64, std_error: f64, df: f64, confidence: f64) -> (f64, f64) {
    confidence_interval(estimate, std_error, Distribution::StudentT, df, confidence)
}

/// estimate ± critical × std_error.
///
/// A zero standard error gives a degenerate interval at the estimate.
pub fn confidence_interval(
    estimate: f64,
    std_error: f64,
    distribution: Distribution,
    df: f64,
    confidence: f64,
) -> (f64, f64) {
    if !estimate.is_finite() || !std_error.is_finite() || std_error < 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let margin = critical_value(distribution, df, confidence) * std_error;
    (estimate - margin, estimate + margin)
}

// =============================================================================
// Simulation Summaries
// =============================================================================

/// Sample standard deviation (n - 1 denominator).
pub fn sample_sd(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Linear-interpolated quantile of already sorted values (type 7).
fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * prob;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Equal-tailed percentile interval of simulation draws.
pub fn percentile_interval(draws: &[f64], confidence: f64) -> (f64, f64) {
    let mut sorted: Vec<f64> = draws.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() || !(confidence > 0.0 && confidence < 1.0) {
        return (f64::NAN, f64::NAN);
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let alpha = 1.0 - confidence;
    (
        quantile_sorted(&sorted, alpha / 2.0),
        quantile_sorted(&sorted, 1.0 - alpha / 2.0),
    )
}

// =============================================================================
// Significance Stars (for summary tables)
// =============================================================================

/// Get significance stars for a p-value.
///
/// - "***" : p < 0.001
/// - "**"  : p < 0.01
/// - "*"   : p < 0.05
/// - "."   : p < 0.1
/// - ""    : p >= 0.1
pub fn significance_stars(pvalue: f64) -> &'static str {
    if pvalue < 0.001 {
        "***"
    } else if pvalue < 0.01 {
        "**"
    } else if pvalue < 0.05 {
        "*"
    } else if pvalue < 0.1 {
        "."
    } else {
        ""
    }
}

// =============================================================================
// Tests
// =============================================================================
