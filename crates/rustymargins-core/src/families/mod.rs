// =============================================================================
// Distribution Families
// =============================================================================
//
// A family describes how the response varies around its mean:
//
//     Var(Y) = φ × V(μ)
//
//   Family     V(μ)        φ            default link
//   --------   ---------   ----------   ------------
//   Gaussian   1           estimated    identity
//   Poisson    μ           1            log
//   Binomial   μ(1 - μ)    1            logit
//
// The lesson's models (linear, additive, interaction, mixed) are all
// Gaussian; Poisson and Binomial are here so that effects on the response
// scale (through a non-identity link) are exercised too.
//
// =============================================================================

use ndarray::Array1;

use crate::constants::{MU_MAX_PROBABILITY, MU_MIN_POSITIVE, MU_MIN_PROBABILITY};
use crate::links::{IdentityLink, Link, LogLink, LogitLink};

/// A response distribution from the exponential family.
pub trait Family: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Variance function V(μ).
    fn variance(&self, mu: &Array1<f64>) -> Array1<f64>;

    /// Unit deviance summed over observations, with optional prior weights.
    fn deviance(&self, y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64;

    /// Starting values for IRLS.
    fn initialize_mu(&self, y: &Array1<f64>) -> Array1<f64>;

    /// Clamp μ into the family's valid range.
    fn clamp_mu(&self, mu: &Array1<f64>) -> Array1<f64>;

    fn is_valid_mu(&self, mu: &Array1<f64>) -> bool {
        mu.iter().all(|m| m.is_finite())
    }

    /// True when φ is fixed at 1 (Poisson, Binomial).
    fn fixed_dispersion(&self) -> bool;

    fn default_link(&self) -> Box<dyn Link>;
}

fn weighted_sum(values: impl Iterator<Item = f64>, weights: Option<&Array1<f64>>) -> f64 {
    match weights {
        Some(w) => values.zip(w.iter()).map(|(v, &wi)| v * wi).sum(),
        None => values.sum(),
    }
}

/// Gaussian (normal) family.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianFamily;

impl Family for GaussianFamily {
    fn name(&self) -> &'static str {
        "Gaussian"
    }

    fn variance(&self, mu: &Array1<f64>) -> Array1<f64> {
        Array1::ones(mu.len())
    }

    fn deviance(&self, y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
        weighted_sum(y.iter().zip(mu.iter()).map(|(&yi, &mi)| (yi - mi).powi(2)), weights)
    }

    fn initialize_mu(&self, y: &Array1<f64>) -> Array1<f64> {
        y.clone()
    }

    fn clamp_mu(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.clone()
    }

    fn fixed_dispersion(&self) -> bool {
        false
    }

    fn default_link(&self) -> Box<dyn Link> {
        Box::new(IdentityLink)
    }
}

/// Poisson family for counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoissonFamily;

impl Family for PoissonFamily {
    fn name(&self) -> &'static str {
        "Poisson"
    }

    fn variance(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| m.max(MU_MIN_POSITIVE))
    }

    fn deviance(&self, y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
        let unit = y.iter().zip(mu.iter()).map(|(&yi, &mi)| {
            let mi = mi.max(MU_MIN_POSITIVE);
            let term = if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
            2.0 * (term - (yi - mi))
        });
        weighted_sum(unit, weights)
    }

    fn initialize_mu(&self, y: &Array1<f64>) -> Array1<f64> {
        let mean = y.mean().unwrap_or(1.0).max(0.1);
        y.mapv(|yi| (yi + mean) / 2.0)
    }

    fn clamp_mu(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| m.max(MU_MIN_POSITIVE))
    }

    fn is_valid_mu(&self, mu: &Array1<f64>) -> bool {
        mu.iter().all(|&m| m.is_finite() && m > 0.0)
    }

    fn fixed_dispersion(&self) -> bool {
        true
    }

    fn default_link(&self) -> Box<dyn Link> {
        Box::new(LogLink)
    }
}

/// Binomial family for 0/1 outcomes (or proportions with weights).
#[derive(Debug, Clone, Copy, Default)]
pub struct BinomialFamily;

impl Family for BinomialFamily {
    fn name(&self) -> &'static str {
        "Binomial"
    }

    fn variance(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| {
            let m = m.clamp(MU_MIN_PROBABILITY, MU_MAX_PROBABILITY);
            m * (1.0 - m)
        })
    }

    fn deviance(&self, y: &Array1<f64>, mu: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
        let unit = y.iter().zip(mu.iter()).map(|(&yi, &mi)| {
            let mi = mi.clamp(MU_MIN_PROBABILITY, MU_MAX_PROBABILITY);
            let a = if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
            let b = if yi < 1.0 {
                (1.0 - yi) * ((1.0 - yi) / (1.0 - mi)).ln()
            } else {
                0.0
            };
            2.0 * (a + b)
        });
        weighted_sum(unit, weights)
    }

    fn initialize_mu(&self, y: &Array1<f64>) -> Array1<f64> {
        y.mapv(|yi| (yi + 0.5) / 2.0)
    }

    fn clamp_mu(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| m.clamp(MU_MIN_PROBABILITY, MU_MAX_PROBABILITY))
    }

    fn is_valid_mu(&self, mu: &Array1<f64>) -> bool {
        mu.iter().all(|&m| m.is_finite() && m > 0.0 && m < 1.0)
    }

    fn fixed_dispersion(&self) -> bool {
        true
    }

    fn default_link(&self) -> Box<dyn Link> {
        Box::new(LogitLink)
    }
}

/// Look up a family by name (case-insensitive).
pub fn family_from_name(name: &str) -> Option<Box<dyn Family>> {
    match name.to_ascii_lowercase().as_str() {
        "gaussian" | "normal" => Some(Box::new(GaussianFamily)),
        "poisson" => Some(Box::new(PoissonFamily)),
        "binomial" => Some(Box::new(BinomialFamily)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_gaussian_deviance_is_rss() {
        let y = array![1.0, 2.0, 3.0];
        let mu = array![1.5, 2.0, 2.0];
        assert_abs_diff_eq!(GaussianFamily.deviance(&y, &mu, None), 1.25, epsilon = 1e-12);
        let w = array![2.0, 1.0, 1.0];
        assert_abs_diff_eq!(GaussianFamily.deviance(&y, &mu, Some(&w)), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_poisson_deviance_zero_at_saturation() {
        let y = array![0.0, 3.0, 7.0];
        assert_abs_diff_eq!(PoissonFamily.deviance(&y, &y, None), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_binomial_variance_and_validity() {
        let mu = array![0.5, 0.1];
        let v = BinomialFamily.variance(&mu);
        assert_abs_diff_eq!(v[0], 0.25, epsilon = 1e-12);
        assert!(BinomialFamily.is_valid_mu(&mu));
        assert!(!BinomialFamily.is_valid_mu(&array![1.0]));
    }

    #[test]
    fn test_default_links() {
        assert_eq!(GaussianFamily.default_link().name(), "identity");
        assert_eq!(PoissonFamily.default_link().name(), "log");
        assert_eq!(family_from_name("binomial").unwrap().default_link().name(), "logit");
    }
}
