// =============================================================================
// Link Functions
// =============================================================================
//
// The link g connects the mean of the response to the linear predictor:
//
//     g(μ) = η = Xβ
//
// Effects can be reported on either side of the link. On the link scale a
// linear model's slope is just a coefficient; on the response scale the slope
// of μ = g⁻¹(η) picks up the factor dμ/dη, which varies from row to row.
//
// Each link provides:
//   - link(μ)               η = g(μ)
//   - inverse(η)            μ = g⁻¹(η)
//   - derivative(μ)         dη/dμ = g'(μ)     (IRLS weights)
//   - inverse_derivative(η) dμ/dη             (delta method on response scale)
//
// =============================================================================

use ndarray::Array1;

use crate::constants::{MU_MAX_PROBABILITY, MU_MIN_POSITIVE, MU_MIN_PROBABILITY};

/// A link function g with its inverse and derivatives.
pub trait Link: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// η = g(μ) for a single value.
    fn link_scalar(&self, mu: f64) -> f64;

    /// μ = g⁻¹(η) for a single value.
    fn inverse_scalar(&self, eta: f64) -> f64;

    /// dη/dμ at μ.
    fn derivative_scalar(&self, mu: f64) -> f64;

    /// dμ/dη at η.
    fn inverse_derivative_scalar(&self, eta: f64) -> f64;

    fn link(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| self.link_scalar(m))
    }

    fn inverse(&self, eta: &Array1<f64>) -> Array1<f64> {
        eta.mapv(|e| self.inverse_scalar(e))
    }

    fn derivative(&self, mu: &Array1<f64>) -> Array1<f64> {
        mu.mapv(|m| self.derivative_scalar(m))
    }

    fn inverse_derivative(&self, eta: &Array1<f64>) -> Array1<f64> {
        eta.mapv(|e| self.inverse_derivative_scalar(e))
    }
}

/// Identity link: η = μ. Default for the Gaussian family.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityLink;

impl Link for IdentityLink {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn link_scalar(&self, mu: f64) -> f64 {
        mu
    }

    fn inverse_scalar(&self, eta: f64) -> f64 {
        eta
    }

    fn derivative_scalar(&self, _mu: f64) -> f64 {
        1.0
    }

    fn inverse_derivative_scalar(&self, _eta: f64) -> f64 {
        1.0
    }
}

/// Log link: η = log(μ). Default for Poisson.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLink;

impl Link for LogLink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn link_scalar(&self, mu: f64) -> f64 {
        mu.max(MU_MIN_POSITIVE).ln()
    }

    fn inverse_scalar(&self, eta: f64) -> f64 {
        // Cap to avoid overflow on wild linear predictors
        eta.min(700.0).exp()
    }

    fn derivative_scalar(&self, mu: f64) -> f64 {
        1.0 / mu.max(MU_MIN_POSITIVE)
    }

    fn inverse_derivative_scalar(&self, eta: f64) -> f64 {
        eta.min(700.0).exp()
    }
}

/// Logit link: η = log(μ / (1 - μ)). Default for Binomial.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogitLink;

impl Link for LogitLink {
    fn name(&self) -> &'static str {
        "logit"
    }

    fn link_scalar(&self, mu: f64) -> f64 {
        let m = mu.clamp(MU_MIN_PROBABILITY, MU_MAX_PROBABILITY);
        (m / (1.0 - m)).ln()
    }

    fn inverse_scalar(&self, eta: f64) -> f64 {
        if eta >= 0.0 {
            1.0 / (1.0 + (-eta).exp())
        } else {
            let e = eta.exp();
            e / (1.0 + e)
        }
    }

    fn derivative_scalar(&self, mu: f64) -> f64 {
        let m = mu.clamp(MU_MIN_PROBABILITY, MU_MAX_PROBABILITY);
        1.0 / (m * (1.0 - m))
    }

    fn inverse_derivative_scalar(&self, eta: f64) -> f64 {
        let p = self.inverse_scalar(eta);
        p * (1.0 - p)
    }
}

/// Look up a link by its R/statsmodels name.
pub fn link_from_name(name: &str) -> Option<Box<dyn Link>> {
    match name.to_ascii_lowercase().as_str() {
        "identity" => Some(Box::new(IdentityLink)),
        "log" => Some(Box::new(LogLink)),
        "logit" => Some(Box::new(LogitLink)),
        _ => None,
    }
}
