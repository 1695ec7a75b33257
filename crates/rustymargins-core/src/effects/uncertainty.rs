// =============================================================================
// Uncertainty Propagation
// =============================================================================
//
// Two ways to get from Var(β̂) to the uncertainty of a derived quantity f(β):
//
// DELTA METHOD
// ------------
//     Var(f(β̂)) ≈ J V J',   J = ∂f/∂β at β̂
//
// Exact for link-scale effects (f is linear in β), first-order accurate on
// the response scale.
//
// SIMULATION
// ----------
//     β⁽ˢ⁾ = β̂ + L z⁽ˢ⁾,   z⁽ˢ⁾ ~ N(0, I),   LL' = V
//
// f is recomputed for every draw; the standard error is the SD of the draws
// and the interval is the equal-tailed percentile interval. The point
// estimate stays f(β̂). One set of draws is shared by all effects of a
// request so that estimates from the same request are simulated coherently.
//
// =============================================================================

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution as _, StandardNormal};

use crate::constants::SE_EPSILON;
use crate::convert::{covariance_cholesky, quad_form, to_array2};
use crate::effects::counterfactual::Counterfactual;
use crate::effects::Scale;
use crate::error::{Result, RustyMarginsError};
use crate::inference::{confidence_interval, percentile_interval, pvalue, sample_sd, Distribution};
use crate::links::Link;

/// Point estimate, standard error and interval of one effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Propagated {
    pub estimate: f64,
    pub std_error: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub conf_low: f64,
    pub conf_high: f64,
}

/// What the interval is built from.
#[derive(Debug, Clone, Copy)]
pub struct IntervalSettings {
    pub confidence: f64,
    pub distribution: Distribution,
    pub df: f64,
}

impl IntervalSettings {
    fn test(&self, estimate: f64, std_error: f64) -> (f64, f64) {
        if std_error < SE_EPSILON {
            return (f64::NAN, f64::NAN);
        }
        let statistic = estimate / std_error;
        (statistic, pvalue(statistic, self.distribution, self.df))
    }
}

/// Delta-method standard error and Wald interval.
pub fn delta_method(
    cf: &Counterfactual,
    beta: &Array1<f64>,
    covariance: &Array2<f64>,
    link: &dyn Link,
    scale: Scale,
    settings: &IntervalSettings,
) -> Propagated {
    let estimate = cf.value(beta, link, scale);
    let gradient = cf.gradient(beta, link, scale);
    let std_error = quad_form(gradient.view(), covariance).max(0.0).sqrt();
    let (statistic, p_value) = settings.test(estimate, std_error);
    let (conf_low, conf_high) = confidence_interval(
        estimate,
        std_error,
        settings.distribution,
        settings.df,
        settings.confidence,
    );
    Propagated {
        estimate,
        std_error,
        statistic,
        p_value,
        conf_low,
        conf_high,
    }
}

/// Coefficient draws from N(β̂, V), one per row.
#[derive(Debug, Clone)]
pub struct CoefficientDraws {
    draws: Array2<f64>,
}

impl CoefficientDraws {
    /// # Arguments
    /// * `beta` - Point estimate β̂
    /// * `covariance` - Var(β̂)
    /// * `n_draws` - Number of draws (at least 2)
    /// * `seed` - RNG seed; the same seed gives the same draws
    pub fn new(beta: &Array1<f64>, covariance: &Array2<f64>, n_draws: usize, seed: u64) -> Result<Self> {
        if n_draws < 2 {
            return Err(RustyMarginsError::InvalidValue(format!(
                "simulation needs at least 2 draws, got {}",
                n_draws
            )));
        }
        let p = beta.len();
        if covariance.dim() != (p, p) {
            return Err(RustyMarginsError::DimensionMismatch(format!(
                "covariance is {:?} for {} coefficients",
                covariance.dim(),
                p
            )));
        }
        let l = to_array2(&covariance_cholesky(covariance)?);

        let mut rng = StdRng::seed_from_u64(seed);
        let z: Array2<f64> = Array2::from_shape_simple_fn((n_draws, p), || StandardNormal.sample(&mut rng));
        // Row s is β̂ + L z_s
        let draws = z.dot(&l.t()) + beta;
        log::debug!("drew {} coefficient vectors (seed {})", n_draws, seed);
        Ok(Self { draws })
    }

    pub fn n_draws(&self) -> usize {
        self.draws.nrows()
    }

    pub fn draws(&self) -> &Array2<f64> {
        &self.draws
    }

    /// Simulation standard error and percentile interval of one effect.
    pub fn propagate(
        &self,
        cf: &Counterfactual,
        beta: &Array1<f64>,
        link: &dyn Link,
        scale: Scale,
        settings: &IntervalSettings,
    ) -> Propagated {
        let estimate = cf.value(beta, link, scale);
        let values: Vec<f64> = self
            .draws
            .rows()
            .into_iter()
            .map(|b| cf.value(&b.to_owned(), link, scale))
            .collect();
        let std_error = sample_sd(&values);
        let (statistic, p_value) = settings.test(estimate, std_error);
        let (conf_low, conf_high) = percentile_interval(&values, settings.confidence);
        Propagated {
            estimate,
            std_error,
            statistic,
            p_value,
            conf_low,
            conf_high,
        }
    }
}
