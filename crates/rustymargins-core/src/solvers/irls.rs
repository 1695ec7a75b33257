// =============================================================================
// IRLS: Iteratively Reweighted Least Squares
// =============================================================================
//
// This is the workhorse behind every fixed-effects fit in the crate: linear
// models (one iteration), GLMs, and the inner loop of additive models.
//
// THE BIG PICTURE
// ---------------
//     Start with initial guess μ⁰
//     Repeat:
//         1. Compute "working weights" W from the variance and the link
//         2. Compute "working response" z (linearised response)
//         3. Solve penalised weighted least squares: (X'WX + S)β = X'Wz
//         4. Update η = Xβ and μ = g⁻¹(η)
//         5. Stop when the deviance stops changing
//
// S is the block-diagonal smoothing penalty of an additive model, or zero.
//
// THE WORKING RESPONSE
// --------------------
//     z = η + (y - μ) × g'(μ)
//
// For the Gaussian family with identity link, W = I and z = y, so the first
// iteration is already the least-squares solution.
//
// WHAT EFFECTS NEED FROM HERE
// ---------------------------
// The unscaled covariance (X'WX + S)⁻¹. Multiplied by the dispersion φ it is
// Var(β̂), the matrix every delta-method standard error is built from.
//
// =============================================================================

use nalgebra::DVector;
use ndarray::{Array1, Array2};

use crate::constants::MAX_IRLS_WEIGHT;
use crate::convert::{solve_and_invert, to_array1, to_array2, to_dmatrix};
use crate::error::{Result, RustyMarginsError};
use crate::families::Family;
use crate::links::Link;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration options for the IRLS algorithm.
#[derive(Debug, Clone)]
pub struct IRLSConfig {
    /// Maximum number of iterations before giving up.
    /// Default: 25 (usually converges much faster)
    pub max_iterations: usize,

    /// Convergence tolerance on the relative change in deviance.
    /// Default: 1e-8
    pub tolerance: f64,

    /// Minimum value for weights to avoid numerical issues.
    /// Default: 1e-10
    pub min_weight: f64,

    /// Log every iteration at `info` instead of `debug`.
    /// Default: false
    pub verbose: bool,
}

impl Default for IRLSConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tolerance: 1e-8,
            min_weight: 1e-10,
            verbose: false,
        }
    }
}

// =============================================================================
// Result Structure
// =============================================================================

/// Results from fitting by (penalised) IRLS.
#[derive(Debug, Clone)]
pub struct IRLSResult {
    /// The fitted coefficients β
    pub coefficients: Array1<f64>,

    /// Fitted values μ = g⁻¹(Xβ)
    pub fitted_values: Array1<f64>,

    /// Linear predictor η = Xβ
    pub linear_predictor: Array1<f64>,

    /// Final deviance
    pub deviance: f64,

    /// Number of iterations until convergence
    pub iterations: usize,

    /// Did the algorithm converge?
    pub converged: bool,

    /// (X'WX + S)⁻¹; Var(β̂) = φ × covariance_unscaled
    pub covariance_unscaled: Array2<f64>,

    /// Final IRLS weights (without prior weights)
    pub irls_weights: Array1<f64>,

    /// Prior weights used in the fit
    pub prior_weights: Array1<f64>,

    /// Effective degrees of freedom tr((X'WX + S)⁻¹ X'WX); equals p unpenalised
    pub edf: f64,
}

// =============================================================================
// Main Fitting Functions
// =============================================================================

/// Fit a GLM by IRLS with no prior weights and no penalty.
pub fn fit_glm(
    y: &Array1<f64>,
    x: &Array2<f64>,
    family: &dyn Family,
    link: &dyn Link,
    config: &IRLSConfig,
) -> Result<IRLSResult> {
    fit_glm_full(y, x, family, link, config, None, None)
}

/// Fit a GLM by penalised IRLS.
///
/// # Arguments
/// * `y` - Response variable (n)
/// * `x` - Model matrix (n × p), including the intercept column if wanted
/// * `family` / `link` - Response distribution and link function
/// * `config` - Algorithm configuration
/// * `weights` - Optional non-negative prior weights (n)
/// * `penalty` - Optional penalty matrix S (p × p), already scaled by λ
pub fn fit_glm_full(
    y: &Array1<f64>,
    x: &Array2<f64>,
    family: &dyn Family,
    link: &dyn Link,
    config: &IRLSConfig,
    weights: Option<&Array1<f64>>,
    penalty: Option<&Array2<f64>>,
) -> Result<IRLSResult> {
    // -------------------------------------------------------------------------
    // Step 0: Validate inputs
    // -------------------------------------------------------------------------
    let n = y.len();
    let p = x.ncols();
    validate_inputs(y, x, weights, penalty)?;

    let prior_weights = weights.cloned().unwrap_or_else(|| Array1::ones(n));

    // -------------------------------------------------------------------------
    // Step 1: Initialise μ and η
    // -------------------------------------------------------------------------
    let mut mu = family.initialize_mu(y);
    if !family.is_valid_mu(&mu) {
        mu = family.clamp_mu(&mu);
    }
    let mut eta = link.link(&mu);
    let mut deviance = family.deviance(y, &mu, Some(&prior_weights));

    // -------------------------------------------------------------------------
    // Step 2: Iterate
    // -------------------------------------------------------------------------
    let mut converged = false;
    let mut iteration = 0;
    let mut coefficients = Array1::zeros(p);
    let mut cov_unscaled = Array2::zeros((p, p));
    let mut irls_weights = Array1::ones(n);
    let mut xtwx = Array2::zeros((p, p));

    while iteration < config.max_iterations {
        iteration += 1;

        // Working weights: w = 1 / (V(μ) g'(μ)²), clipped
        let variance = family.variance(&mu);
        let link_deriv = link.derivative(&mu);
        irls_weights = variance
            .iter()
            .zip(link_deriv.iter())
            .map(|(&v, &d)| (1.0 / (v * d * d)).clamp(config.min_weight, MAX_IRLS_WEIGHT))
            .collect();
        let combined: Array1<f64> = &prior_weights * &irls_weights;

        // Working response: z = η + (y - μ) g'(μ)
        let z = compute_working_response(y, &mu, &eta, link);

        let solved = solve_penalized_wls(x, &z, &combined, penalty)?;
        coefficients = solved.coefficients;
        cov_unscaled = solved.inverse;
        xtwx = solved.xtwx;

        eta = x.dot(&coefficients);
        mu = family.clamp_mu(&link.inverse(&eta));

        let deviance_old = deviance;
        deviance = family.deviance(y, &mu, Some(&prior_weights));
        let rel_change = (deviance_old - deviance).abs() / deviance_old.abs().max(1e-10);

        if config.verbose {
            log::info!(
                "IRLS iteration {}: deviance = {:.6}, rel_change = {:.2e}",
                iteration,
                deviance,
                rel_change
            );
        } else {
            log::debug!(
                "IRLS iteration {}: deviance = {:.6}, rel_change = {:.2e}",
                iteration,
                deviance,
                rel_change
            );
        }

        if rel_change < config.tolerance || deviance.abs() < 1e-12 {
            converged = true;
            break;
        }
    }

    if !converged {
        log::warn!(
            "IRLS did not converge in {} iterations (deviance = {:.6})",
            config.max_iterations,
            deviance
        );
    }

    let edf = trace_of_product(&cov_unscaled, &xtwx);

    Ok(IRLSResult {
        coefficients,
        fitted_values: mu,
        linear_predictor: eta,
        deviance,
        iterations: iteration,
        converged,
        covariance_unscaled: cov_unscaled,
        irls_weights,
        prior_weights,
        edf,
    })
}

fn validate_inputs(
    y: &Array1<f64>,
    x: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    penalty: Option<&Array2<f64>>,
) -> Result<()> {
    let n = y.len();
    let p = x.ncols();
    if x.nrows() != n {
        return Err(RustyMarginsError::DimensionMismatch(format!(
            "X has {} rows but y has {} elements",
            x.nrows(),
            n
        )));
    }
    if n == 0 {
        return Err(RustyMarginsError::EmptyInput("y is empty".to_string()));
    }
    if p == 0 {
        return Err(RustyMarginsError::EmptyInput("X has no columns".to_string()));
    }
    if let Some(w) = weights {
        if w.len() != n {
            return Err(RustyMarginsError::DimensionMismatch(format!(
                "weights has {} elements but y has {}",
                w.len(),
                n
            )));
        }
        if w.iter().any(|&wi| wi < 0.0 || !wi.is_finite()) {
            return Err(RustyMarginsError::InvalidValue(
                "weights must be finite and non-negative".to_string(),
            ));
        }
    }
    if let Some(s) = penalty {
        if s.nrows() != p || s.ncols() != p {
            return Err(RustyMarginsError::DimensionMismatch(format!(
                "penalty is {}x{} but X has {} columns",
                s.nrows(),
                s.ncols(),
                p
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Output of one penalised weighted least-squares solve.
#[derive(Debug, Clone)]
pub struct PenalizedSolve {
    pub coefficients: Array1<f64>,
    /// (X'WX + S)⁻¹
    pub inverse: Array2<f64>,
    /// X'WX (without the penalty)
    pub xtwx: Array2<f64>,
}

/// Minimise Σ w_i (z_i - x_i'β)² + β'Sβ.
pub fn solve_penalized_wls(
    x: &Array2<f64>,
    z: &Array1<f64>,
    w: &Array1<f64>,
    penalty: Option<&Array2<f64>>,
) -> Result<PenalizedSolve> {
    let xtwx = compute_xtwx(x, w);
    let xtwz: Array1<f64> = x.t().dot(&(w * z));

    let mut lhs = to_dmatrix(&xtwx);
    if let Some(s) = penalty {
        lhs += to_dmatrix(s);
    }
    let rhs = DVector::from_iterator(xtwz.len(), xtwz.iter().copied());

    let (solution, inverse) = solve_and_invert(&lhs, &rhs).map_err(|_| {
        RustyMarginsError::LinearAlgebraError(
            "failed to solve weighted least squares - matrix may be singular. \
             This often indicates collinear predictors or an empty factor level."
                .to_string(),
        )
    })?;

    Ok(PenalizedSolve {
        coefficients: to_array1(&solution),
        inverse: to_array2(&inverse),
        xtwx,
    })
}

/// X'WX for a diagonal weight vector.
pub fn compute_xtwx(x: &Array2<f64>, w: &Array1<f64>) -> Array2<f64> {
    let weighted = x * &w.view().insert_axis(ndarray::Axis(1));
    x.t().dot(&weighted)
}

/// tr(A B) without forming the product.
pub(crate) fn trace_of_product(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    let n = a.nrows();
    (0..n).map(|i| a.row(i).dot(&b.column(i))).sum()
}

/// Compute working response: z = η + (y - μ) × g'(μ)
fn compute_working_response(
    y: &Array1<f64>,
    mu: &Array1<f64>,
    eta: &Array1<f64>,
    link: &dyn Link,
) -> Array1<f64> {
    let link_deriv = link.derivative(mu);
    eta.iter()
        .zip(y.iter())
        .zip(mu.iter())
        .zip(link_deriv.iter())
        .map(|(((&e, &yi), &mui), &d)| e + (yi - mui) * d)
        .collect()
}

/// Working weights and response at the current μ, for the smoothing loop.
pub(crate) fn working_quantities(
    y: &Array1<f64>,
    mu: &Array1<f64>,
    eta: &Array1<f64>,
    family: &dyn Family,
    link: &dyn Link,
    config: &IRLSConfig,
) -> (Array1<f64>, Array1<f64>) {
    let variance = family.variance(mu);
    let link_deriv = link.derivative(mu);
    let w: Array1<f64> = variance
        .iter()
        .zip(link_deriv.iter())
        .map(|(&v, &d)| (1.0 / (v * d * d)).clamp(config.min_weight, MAX_IRLS_WEIGHT))
        .collect();
    (w, compute_working_response(y, mu, eta, link))
}

// =============================================================================
// Tests
// =============================================================================
