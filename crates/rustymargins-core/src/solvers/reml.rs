// =============================================================================
// REML for Linear Mixed Models with One Grouping Factor
// =============================================================================
//
// THE MODEL
// ---------
//     y = Xβ + Zb + ε,    b_g ~ N(0, σ² ΛΛ'),    ε ~ N(0, σ² I)
//
// One grouping factor with G levels. Each group g owns q random coefficients
// (an intercept and/or slopes), so Z is block-diagonal by group and
// Var(y) = σ² V with V = I + Z(I_G ⊗ ΛΛ')Z'.
//
// Λ is a q × q lower-triangular factor of the *relative* covariance. Its
// non-zero entries are the parameter vector θ, column by column:
//
//     q = 1:  θ = [λ00]
//     q = 2:  θ = [λ00, λ10, λ11]
//
// Diagonal entries live on [0, upper]; zero means a degenerate (boundary)
// variance component, which is allowed.
//
// PROFILING
// ---------
// For fixed θ, β̂ and σ̂² have closed forms, so REML reduces to minimising a
// function of θ alone:
//
//     d(θ) = (n - p) log σ̂² + log|V| + log|X'V⁻¹X| + (n - p)(1 + log 2π)
//
// WHY NEVER FORM V
// ----------------
// V is n × n. Woodbury and the determinant lemma reduce everything to q × q
// blocks per group, with M_g = I + Λ'Z_g'Z_gΛ:
//
//     log|V|   = Σ_g log|M_g|
//     X'V⁻¹X   = X'X - Σ_g (Λ'Z_g'X_g)' M_g⁻¹ (Λ'Z_g'X_g)
//
// and the same pattern for X'V⁻¹y and y'V⁻¹y. The per-group cross products
// are computed once.
//
// θ is found by coordinate-wise Brent sweeps, the same minimiser that picks
// smoothing parameters for additive models.
//
// =============================================================================

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

use crate::convert::{log_det_spd, to_array1, to_array2};
use crate::error::{Result, RustyMarginsError};
use crate::solvers::gcv_optimizer::brent_minimize;

/// Configuration for the REML search.
#[derive(Debug, Clone)]
pub struct RemlConfig {
    /// Maximum coordinate sweeps over θ.
    /// Default: 200
    pub max_sweeps: usize,

    /// Convergence tolerance on the relative change in the criterion.
    /// Default: 1e-9
    pub tolerance: f64,

    /// Upper bound on each |θ_i| (relative standard deviation scale).
    /// Default: 100.0
    pub theta_upper: f64,

    /// Log every sweep at `info` instead of `debug`.
    pub verbose: bool,
}

impl Default for RemlConfig {
    fn default() -> Self {
        Self {
            max_sweeps: 200,
            tolerance: 1e-9,
            theta_upper: 100.0,
            verbose: false,
        }
    }
}

/// Result of a REML fit.
#[derive(Debug, Clone)]
pub struct LmmFit {
    /// Fixed-effect estimates β̂
    pub coefficients: Array1<f64>,

    /// Var(β̂) = σ̂² (X'V⁻¹X)⁻¹
    pub covariance: Array2<f64>,

    /// Residual variance σ̂²
    pub sigma2: f64,

    /// Covariance of the random coefficients, σ̂² ΛΛ' (q × q)
    pub random_covariance: Array2<f64>,

    /// Conditional modes of the random effects (G × q)
    pub blups: Array2<f64>,

    /// Relative covariance factor parameters
    pub theta: Vec<f64>,

    /// Minimised REML criterion (-2 × restricted log-likelihood)
    pub reml_criterion: f64,

    /// Coordinate sweeps used
    pub sweeps: usize,
}

/// Per-group cross products, fixed for the whole search.
struct GroupBlock {
    ztz: DMatrix<f64>,
    ztx: DMatrix<f64>,
    zty: DVector<f64>,
}

struct Profiled {
    criterion: f64,
    beta: DVector<f64>,
    xtvx_inverse: DMatrix<f64>,
    sigma2: f64,
}

/// Cached data for evaluating the profiled REML criterion.
struct RemlProblem {
    xtx: DMatrix<f64>,
    xty: DVector<f64>,
    yty: f64,
    blocks: Vec<GroupBlock>,
    n: usize,
    p: usize,
    q: usize,
}

impl RemlProblem {
    fn new(
        y: &Array1<f64>,
        x: &Array2<f64>,
        z: &Array2<f64>,
        groups: &[usize],
        n_groups: usize,
    ) -> Self {
        let (n, p) = x.dim();
        let q = z.ncols();
        let mut blocks: Vec<GroupBlock> = (0..n_groups)
            .map(|_| GroupBlock {
                ztz: DMatrix::zeros(q, q),
                ztx: DMatrix::zeros(q, p),
                zty: DVector::zeros(q),
            })
            .collect();
        let mut xtx = DMatrix::zeros(p, p);
        let mut xty = DVector::zeros(p);
        let mut yty = 0.0;

        for i in 0..n {
            let xi = x.row(i);
            let zi = z.row(i);
            let yi = y[i];
            let block = &mut blocks[groups[i]];
            for a in 0..p {
                xty[a] += xi[a] * yi;
                for b in 0..p {
                    xtx[(a, b)] += xi[a] * xi[b];
                }
            }
            for a in 0..q {
                block.zty[a] += zi[a] * yi;
                for b in 0..q {
                    block.ztz[(a, b)] += zi[a] * zi[b];
                }
                for b in 0..p {
                    block.ztx[(a, b)] += zi[a] * xi[b];
                }
            }
            yty += yi * yi;
        }

        Self {
            xtx,
            xty,
            yty,
            blocks,
            n,
            p,
            q,
        }
    }

    /// Λ from θ, filling the lower triangle column by column.
    fn lambda(&self, theta: &[f64]) -> DMatrix<f64> {
        let mut lambda = DMatrix::zeros(self.q, self.q);
        let mut k = 0;
        for j in 0..self.q {
            for i in j..self.q {
                lambda[(i, j)] = theta[k];
                k += 1;
            }
        }
        lambda
    }

    fn profile(&self, theta: &[f64]) -> Option<Profiled> {
        let lambda = self.lambda(theta);
        let identity = DMatrix::<f64>::identity(self.q, self.q);

        let mut xtvx = self.xtx.clone();
        let mut xtvy = self.xty.clone();
        let mut ytvy = self.yty;
        let mut log_det_v = 0.0;

        for block in &self.blocks {
            let m = &identity + lambda.transpose() * &block.ztz * &lambda;
            let chol = m.cholesky()?;
            log_det_v += 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();

            let a = lambda.transpose() * &block.ztx;
            let c = lambda.transpose() * &block.zty;
            let m_inv_a = chol.solve(&a);
            let m_inv_c = chol.solve(&c);
            xtvx -= a.transpose() * &m_inv_a;
            xtvy -= a.transpose() * &m_inv_c;
            ytvy -= c.dot(&m_inv_c);
        }

        let chol_x = xtvx.clone().cholesky()?;
        let beta = chol_x.solve(&xtvy);
        let log_det_x = log_det_spd(&xtvx)?;

        let df = (self.n - self.p) as f64;
        let rss = (ytvy - beta.dot(&xtvy)).max(f64::MIN_POSITIVE);
        let sigma2 = rss / df;
        let criterion =
            df * sigma2.ln() + log_det_v + log_det_x + df * (1.0 + (2.0 * std::f64::consts::PI).ln());

        let xtvx_inverse = chol_x.solve(&DMatrix::identity(self.p, self.p));
        Some(Profiled {
            criterion,
            beta,
            xtvx_inverse,
            sigma2,
        })
    }

    fn criterion(&self, theta: &[f64]) -> f64 {
        self.profile(theta).map_or(f64::INFINITY, |p| p.criterion)
    }

    /// Conditional modes b_g = Λ M_g⁻¹ Λ'Z_g'(y_g - X_g β̂).
    fn blups(&self, theta: &[f64], beta: &DVector<f64>) -> Result<Array2<f64>> {
        let lambda = self.lambda(theta);
        let identity = DMatrix::<f64>::identity(self.q, self.q);
        let mut out = Array2::zeros((self.blocks.len(), self.q));
        for (g, block) in self.blocks.iter().enumerate() {
            let m = &identity + lambda.transpose() * &block.ztz * &lambda;
            let chol = m.cholesky().ok_or_else(|| {
                RustyMarginsError::LinearAlgebraError(format!(
                    "random-effects system for group {} is not positive definite",
                    g
                ))
            })?;
            let resid = &block.zty - &block.ztx * beta;
            let b = &lambda * chol.solve(&(lambda.transpose() * resid));
            for j in 0..self.q {
                out[[g, j]] = b[j];
            }
        }
        Ok(out)
    }
}

/// Bounds for θ entry `k`: diagonal entries are non-negative.
fn theta_bounds(q: usize, upper: f64) -> Vec<(f64, f64)> {
    let mut bounds = Vec::new();
    for j in 0..q {
        for i in j..q {
            bounds.push(if i == j { (0.0, upper) } else { (-upper, upper) });
        }
    }
    bounds
}

/// Fit a linear mixed model by REML.
///
/// # Arguments
/// * `y` - Response (n)
/// * `x` - Fixed-effects design (n × p)
/// * `z` - Random-effects covariates per row (n × q): 1 for an intercept,
///   the slope variable's value for a slope
/// * `groups` - Group index of each row, in 0..n_groups
/// * `n_groups` - Number of levels of the grouping factor
pub fn fit_lmm_reml(
    y: &Array1<f64>,
    x: &Array2<f64>,
    z: &Array2<f64>,
    groups: &[usize],
    n_groups: usize,
    config: &RemlConfig,
) -> Result<LmmFit> {
    let (n, p) = x.dim();
    let q = z.ncols();
    if y.len() != n || z.nrows() != n || groups.len() != n {
        return Err(RustyMarginsError::DimensionMismatch(format!(
            "y has {} rows, X {}, Z {}, groups {}",
            y.len(),
            n,
            z.nrows(),
            groups.len()
        )));
    }
    if q == 0 {
        return Err(RustyMarginsError::EmptyInput(
            "random-effects design has no columns".to_string(),
        ));
    }
    if n_groups < 2 {
        return Err(RustyMarginsError::InvalidValue(format!(
            "a random effect needs at least 2 groups, got {}",
            n_groups
        )));
    }
    if let Some(&bad) = groups.iter().find(|&&g| g >= n_groups) {
        return Err(RustyMarginsError::InvalidValue(format!(
            "group index {} out of range for {} groups",
            bad, n_groups
        )));
    }
    if n <= p {
        return Err(RustyMarginsError::InvalidValue(format!(
            "{} observations cannot support {} fixed effects",
            n, p
        )));
    }

    let problem = RemlProblem::new(y, x, z, groups, n_groups);
    let bounds = theta_bounds(q, config.theta_upper);

    // Start from Λ = I: random effects about as variable as the residual
    let mut theta: Vec<f64> = (0..q)
        .flat_map(|j| (j..q).map(move |i| if i == j { 1.0 } else { 0.0 }))
        .collect();
    let mut current = problem.criterion(&theta);
    if !current.is_finite() {
        return Err(RustyMarginsError::LinearAlgebraError(
            "REML criterion is not finite at the starting values; \
             fixed effects may be collinear"
                .to_string(),
        ));
    }

    let mut converged = false;
    let mut sweeps = 0;
    while sweeps < config.max_sweeps {
        sweeps += 1;
        let before = current;

        for k in 0..theta.len() {
            let (lo, hi) = bounds[k];
            let result = brent_minimize(
                |value| {
                    let mut trial = theta.clone();
                    trial[k] = value;
                    problem.criterion(&trial)
                },
                lo,
                hi,
                1e-10,
                200,
            );
            // Also consider the exact boundary for variance entries
            let mut candidate = (result.x_min, result.f_min);
            if lo == 0.0 {
                let mut at_zero = theta.clone();
                at_zero[k] = 0.0;
                let f_zero = problem.criterion(&at_zero);
                if f_zero < candidate.1 {
                    candidate = (0.0, f_zero);
                }
            }
            if candidate.1 < current {
                theta[k] = candidate.0;
                current = candidate.1;
            }
        }

        let change = (before - current).abs() / (current.abs() + 1.0);
        if config.verbose {
            log::info!("REML sweep {}: criterion = {:.8}, theta = {:?}", sweeps, current, theta);
        } else {
            log::debug!("REML sweep {}: criterion = {:.8}, theta = {:?}", sweeps, current, theta);
        }
        if change < config.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(RustyMarginsError::ConvergenceFailure(format!(
            "REML search did not converge in {} sweeps (criterion = {:.6})",
            config.max_sweeps, current
        )));
    }

    let profiled = problem.profile(&theta).ok_or_else(|| {
        RustyMarginsError::LinearAlgebraError("X'V⁻¹X is singular at the REML optimum".to_string())
    })?;
    let blups = problem.blups(&theta, &profiled.beta)?;
    let lambda = problem.lambda(&theta);
    let random_covariance = &lambda * lambda.transpose() * profiled.sigma2;

    if theta
        .iter()
        .zip(&bounds)
        .any(|(&t, &(lo, _))| lo == 0.0 && t == 0.0)
    {
        log::warn!("REML fit is singular: a random-effect variance is estimated at zero");
    }

    Ok(LmmFit {
        coefficients: to_array1(&profiled.beta),
        covariance: to_array2(&(profiled.xtvx_inverse * profiled.sigma2)),
        sigma2: profiled.sigma2,
        random_covariance: to_array2(&random_covariance),
        blups,
        theta,
        reml_criterion: profiled.criterion,
        sweeps,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Balanced one-way layout: G groups of m observations, intercept only.
    fn one_way(group_means: &[f64], noise: &[f64]) -> (Array1<f64>, Array2<f64>, Array2<f64>, Vec<usize>) {
        let m = noise.len();
        let n = group_means.len() * m;
        let y = Array1::from_shape_fn(n, |i| group_means[i / m] + noise[i % m]);
        let x = Array2::ones((n, 1));
        let z = Array2::ones((n, 1));
        let groups = (0..n).map(|i| i / m).collect();
        (y, x, z, groups)
    }

    #[test]
    fn test_balanced_one_way_matches_anova() {
        let means = [10.0, 12.0, 7.0, 11.0, 9.0, 13.0];
        let noise = [-1.0, 0.5, 0.0, 0.5];
        let (y, x, z, groups) = one_way(&means, &noise);
        let fit = fit_lmm_reml(&y, &x, &z, &groups, means.len(), &RemlConfig::default()).unwrap();

        // Balanced data: β̂ is the grand mean
        let grand = means.iter().sum::<f64>() / means.len() as f64;
        assert_abs_diff_eq!(fit.coefficients[0], grand, epsilon = 1e-6);

        // ANOVA (= REML for balanced designs when positive):
        // σ² = MSW, σ_b² = (MSB - MSW) / m
        let m = noise.len() as f64;
        let ssw: f64 = noise.iter().map(|e| e * e).sum::<f64>() * means.len() as f64;
        let msw = ssw / (means.len() as f64 * (m - 1.0));
        let msb = m * means.iter().map(|mu| (mu - grand).powi(2)).sum::<f64>() / (means.len() as f64 - 1.0);
        assert_abs_diff_eq!(fit.sigma2, msw, epsilon = 1e-4);
        assert_abs_diff_eq!(fit.random_covariance[[0, 0]], (msb - msw) / m, epsilon = 1e-3);

        // BLUPs shrink the group deviations towards zero
        for (g, &mu) in means.iter().enumerate() {
            let raw = mu - grand;
            assert!(fit.blups[[g, 0]].abs() <= raw.abs() + 1e-9);
            assert!(fit.blups[[g, 0]] * raw >= 0.0);
        }
        assert_abs_diff_eq!(fit.blups.column(0).sum(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_no_group_signal_hits_boundary() {
        // Identical group means: between-group variance is zero
        let means = [5.0; 4];
        let noise = [-1.0, 1.0, 0.5, -0.5];
        let (y, x, z, groups) = one_way(&means, &noise);
        let fit = fit_lmm_reml(&y, &x, &z, &groups, 4, &RemlConfig::default()).unwrap();
        assert!(fit.random_covariance[[0, 0]] < 1e-6);
        assert_abs_diff_eq!(fit.coefficients[0], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_group_rejected() {
        let (y, x, z, groups) = one_way(&[1.0], &[0.0, 1.0, 2.0]);
        let result = fit_lmm_reml(&y, &x, &z, &groups, 1, &RemlConfig::default());
        assert!(matches!(result, Err(RustyMarginsError::InvalidValue(_))));
    }

    #[test]
    fn test_lambda_layout() {
        let y = Array1::zeros(4);
        let x = Array2::ones((4, 1));
        let z = Array2::ones((4, 2));
        let problem = RemlProblem::new(&y, &x, &z, &[0, 0, 1, 1], 2);
        let lambda = problem.lambda(&[1.0, 2.0, 3.0]);
        assert_eq!(lambda[(0, 0)], 1.0);
        assert_eq!(lambda[(1, 0)], 2.0);
        assert_eq!(lambda[(1, 1)], 3.0);
        assert_eq!(lambda[(0, 1)], 0.0);
        assert_eq!(theta_bounds(2, 5.0), vec![(0.0, 5.0), (-5.0, 5.0), (0.0, 5.0)]);
    }
}
