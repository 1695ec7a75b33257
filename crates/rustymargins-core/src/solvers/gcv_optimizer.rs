// =============================================================================
// GCV OPTIMIZER: Smoothing-Parameter Selection via Brent's Method
// =============================================================================
//
// An additive model's smooth terms each carry a penalty λ_j β_j' S_j β_j.
// Given the current IRLS weights W and working response z, we choose the λs
// that minimise the generalised cross-validation score
//
//     GCV(λ) = n × RSS_w(λ) / (n - EDF(λ))²
//
// where RSS_w = Σ w_i (z_i - x_i'β̂(λ))² and EDF = tr((X'WX + S_λ)⁻¹ X'WX).
//
// THE KEY INSIGHT
// ---------------
// X'WX and X'Wz do not depend on λ. Cache them once per IRLS iteration and
// every GCV evaluation is a single p × p Cholesky.
//
// Multiple terms are handled by coordinate descent: optimise log λ_j with
// Brent's method while holding the others fixed, sweep until stable.
//
// The same Brent minimiser drives the REML variance-parameter search for
// mixed models.
//
// =============================================================================

use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

use crate::convert::{to_dmatrix, to_dvector};

// =============================================================================
// Brent's method
// =============================================================================

/// Result of a one-dimensional minimisation.
#[derive(Debug, Clone, Copy)]
pub struct BrentResult {
    pub x_min: f64,
    pub f_min: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimise `f` on [a, b] by Brent's method (golden section + parabolic steps).
///
/// Needs no derivatives and converges superlinearly on smooth functions.
pub fn brent_minimize<F>(f: F, a: f64, b: f64, tol: f64, max_iter: usize) -> BrentResult
where
    F: Fn(f64) -> f64,
{
    const GOLDEN: f64 = 0.381_966_011_250_105; // (3 - √5) / 2

    let (mut lo, mut hi) = if a <= b { (a, b) } else { (b, a) };
    let mut x = lo + GOLDEN * (hi - lo);
    let (mut w, mut v) = (x, x);
    let mut fx = f(x);
    let (mut fw, mut fv) = (fx, fx);
    let mut step = 0.0_f64;
    let mut prev_step = 0.0_f64;

    for iter in 0..max_iter {
        let mid = 0.5 * (lo + hi);
        let tol1 = tol * x.abs() + 1e-10;
        let tol2 = 2.0 * tol1;

        if (x - mid).abs() <= tol2 - 0.5 * (hi - lo) {
            return BrentResult {
                x_min: x,
                f_min: fx,
                iterations: iter + 1,
                converged: true,
            };
        }

        let mut parabolic = false;
        if prev_step.abs() > tol1 {
            // Parabola through (x, fx), (w, fw), (v, fv)
            let r = (x - w) * (fx - fv);
            let q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            let mut q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            } else {
                q = -q;
            }
            let older = prev_step;
            prev_step = step;

            if p.abs() < (0.5 * q * older).abs() && p > q * (lo - x) && p < q * (hi - x) {
                step = p / q;
                let u = x + step;
                if u - lo < tol2 || hi - u < tol2 {
                    step = if x < mid { tol1 } else { -tol1 };
                }
                parabolic = true;
            }
        }

        if !parabolic {
            prev_step = if x < mid { hi - x } else { lo - x };
            step = GOLDEN * prev_step;
        }

        let u = if step.abs() >= tol1 {
            x + step
        } else {
            x + tol1.copysign(step)
        };
        let fu = f(u);

        if fu <= fx {
            if u < x {
                hi = x;
            } else {
                lo = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                lo = u;
            } else {
                hi = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    BrentResult {
        x_min: x,
        f_min: fx,
        iterations: max_iter,
        converged: false,
    }
}

// =============================================================================
// Multi-term GCV
// =============================================================================

/// Cached cross-products for GCV evaluation at fixed IRLS weights.
#[derive(Debug)]
pub struct MultiTermGcv {
    xtwx: DMatrix<f64>,
    xtwz: DVector<f64>,
    ztwz: f64,
    penalties: Vec<(Range<usize>, DMatrix<f64>)>,
    n: usize,
}

impl MultiTermGcv {
    /// Cache X'WX, X'Wz and z'Wz.
    ///
    /// `penalties` holds, per smooth term, its column range and unscaled S_j.
    pub fn new(
        x: &Array2<f64>,
        z: &Array1<f64>,
        w: &Array1<f64>,
        penalties: &[(Range<usize>, Array2<f64>)],
    ) -> Self {
        let xtwx = to_dmatrix(&super::irls::compute_xtwx(x, w));
        let wz: Array1<f64> = w * z;
        let xtwz = to_dvector(x.t().dot(&wz).view());
        let ztwz = z.dot(&wz);
        Self {
            xtwx,
            xtwz,
            ztwz,
            penalties: penalties
                .iter()
                .map(|(r, s)| (r.clone(), to_dmatrix(s)))
                .collect(),
            n: x.nrows(),
        }
    }

    pub fn n_terms(&self) -> usize {
        self.penalties.len()
    }

    /// X'WX + Σ λ_j S_j
    pub fn penalized_xtwx(&self, lambdas: &[f64]) -> DMatrix<f64> {
        let mut m = self.xtwx.clone();
        for ((range, s), &lambda) in self.penalties.iter().zip(lambdas) {
            let mut block = m.view_mut((range.start, range.start), (range.len(), range.len()));
            block += s * lambda;
        }
        m
    }

    /// GCV score; +∞ when the penalised system is not positive definite.
    pub fn evaluate(&self, lambdas: &[f64]) -> f64 {
        let p = self.xtwx.nrows();
        let chol = match self.penalized_xtwx(lambdas).cholesky() {
            Some(c) => c,
            None => return f64::INFINITY,
        };
        let beta = chol.solve(&self.xtwz);

        // RSS_w = z'Wz - 2β'X'Wz + β'X'WXβ
        let rss = (self.ztwz - 2.0 * beta.dot(&self.xtwz) + beta.dot(&(&self.xtwx * &beta))).max(0.0);

        let inverse = chol.solve(&DMatrix::identity(p, p));
        let edf = (&inverse * &self.xtwx).trace();
        let resid_df = self.n as f64 - edf;
        if resid_df <= 0.0 {
            return f64::INFINITY;
        }
        self.n as f64 * rss / (resid_df * resid_df)
    }

    /// Coordinate-wise Brent search over log λ_j in [log_min, log_max].
    pub fn optimize_lambdas(
        &self,
        initial: &[f64],
        log_lambda_min: f64,
        log_lambda_max: f64,
        tol: f64,
        max_outer_iter: usize,
    ) -> Vec<f64> {
        let mut lambdas = initial.to_vec();

        for sweep in 0..max_outer_iter {
            let old = lambdas.clone();
            for j in 0..lambdas.len() {
                let result = brent_minimize(
                    |log_lam| {
                        let mut trial = lambdas.clone();
                        trial[j] = log_lam.exp();
                        self.evaluate(&trial)
                    },
                    log_lambda_min,
                    log_lambda_max,
                    tol,
                    50,
                );
                lambdas[j] = result.x_min.exp();
            }

            let max_change = lambdas
                .iter()
                .zip(&old)
                .map(|(&new, &prev)| ((new - prev) / prev.max(1e-10)).abs())
                .fold(0.0, f64::max);
            log::debug!("GCV sweep {}: lambdas = {:?}", sweep + 1, lambdas);
            if max_change < 0.01 {
                break;
            }
        }
        lambdas
    }

    /// Effective degrees of freedom per smooth term at `lambdas`.
    pub fn term_edfs(&self, lambdas: &[f64]) -> Vec<f64> {
        let p = self.xtwx.nrows();
        let inverse = match self.penalized_xtwx(lambdas).cholesky() {
            Some(c) => c.solve(&DMatrix::identity(p, p)),
            None => return vec![f64::NAN; self.penalties.len()],
        };
        let influence = &inverse * &self.xtwx;
        self.penalties
            .iter()
            .map(|(range, _)| range.clone().map(|i| influence[(i, i)]).sum())
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
