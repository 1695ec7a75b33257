// =============================================================================
// Penalised B-Splines (P-splines)
// =============================================================================
//
// Smooth terms s(x) in an additive model are represented as a B-spline basis
// with a difference penalty on adjacent coefficients:
//
//     f(x) = Σ_j B_j(x) β_j,    penalty = λ β' D'D β
//
// KNOTS
// -----
// Knots are equally spaced over the observed range of x and extended by
// `degree` knots on each side, so every point in [min, max] sits inside a
// full set of basis functions.
//
// IDENTIFIABILITY
// ---------------
// B-splines sum to one, so an uncentred basis would duplicate the intercept.
// Columns are centred by their training means and the last column is dropped.
// The centring constants are frozen at fit time so that new rows (effects,
// predictions) are encoded exactly as the training rows were.
//
// EXTRAPOLATION
// -------------
// Outside the training range the basis is continued linearly from the
// boundary, which keeps finite-difference slopes at the edges well-defined.
//
// =============================================================================

use ndarray::Array2;

use crate::error::{Result, RustyMarginsError};

/// Frozen B-spline basis for one smooth term.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineBasis {
    knots: Vec<f64>,
    degree: usize,
    k: usize,
    lower: f64,
    upper: f64,
    column_means: Vec<f64>,
}

impl SplineBasis {
    /// Build a basis of dimension `k` over the observed values `x`.
    pub fn fit(x: &[f64], k: usize, degree: usize) -> Result<Self> {
        if k < degree + 2 {
            return Err(RustyMarginsError::InvalidValue(format!(
                "basis dimension k={} is too small for degree {} (need at least {})",
                k,
                degree,
                degree + 2
            )));
        }
        let (lower, upper) = x
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if !(upper > lower) {
            return Err(RustyMarginsError::InvalidValue(
                "smooth term needs at least two distinct finite values".to_string(),
            ));
        }

        let n_intervals = k - degree;
        let dx = (upper - lower) / n_intervals as f64;
        let knots: Vec<f64> = (0..(k + degree + 1))
            .map(|j| lower + (j as f64 - degree as f64) * dx)
            .collect();

        let mut basis = Self {
            knots,
            degree,
            k,
            lower,
            upper,
            column_means: vec![0.0; k],
        };

        let raw = basis.raw(x);
        let n = raw.nrows().max(1) as f64;
        basis.column_means = (0..k).map(|j| raw.column(j).sum() / n).collect();
        Ok(basis)
    }

    /// Number of columns contributed to the model matrix.
    pub fn n_columns(&self) -> usize {
        self.k - 1
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn range(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Uncentred basis (n × k), linear continuation outside the range.
    pub fn raw(&self, x: &[f64]) -> Array2<f64> {
        let mut out = Array2::zeros((x.len(), self.k));
        let h = (self.upper - self.lower) * 1e-6;
        for (i, &xi) in x.iter().enumerate() {
            let row = if xi < self.lower {
                let at = self.cox_de_boor(self.lower);
                let ahead = self.cox_de_boor(self.lower + h);
                at.iter()
                    .zip(&ahead)
                    .map(|(&b0, &b1)| b0 + (b1 - b0) / h * (xi - self.lower))
                    .collect::<Vec<_>>()
            } else if xi > self.upper {
                let at = self.cox_de_boor(self.upper);
                let behind = self.cox_de_boor(self.upper - h);
                at.iter()
                    .zip(&behind)
                    .map(|(&b0, &b1)| b0 + (b0 - b1) / h * (xi - self.upper))
                    .collect::<Vec<_>>()
            } else {
                self.cox_de_boor(xi)
            };
            for (j, v) in row.into_iter().enumerate() {
                out[[i, j]] = v;
            }
        }
        out
    }

    /// Centred, identifiable basis (n × (k-1)) used in the model matrix.
    pub fn evaluate(&self, x: &[f64]) -> Array2<f64> {
        let raw = self.raw(x);
        Array2::from_shape_fn((x.len(), self.k - 1), |(i, j)| raw[[i, j]] - self.column_means[j])
    }

    /// Difference penalty restricted to the retained columns.
    pub fn penalty(&self, order: usize) -> Array2<f64> {
        let full = difference_penalty(self.k, order);
        let m = self.k - 1;
        Array2::from_shape_fn((m, m), |(i, j)| full[[i, j]])
    }

    /// All k basis functions at one point (Cox–de Boor recursion).
    fn cox_de_boor(&self, x: f64) -> Vec<f64> {
        let t = &self.knots;
        let n_knots = t.len();

        // Degree 0: indicator of the knot interval. The upper boundary belongs
        // to the last interval inside the range, not the one beyond it.
        let last = self.k - 1;
        let mut b: Vec<f64> = (0..n_knots - 1)
            .map(|j| {
                let inside = if x >= self.upper {
                    j == last
                } else {
                    t[j] <= x && x < t[j + 1]
                };
                if inside {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();

        for d in 1..=self.degree {
            let next: Vec<f64> = (0..n_knots - 1 - d)
                .map(|j| {
                    let left_den = t[j + d] - t[j];
                    let right_den = t[j + d + 1] - t[j + 1];
                    let left = if left_den > 0.0 {
                        (x - t[j]) / left_den * b[j]
                    } else {
                        0.0
                    };
                    let right = if right_den > 0.0 {
                        (t[j + d + 1] - x) / right_den * b[j + 1]
                    } else {
                        0.0
                    };
                    left + right
                })
                .collect();
            b = next;
        }
        b.truncate(self.k);
        b
    }
}

/// Difference penalty S = D'D for `k` coefficients.
///
/// `order` = 2 penalises curvature (second differences), the usual choice.
pub fn difference_penalty(k: usize, order: usize) -> Array2<f64> {
    // D starts as the identity and is differenced `order` times
    let mut d = Array2::<f64>::eye(k);
    for _ in 0..order.min(k.saturating_sub(1)) {
        let rows = d.nrows() - 1;
        d = Array2::from_shape_fn((rows, k), |(i, j)| d[[i + 1, j]] - d[[i, j]]);
    }
    d.t().dot(&d)
}

// =============================================================================
// Tests
// =============================================================================
