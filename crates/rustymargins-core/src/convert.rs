// =============================================================================
// ndarray ↔ nalgebra Conversion and Small Linear-Algebra Helpers
// =============================================================================
//
// Arrays are stored as ndarray (row-oriented, cheap slicing and mapping) while
// decompositions go through nalgebra. Every crossing between the two lives
// here so the solvers and the effect extractor never hand-roll index loops.
//
// =============================================================================

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1};

use crate::constants::COVARIANCE_JITTER;
use crate::error::{Result, RustyMarginsError};

// =============================================================================
// ndarray → nalgebra
// =============================================================================

/// Convert an ndarray Array2 to a nalgebra DMatrix.
#[inline]
pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Convert an ndarray vector (owned or view) to a nalgebra DVector.
#[inline]
pub fn to_dvector(v: ArrayView1<f64>) -> DVector<f64> {
    DVector::from_iterator(v.len(), v.iter().copied())
}

// =============================================================================
// nalgebra → ndarray
// =============================================================================

/// Convert a nalgebra DMatrix to an ndarray Array2.
#[inline]
pub fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    let (nrows, ncols) = m.shape();
    Array2::from_shape_fn((nrows, ncols), |(i, j)| m[(i, j)])
}

/// Convert a nalgebra DVector to an ndarray Array1.
#[inline]
pub fn to_array1(v: &DVector<f64>) -> Array1<f64> {
    Array1::from_vec(v.as_slice().to_vec())
}

// =============================================================================
// Decompositions
// =============================================================================

/// Solve the symmetric system Ax = b and also return A⁻¹.
///
/// Cholesky first, LU as a fallback. Used by the (penalised) least-squares
/// step where both the solution and the inverse (for the covariance) are
/// needed.
pub fn solve_and_invert(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
    let p = a.nrows();
    if let Some(chol) = a.clone().cholesky() {
        let solution = chol.solve(b);
        let inverse = chol.solve(&DMatrix::identity(p, p));
        return Ok((solution, inverse));
    }

    log::warn!("Cholesky failed on a {}x{} system, falling back to LU", p, p);
    let lu = a.clone().lu();
    let solution = lu.solve(b).ok_or_else(|| {
        RustyMarginsError::LinearAlgebraError(
            "system is singular; predictors are probably collinear".to_string(),
        )
    })?;
    let inverse = lu.try_inverse().ok_or_else(|| {
        RustyMarginsError::LinearAlgebraError("matrix is not invertible".to_string())
    })?;
    Ok((solution, inverse))
}

/// Lower Cholesky factor of a covariance matrix.
///
/// Covariance matrices coming out of penalised or boundary fits can be
/// positive semi-definite only. A small ridge proportional to the mean
/// diagonal is added until the factorisation succeeds.
pub fn covariance_cholesky(cov: &Array2<f64>) -> Result<DMatrix<f64>> {
    let m = to_dmatrix(cov);
    if let Some(chol) = m.clone().cholesky() {
        return Ok(chol.l());
    }

    let p = m.nrows();
    let scale = (m.trace() / p.max(1) as f64).abs().max(1.0);
    let mut jitter = COVARIANCE_JITTER * scale;
    for _ in 0..8 {
        let ridged = &m + DMatrix::identity(p, p) * jitter;
        if let Some(chol) = ridged.cholesky() {
            log::debug!("covariance factorised with jitter {:.2e}", jitter);
            return Ok(chol.l());
        }
        jitter *= 100.0;
    }
    Err(RustyMarginsError::LinearAlgebraError(
        "covariance matrix is not positive semi-definite".to_string(),
    ))
}

/// Log-determinant of a symmetric positive-definite matrix via Cholesky.
pub fn log_det_spd(a: &DMatrix<f64>) -> Option<f64> {
    let chol = a.clone().cholesky()?;
    let l = chol.l();
    Some(2.0 * l.diagonal().iter().map(|d| d.ln()).sum::<f64>())
}

// =============================================================================
// Quadratic forms
// =============================================================================

/// g' V g for a gradient row g and a covariance V.
pub fn quad_form(g: ArrayView1<f64>, v: &Array2<f64>) -> f64 {
    g.dot(&v.dot(&g))
}

// =============================================================================
// Tests
// =============================================================================
