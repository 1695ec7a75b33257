// =============================================================================
// Solvers
// =============================================================================
//
// Fitting algorithms behind the three model kinds:
//
//   - irls:          penalised IRLS for linear models and GLMs
//   - gcv_optimizer: Brent's method and GCV smoothing-parameter search
//   - smooth_glm:    additive models (IRLS + GCV, performance iteration)
//   - reml:          linear mixed models with one grouping factor
//
// HOW GLM FITTING WORKS (High-Level Overview)
// -------------------------------------------
//
//     g(E[Y]) = Xβ
//
// The link g makes the problem non-linear and the variance depends on μ, so
// IRLS linearises around the current estimate, solves a weighted least
// squares problem, and repeats. Additive models add a quadratic penalty to
// that least-squares step; mixed models are Gaussian and profiled instead.
//
// Every solver hands back a coefficient vector and its covariance. That pair
// is all the effect machinery downstream ever needs.
//
// =============================================================================

pub mod gcv_optimizer;
mod irls;
pub mod reml;
pub mod smooth_glm;

pub use gcv_optimizer::{brent_minimize, BrentResult, MultiTermGcv};
pub use irls::{compute_xtwx, fit_glm, fit_glm_full, solve_penalized_wls, IRLSConfig, IRLSResult, PenalizedSolve};
pub use reml::{fit_lmm_reml, LmmFit, RemlConfig};
pub use smooth_glm::{fit_smooth_glm, SmoothConfig, SmoothGLMResult, SmoothTermPenalty};
