// =============================================================================
// Numeric Constants
// =============================================================================
//
// Shared clamps and tolerances. Kept in one place so the solvers, the
// families and the effect extractor agree on what "too small" means.
//
// =============================================================================

/// Smallest admissible mean for strictly positive families (Poisson).
pub const MU_MIN_POSITIVE: f64 = 1e-10;

/// Bounds for probabilities in the Binomial family.
pub const MU_MIN_PROBABILITY: f64 = 1e-10;
pub const MU_MAX_PROBABILITY: f64 = 1.0 - 1e-10;

/// Upper clip for IRLS working weights.
pub const MAX_IRLS_WEIGHT: f64 = 1e10;

/// Standard errors below this are treated as zero (statistic undefined).
pub const SE_EPSILON: f64 = 1e-12;

/// Relative ridge added to a covariance matrix before a Cholesky factorisation
/// when it is only positive semi-definite.
pub const COVARIANCE_JITTER: f64 = 1e-10;

/// Default relative finite-difference step for slopes (fraction of the
/// observed range of the focal variable).
pub const DEFAULT_STEP_SCALE: f64 = 1e-4;
