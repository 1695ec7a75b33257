// =============================================================================
// RustyMargins Core Library
// =============================================================================
//
// Marginal and conditional effects from fitted regression models.
//
// "Marginal" and "conditional" carry three incompatible meanings in the
// applied literature (slope vs contrast, averaged vs fixed covariates,
// with vs without random-effect variance). This library makes the choice an
// explicit, named parameter of every request instead of a convention.
//
// STRUCTURE:
// ----------
//   - data:        Column-oriented observation table (numeric + factor columns)
//   - formula:     R-style formula parsing ("y ~ x * g + s(z) + (1 | site)")
//   - design:      Frozen encodings that turn any dataset into a model matrix
//   - splines:     B-spline bases and difference penalties for smooth terms
//   - families:    Distribution families (Gaussian, Poisson, Binomial)
//   - links:       Link functions (Identity, Log, Logit)
//   - solvers:     IRLS, GCV smoothing-parameter selection, REML
//   - model:       Fitted linear, generalized, additive and mixed models
//   - effects:     Slopes and contrasts under a conditioning policy
//   - predictions: Predictions with intervals and the random-effect toggle
//   - inference:   P-values, critical values, interval helpers
//   - report:      Fixed-width text tables
//   - error:       Error types used throughout the library
//
// TYPICAL USE:
// ------------
//   let model = LinearModel::fit("body_mass ~ flipper_len * species", &penguins)?;
//   let request = EffectRequest::new("flipper_len", ConditioningPolicy::By("species".into()));
//   let effects = estimate_effects(&model, &penguins, &request, &EffectConfig::default())?;
//   println!("{}", render_effects(&effects));
//
// =============================================================================

pub mod constants;
pub mod convert;
pub mod data;
pub mod design;
pub mod effects;
pub mod error;
pub mod families;
pub mod formula;
pub mod inference;
pub mod links;
pub mod model;
pub mod predictions;
pub mod report;
pub mod solvers;
pub mod splines;

// Re-export the request/response surface at the top level
pub use data::{Column, Dataset, Factor, Value};
pub use effects::{
    estimate_effects, ConditioningPolicy, Contrast, EffectConfig, EffectEstimate, EffectRequest, EffectType, Scale,
    UncertaintyMethod,
};
pub use error::{Result, RustyMarginsError};
pub use families::{family_from_name, BinomialFamily, Family, GaussianFamily, PoissonFamily};
pub use formula::{parse_formula, ParsedFormula};
pub use inference::Distribution;
pub use links::{link_from_name, IdentityLink, Link, LogLink, LogitLink};
pub use model::{
    coefficient_table, AdditiveConfig, AdditiveModel, CoefficientRow, FittedModel, LinearModel, MixedConfig,
    MixedModel, ModelKind, RandomEffects,
};
pub use predictions::{levels_of, predict, reference_grid, span_of, Prediction, PredictionConfig, RandomEffectMode};
pub use report::{render_coefficients, render_effects, render_predictions};
