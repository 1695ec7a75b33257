// =============================================================================
// Effects: Marginal and Conditional
// =============================================================================
//
// "Marginal effect" and "conditional effect" mean different things in
// different corners of the literature. Rather than pick one meaning, every
// request here names its conditioning policy explicitly.
//
// WHAT IS ESTIMATED
// -----------------
//   numeric focal variable      → slope:     ∂ŷ/∂x by central difference
//   categorical focal variable  → contrast:  ŷ(level B) - ŷ(level A)
//
// WHERE IT IS EVALUATED (ConditioningPolicy)
// ------------------------------------------
//   Reference         one synthetic row: other numerics at their mean, other
//                     factors at their reference level ("slider" view)
//   Average           every observed row, effects averaged (average
//                     marginal effect)
//   AverageOver(f)    the reference row at every level of factor f, effects
//                     averaged with equal weight per level
//   Condition([..])   the reference row with named variables fixed
//                     ("what-if" row)
//   By(f)             one Condition per level of f, reported together
//
// For a model without interactions a link-scale slope is the same at every
// row, so Reference and Average agree. With an interaction x:species the
// slope at species = Gentoo is β_x + β_{x:species[Gentoo]}.
//
// UNCERTAINTY
// -----------
// Delta method (default) or coefficient simulation, see `uncertainty`.
//
// =============================================================================

pub mod counterfactual;
pub mod uncertainty;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_STEP_SCALE;
use crate::data::{Dataset, Value};
use crate::design::{Variable, VariableKind};
use crate::error::{Result, RustyMarginsError};
use crate::inference::Distribution;
use crate::model::FittedModel;

use counterfactual::{contrast, normalise_value, observed_rows, reference_record, slope, step_for, Counterfactual};
use uncertainty::{delta_method, CoefficientDraws, IntervalSettings, Propagated};

// =============================================================================
// Request types
// =============================================================================

/// Which scale effects are reported on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scale {
    /// The linear predictor η
    #[default]
    Link,
    /// The mean μ = g⁻¹(η)
    Response,
}

/// Where the effect is evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConditioningPolicy {
    Reference,
    Average,
    AverageOver(String),
    Condition(Vec<(String, Value)>),
    By(String),
}

impl fmt::Display for ConditioningPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditioningPolicy::Reference => write!(f, "reference"),
            ConditioningPolicy::Average => write!(f, "average"),
            ConditioningPolicy::AverageOver(factor) => write!(f, "average over {}", factor),
            ConditioningPolicy::Condition(values) => {
                let fixed: Vec<String> = values.iter().map(|(n, v)| format!("{} = {}", n, v)).collect();
                write!(f, "condition: {}", fixed.join(", "))
            }
            ConditioningPolicy::By(factor) => write!(f, "by {}", factor),
        }
    }
}

/// Which level pairs a categorical focal variable is compared on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contrast {
    /// Every non-reference level against the reference level
    Reference,
    /// One explicit comparison: `to - from`
    Levels { from: String, to: String },
    /// Every pair of levels, later level minus earlier level
    Pairwise,
}

/// One effect request against a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRequest {
    /// Variable whose effect is wanted
    pub focal: String,
    pub policy: ConditioningPolicy,
    /// Only for categorical focal variables; `None` means `Contrast::Reference`
    pub contrast: Option<Contrast>,
    pub scale: Scale,
}

impl EffectRequest {
    /// Link-scale request with reference contrasts.
    pub fn new(focal: &str, policy: ConditioningPolicy) -> Self {
        Self {
            focal: focal.to_string(),
            policy,
            contrast: None,
            scale: Scale::Link,
        }
    }

    pub fn with_contrast(mut self, contrast: Contrast) -> Self {
        self.contrast = Some(contrast);
        self
    }

    pub fn on_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }
}

/// How standard errors and intervals are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UncertaintyMethod {
    #[default]
    DeltaMethod,
    Simulation { draws: usize, seed: u64 },
}

/// Configuration for effect estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectConfig {
    /// Confidence level for intervals. Default: 0.95
    pub confidence_level: f64,

    /// Reference distribution for tests and Wald intervals.
    /// StudentT uses the model's residual degrees of freedom.
    /// Default: Normal
    pub distribution: Distribution,

    /// Finite-difference step as a fraction of the focal variable's
    /// training range. Default: 1e-4
    pub step_scale: f64,

    /// Default: DeltaMethod
    pub uncertainty: UncertaintyMethod,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            distribution: Distribution::Normal,
            step_scale: DEFAULT_STEP_SCALE,
            uncertainty: UncertaintyMethod::DeltaMethod,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectType {
    Slope,
    Contrast,
}

/// One estimated effect, attributable to one (model, focal term, policy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectEstimate {
    pub term: String,
    pub effect_type: EffectType,
    /// "slope", or "B - A" for a contrast
    pub contrast: String,
    /// Label of the conditioning policy
    pub policy: String,
    /// Variables fixed for this estimate (non-empty for `By` policies)
    pub context: Vec<(String, String)>,
    pub scale: Scale,
    pub estimate: f64,
    pub std_error: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub conf_low: f64,
    pub conf_high: f64,
}

// =============================================================================
// Estimation
// =============================================================================

/// Estimate the effect of `request.focal` under the requested policy.
///
/// # Arguments
/// * `model` - Any fitted model
/// * `data` - Rows averaged over by `ConditioningPolicy::Average`; other
///   policies build synthetic rows and ignore it
/// * `request` - Focal variable, policy, contrasts and scale
/// * `config` - Interval level, distribution, step and uncertainty method
///
/// # Returns
/// One estimate per contrast (slopes: one) per `By` level.
pub fn estimate_effects(
    model: &dyn FittedModel,
    data: &Dataset,
    request: &EffectRequest,
    config: &EffectConfig,
) -> Result<Vec<EffectEstimate>> {
    if !(config.step_scale > 0.0 && config.step_scale.is_finite()) {
        return Err(RustyMarginsError::InvalidValue(format!(
            "step_scale must be positive, got {}",
            config.step_scale
        )));
    }
    let design = model.design();
    let focal = match design.variable(&request.focal) {
        Some(v) if design.is_fixed_variable(&request.focal) => v,
        _ => return Err(RustyMarginsError::TermNotInModel(request.focal.clone())),
    };
    let comparisons = comparisons(focal, request.contrast.as_ref())?;
    let bases = bases(model, data, focal, &request.policy)?;

    let settings = IntervalSettings {
        confidence: config.confidence_level,
        distribution: config.distribution,
        df: model.df_residual(),
    };
    let draws = match config.uncertainty {
        UncertaintyMethod::DeltaMethod => None,
        UncertaintyMethod::Simulation { draws, seed } => Some(CoefficientDraws::new(
            model.coefficients(),
            model.covariance(),
            draws,
            seed,
        )?),
    };
    let policy_label = request.policy.to_string();

    let mut out = Vec::with_capacity(bases.len() * comparisons.len());
    for (context, base) in &bases {
        for comparison in &comparisons {
            let (effect_type, label, cf) = match comparison {
                Comparison::Slope => {
                    let step = step_for(focal, config.step_scale);
                    (EffectType::Slope, "slope".to_string(), slope(model, base, &focal.name, step)?)
                }
                Comparison::Levels { from, to } => (
                    EffectType::Contrast,
                    format!("{} - {}", to, from),
                    contrast(model, base, &focal.name, from, to)?,
                ),
            };
            let result = propagate(model, &cf, request.scale, &settings, draws.as_ref());
            log::debug!(
                "{} {} [{}{}]: {:.6} (SE {:.6})",
                focal.name,
                label,
                policy_label,
                context
                    .iter()
                    .map(|(k, v)| format!(", {} = {}", k, v))
                    .collect::<String>(),
                result.estimate,
                result.std_error
            );
            out.push(EffectEstimate {
                term: focal.name.clone(),
                effect_type,
                contrast: label,
                policy: policy_label.clone(),
                context: context.clone(),
                scale: request.scale,
                estimate: result.estimate,
                std_error: result.std_error,
                statistic: result.statistic,
                p_value: result.p_value,
                conf_low: result.conf_low,
                conf_high: result.conf_high,
            });
        }
    }
    Ok(out)
}

fn propagate(
    model: &dyn FittedModel,
    cf: &Counterfactual,
    scale: Scale,
    settings: &IntervalSettings,
    draws: Option<&CoefficientDraws>,
) -> Propagated {
    match draws {
        None => delta_method(cf, model.coefficients(), model.covariance(), model.link(), scale, settings),
        Some(draws) => draws.propagate(cf, model.coefficients(), model.link(), scale, settings),
    }
}

/// One quantity to estimate for the focal variable.
#[derive(Debug, Clone, PartialEq)]
enum Comparison {
    Slope,
    Levels { from: String, to: String },
}

fn comparisons(focal: &Variable, requested: Option<&Contrast>) -> Result<Vec<Comparison>> {
    let levels = match &focal.kind {
        VariableKind::Numeric { .. } => {
            return match requested {
                None => Ok(vec![Comparison::Slope]),
                Some(_) => Err(RustyMarginsError::ColumnType {
                    name: focal.name.clone(),
                    expected: "categorical",
                    actual: "numeric",
                }),
            };
        }
        VariableKind::Categorical { levels } => levels,
    };
    let pair = |from: &String, to: &String| Comparison::Levels {
        from: from.clone(),
        to: to.clone(),
    };
    match requested.unwrap_or(&Contrast::Reference) {
        Contrast::Reference => Ok(levels[1..].iter().map(|to| pair(&levels[0], to)).collect()),
        Contrast::Pairwise => Ok(levels
            .iter()
            .enumerate()
            .flat_map(|(i, from)| levels[i + 1..].iter().map(move |to| pair(from, to)))
            .collect()),
        Contrast::Levels { from, to } => {
            for level in [from, to] {
                if !levels.contains(level) {
                    return Err(RustyMarginsError::UnknownLevel {
                        factor: focal.name.clone(),
                        level: level.clone(),
                    });
                }
            }
            Ok(vec![pair(from, to)])
        }
    }
}

type Context = Vec<(String, String)>;

/// The rows each estimate is averaged over, with the context it reports.
fn bases(
    model: &dyn FittedModel,
    data: &Dataset,
    focal: &Variable,
    policy: &ConditioningPolicy,
) -> Result<Vec<(Context, Dataset)>> {
    match policy {
        ConditioningPolicy::Reference => {
            Ok(vec![(Vec::new(), Dataset::from_records(&[reference_record(model, &[])])?)])
        }
        ConditioningPolicy::Average => Ok(vec![(Vec::new(), observed_rows(model, data)?)]),
        ConditioningPolicy::AverageOver(factor) => {
            let levels = grouping_levels(model, focal, factor)?;
            let records: Vec<_> = levels
                .iter()
                .map(|level| reference_record(model, &[(factor.clone(), Value::Level(level.clone()))]))
                .collect();
            Ok(vec![(Vec::new(), Dataset::from_records(&records)?)])
        }
        ConditioningPolicy::Condition(values) => {
            let overrides = conditioning_values(model, values)?;
            Ok(vec![(Vec::new(), Dataset::from_records(&[reference_record(model, &overrides)])?)])
        }
        ConditioningPolicy::By(factor) => grouping_levels(model, focal, factor)?
            .iter()
            .map(|level| {
                let overrides = vec![(factor.clone(), Value::Level(level.clone()))];
                let base = Dataset::from_records(&[reference_record(model, &overrides)])?;
                Ok((vec![(factor.clone(), level.clone())], base))
            })
            .collect(),
    }
}

/// Levels of a factor the policy averages or splits over.
fn grouping_levels(model: &dyn FittedModel, focal: &Variable, factor: &str) -> Result<Vec<String>> {
    if factor == focal.name {
        return Err(RustyMarginsError::InvalidValue(format!(
            "cannot average or split the effect of '{}' over itself",
            factor
        )));
    }
    let variable = model
        .design()
        .variable(factor)
        .filter(|_| model.design().is_fixed_variable(factor))
        .ok_or_else(|| RustyMarginsError::TermNotInModel(factor.to_string()))?;
    match &variable.kind {
        VariableKind::Categorical { levels } => Ok(levels.clone()),
        VariableKind::Numeric { .. } => Err(RustyMarginsError::ColumnType {
            name: factor.to_string(),
            expected: "categorical",
            actual: "numeric",
        }),
    }
}

fn conditioning_values(model: &dyn FittedModel, values: &[(String, Value)]) -> Result<Vec<(String, Value)>> {
    values
        .iter()
        .map(|(name, value)| {
            let variable = model
                .design()
                .variable(name)
                .ok_or_else(|| RustyMarginsError::TermNotInModel(name.clone()))?;
            Ok((name.clone(), normalise_value(variable, value)?))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::families::PoissonFamily;
    use crate::links::LogLink;
    use crate::model::LinearModel;
    use approx::assert_abs_diff_eq;

    /// y depends on x, group and (for "c") an x:group interaction.
    fn data() -> Dataset {
        let groups = ["a", "b", "c"];
        let jitter = [0.2, -0.1, 0.05, -0.15, 0.1, -0.05, 0.0, 0.12];
        let mut y = Vec::new();
        let mut x = Vec::new();
        let mut g = Vec::new();
        for (k, group) in groups.iter().enumerate() {
            for (i, e) in jitter.iter().enumerate() {
                let xi = i as f64 + 0.5 * k as f64;
                let slope = if *group == "c" { 2.5 } else { 1.5 };
                x.push(xi);
                y.push(1.0 + k as f64 + slope * xi + e);
                g.push(*group);
            }
        }
        Dataset::new()
            .with_numeric("y", y)
            .unwrap()
            .with_numeric("x", x)
            .unwrap()
            .with_factor("g", &g)
            .unwrap()
    }

    fn run(model: &dyn FittedModel, request: EffectRequest) -> Vec<EffectEstimate> {
        estimate_effects(model, &data(), &request, &EffectConfig::default()).unwrap()
    }

    #[test]
    fn test_additive_slope_same_under_reference_and_average() {
        let model = LinearModel::fit("y ~ x + g", &data()).unwrap();
        let reference = run(&model, EffectRequest::new("x", ConditioningPolicy::Reference));
        let average = run(&model, EffectRequest::new("x", ConditioningPolicy::Average));
        assert_eq!(reference.len(), 1);
        assert_eq!(reference[0].effect_type, EffectType::Slope);
        assert_abs_diff_eq!(reference[0].estimate, model.coefficient("x").unwrap(), epsilon = 1e-8);
        assert_abs_diff_eq!(reference[0].estimate, average[0].estimate, epsilon = 1e-8);
        assert_abs_diff_eq!(reference[0].std_error, average[0].std_error, epsilon = 1e-6);
        assert_eq!(average[0].policy, "average");
    }

    #[test]
    fn test_interaction_slope_by_level() {
        let model = LinearModel::fit("y ~ x * g", &data()).unwrap();
        let by = run(&model, EffectRequest::new("x", ConditioningPolicy::By("g".to_string())));
        assert_eq!(by.len(), 3);
        assert_eq!(by[2].context, vec![("g".to_string(), "c".to_string())]);
        let base = model.coefficient("x").unwrap();
        let extra = model.coefficient("x:g[c]").unwrap();
        assert_abs_diff_eq!(by[2].estimate, base + extra, epsilon = 1e-6);
        assert_abs_diff_eq!(by[0].estimate, base, epsilon = 1e-6);

        // Averaging over g weights each level equally
        let over = run(&model, EffectRequest::new("x", ConditioningPolicy::AverageOver("g".to_string())));
        let mean: f64 = by.iter().map(|e| e.estimate).sum::<f64>() / 3.0;
        assert_abs_diff_eq!(over[0].estimate, mean, epsilon = 1e-6);
    }

    #[test]
    fn test_contrasts_are_antisymmetric() {
        let model = LinearModel::fit("y ~ x + g", &data()).unwrap();
        let forward = EffectRequest::new("g", ConditioningPolicy::Reference).with_contrast(Contrast::Levels {
            from: "a".to_string(),
            to: "c".to_string(),
        });
        let backward = EffectRequest::new("g", ConditioningPolicy::Reference).with_contrast(Contrast::Levels {
            from: "c".to_string(),
            to: "a".to_string(),
        });
        let f = &run(&model, forward)[0];
        let b = &run(&model, backward)[0];
        assert_eq!(f.contrast, "c - a");
        assert_abs_diff_eq!(f.estimate, -b.estimate, epsilon = 1e-10);
        assert_abs_diff_eq!(f.std_error, b.std_error, epsilon = 1e-10);
        assert_abs_diff_eq!(f.estimate, model.coefficient("g[c]").unwrap(), epsilon = 1e-10);

        let defaults = run(&model, EffectRequest::new("g", ConditioningPolicy::Reference));
        assert_eq!(defaults.len(), 2);
        let pairwise = run(
            &model,
            EffectRequest::new("g", ConditioningPolicy::Average).with_contrast(Contrast::Pairwise),
        );
        assert_eq!(pairwise.len(), 3);
        assert_eq!(pairwise[2].contrast, "c - b");
    }

    #[test]
    fn test_condition_fixes_where_the_slope_is_taken() {
        let model = LinearModel::fit("y ~ x * g", &data()).unwrap();
        let request = EffectRequest::new(
            "x",
            ConditioningPolicy::Condition(vec![("g".to_string(), Value::from("c")), ("x".to_string(), Value::Number(3.0))]),
        );
        let e = &run(&model, request)[0];
        assert_eq!(e.policy, "condition: g = c, x = 3");
        let expected = model.coefficient("x").unwrap() + model.coefficient("x:g[c]").unwrap();
        assert_abs_diff_eq!(e.estimate, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_response_scale_slope_on_log_link() {
        let counts = Dataset::new()
            .with_numeric("n", vec![2.0, 3.0, 6.0, 7.0, 12.0, 20.0, 31.0, 52.0])
            .unwrap()
            .with_numeric("t", vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])
            .unwrap();
        let model = LinearModel::fit_glm("n ~ t", &counts, Box::new(PoissonFamily), Box::new(LogLink)).unwrap();
        let request = EffectRequest::new("t", ConditioningPolicy::Reference).on_scale(Scale::Response);
        let e = &estimate_effects(&model, &counts, &request, &EffectConfig::default()).unwrap()[0];
        // dμ/dt = β_t · exp(β_0 + β_t · t̄)
        let b0 = model.coefficient("(Intercept)").unwrap();
        let bt = model.coefficient("t").unwrap();
        assert_abs_diff_eq!(e.estimate, bt * (b0 + bt * 3.5).exp(), epsilon = 1e-4);
        assert!(e.std_error > 0.0);
    }

    #[test]
    fn test_simulation_close_to_delta_method() {
        let model = LinearModel::fit("y ~ x + g", &data()).unwrap();
        let request = EffectRequest::new("g", ConditioningPolicy::Reference);
        let delta = run(&model, request.clone());
        let config = EffectConfig {
            uncertainty: UncertaintyMethod::Simulation { draws: 4000, seed: 11 },
            ..EffectConfig::default()
        };
        let sim = estimate_effects(&model, &data(), &request, &config).unwrap();
        for (d, s) in delta.iter().zip(&sim) {
            assert_abs_diff_eq!(d.estimate, s.estimate, epsilon = 1e-12);
            assert_abs_diff_eq!(s.std_error / d.std_error, 1.0, epsilon = 0.1);
        }
    }

    #[test]
    fn test_request_errors() {
        let model = LinearModel::fit("y ~ x + g", &data()).unwrap();
        let config = EffectConfig::default();
        let err = |request: EffectRequest| estimate_effects(&model, &data(), &request, &config).unwrap_err();

        assert_eq!(
            err(EffectRequest::new("z", ConditioningPolicy::Reference)),
            RustyMarginsError::TermNotInModel("z".to_string())
        );
        assert!(matches!(
            err(EffectRequest::new("x", ConditioningPolicy::Reference).with_contrast(Contrast::Pairwise)),
            RustyMarginsError::ColumnType { .. }
        ));
        assert!(matches!(
            err(EffectRequest::new("g", ConditioningPolicy::Reference).with_contrast(Contrast::Levels {
                from: "a".to_string(),
                to: "zz".to_string()
            })),
            RustyMarginsError::UnknownLevel { .. }
        ));
        assert!(matches!(
            err(EffectRequest::new("g", ConditioningPolicy::By("g".to_string()))),
            RustyMarginsError::InvalidValue(_)
        ));
        assert!(matches!(
            err(EffectRequest::new("g", ConditioningPolicy::AverageOver("x".to_string()))),
            RustyMarginsError::ColumnType { .. }
        ));
        assert!(matches!(
            err(EffectRequest::new(
                "x",
                ConditioningPolicy::Condition(vec![("x".to_string(), Value::from("high"))])
            )),
            RustyMarginsError::ColumnType { .. }
        ));
    }
}
