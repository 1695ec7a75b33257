// =============================================================================
// Predictions
// =============================================================================
//
// Predicted values with intervals for arbitrary rows, usually a reference
// grid of "what-if" rows.
//
// LINK SCALE
// ----------
//     η̂ = x'β̂,   Var(η̂) = x'Vx
//
// RESPONSE SCALE
// --------------
// The interval is built on the link scale and mapped through g⁻¹, so it
// respects the range of the mean (no negative counts, no probabilities
// outside [0, 1]). The standard error is the delta-method |dμ/dη|·SE(η̂).
//
// RANDOM EFFECTS (mixed models)
// -----------------------------
//   FixedOnly            x'β̂ with variance x'Vx. The prediction for a
//                        "typical" group, ignoring between-group spread.
//   MarginalOverGroups   same point, variance x'Vx + z'Σ_b z. The prediction
//                        for a new, unspecified group; never narrower.
//   Group(level)         x'β̂ + z'b̂_g, the prediction for one known group.
//
// Models without random effects treat every mode except Group as FixedOnly.
//
// =============================================================================

use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::convert::quad_form;
use crate::data::{format_number, Column, Dataset, Value};
use crate::design::VariableKind;
use crate::effects::counterfactual::normalise_value;
use crate::effects::Scale;
use crate::error::{Result, RustyMarginsError};
use crate::inference::{critical_value, Distribution};
use crate::model::FittedModel;

/// How random effects enter a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RandomEffectMode {
    #[default]
    FixedOnly,
    MarginalOverGroups,
    Group(String),
}

impl fmt::Display for RandomEffectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RandomEffectMode::FixedOnly => write!(f, "fixed only"),
            RandomEffectMode::MarginalOverGroups => write!(f, "marginal over groups"),
            RandomEffectMode::Group(level) => write!(f, "group {}", level),
        }
    }
}

/// Configuration for predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionConfig {
    /// Default: Response
    pub scale: Scale,
    /// Default: FixedOnly
    pub mode: RandomEffectMode,
    /// Default: 0.95
    pub confidence_level: f64,
    /// Default: Normal
    pub distribution: Distribution,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            scale: Scale::Response,
            mode: RandomEffectMode::FixedOnly,
            confidence_level: 0.95,
            distribution: Distribution::Normal,
        }
    }
}

/// Prediction for one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub row: usize,
    /// The row's values of the model's variables
    pub values: Vec<(String, String)>,
    pub estimate: f64,
    pub std_error: f64,
    pub conf_low: f64,
    pub conf_high: f64,
    pub scale: Scale,
    pub mode: RandomEffectMode,
}

/// Predict every row of `data`.
///
/// # Arguments
/// * `model` - Any fitted model
/// * `data` - Rows to predict; must contain every fixed-effect variable
///   (and random slopes for mixed models)
/// * `config` - Scale, random-effect mode and interval settings
///
/// # Errors
/// `InvalidValue` for a `Group` mode on a model without random effects,
/// `UnknownLevel` for a group the model never saw.
pub fn predict(model: &dyn FittedModel, data: &Dataset, config: &PredictionConfig) -> Result<Vec<Prediction>> {
    let x = model.model_matrix(data)?;
    let cov = model.covariance();
    let mut eta = x.dot(model.coefficients());
    let mut variance: Array1<f64> = x.rows().into_iter().map(|row| quad_form(row, cov)).collect();

    match (&config.mode, model.random_effects()) {
        (RandomEffectMode::FixedOnly, _) | (RandomEffectMode::MarginalOverGroups, None) => {}
        (RandomEffectMode::MarginalOverGroups, Some(random)) => {
            let z = random.design.z_matrix(data)?;
            for (v, zi) in variance.iter_mut().zip(z.rows()) {
                *v += quad_form(zi, &random.covariance);
            }
        }
        (RandomEffectMode::Group(level), Some(random)) => {
            let b = random.blup(level)?;
            eta = eta + random.design.z_matrix(data)?.dot(&b);
        }
        (RandomEffectMode::Group(level), None) => {
            return Err(RustyMarginsError::InvalidValue(format!(
                "cannot predict for group '{}': {:?} model has no random effects",
                level,
                model.kind()
            )));
        }
    }

    let crit = critical_value(config.distribution, model.df_residual(), config.confidence_level);
    let link = model.link();
    let names: Vec<&str> = model
        .design()
        .variables()
        .iter()
        .map(|v| v.name.as_str())
        .filter(|name| data.has_column(name))
        .collect();

    let predictions = eta
        .iter()
        .zip(variance.iter())
        .enumerate()
        .map(|(row, (&eta_i, &var_i))| {
            let se_link = var_i.max(0.0).sqrt();
            let (lo_link, hi_link) = (eta_i - crit * se_link, eta_i + crit * se_link);
            let (estimate, std_error, conf_low, conf_high) = match config.scale {
                Scale::Link => (eta_i, se_link, lo_link, hi_link),
                Scale::Response => {
                    let a = link.inverse_scalar(lo_link);
                    let b = link.inverse_scalar(hi_link);
                    (
                        link.inverse_scalar(eta_i),
                        link.inverse_derivative_scalar(eta_i).abs() * se_link,
                        a.min(b),
                        a.max(b),
                    )
                }
            };
            Prediction {
                row,
                values: names
                    .iter()
                    .filter_map(|name| cell_label(data, name, row).map(|label| (name.to_string(), label)))
                    .collect(),
                estimate,
                std_error,
                conf_low,
                conf_high,
                scale: config.scale,
                mode: config.mode.clone(),
            }
        })
        .collect();
    Ok(predictions)
}

fn cell_label(data: &Dataset, name: &str, row: usize) -> Option<String> {
    match data.column(name).ok()? {
        Column::Numeric(v) => v.get(row).map(|x| format_number(*x)),
        Column::Categorical(f) => f.label(row).map(str::to_string),
    }
}

// =============================================================================
// Reference grids
// =============================================================================

/// Synthetic rows: the cartesian product of the given values, with every
/// other model variable at its typical value (mean / reference level).
///
/// The first listed variable varies slowest.
///
/// # Example
/// ```ignore
/// let grid = reference_grid(&model, &[
///     ("flipper_len".to_string(), span_of(&model, "flipper_len", 20)?),
///     ("species".to_string(), vec![Value::from("Adelie"), Value::from("Gentoo")]),
/// ])?;
/// ```
pub fn reference_grid(model: &dyn FittedModel, values: &[(String, Vec<Value>)]) -> Result<Dataset> {
    let design = model.design();
    let mut checked: Vec<(String, Vec<Value>)> = Vec::with_capacity(values.len());
    for (name, vals) in values {
        let variable = design
            .variable(name)
            .ok_or_else(|| RustyMarginsError::TermNotInModel(name.clone()))?;
        if vals.is_empty() {
            return Err(RustyMarginsError::EmptyInput(format!("no grid values for '{}'", name)));
        }
        let vals = vals
            .iter()
            .map(|v| normalise_value(variable, v))
            .collect::<Result<Vec<_>>>()?;
        checked.push((name.clone(), vals));
    }

    // Cartesian product, first variable slowest
    let mut combos: Vec<Vec<(String, Value)>> = vec![Vec::new()];
    for (name, vals) in &checked {
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                vals.iter().map(move |v| {
                    let mut next = prefix.clone();
                    next.push((name.clone(), v.clone()));
                    next
                })
            })
            .collect();
    }

    let reference = design.reference_values();
    let records: Vec<Vec<(String, Value)>> = combos
        .into_iter()
        .map(|combo| {
            reference
                .iter()
                .map(|(name, typical)| {
                    let value = combo
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_else(|| typical.clone());
                    (name.clone(), value)
                })
                .collect()
        })
        .collect();
    Dataset::from_records(&records)
}

/// The fitted levels of a categorical model variable, as grid values.
pub fn levels_of(model: &dyn FittedModel, name: &str) -> Result<Vec<Value>> {
    let variable = model
        .design()
        .variable(name)
        .ok_or_else(|| RustyMarginsError::TermNotInModel(name.to_string()))?;
    match &variable.kind {
        VariableKind::Categorical { levels } => Ok(levels.iter().map(|l| Value::Level(l.clone())).collect()),
        VariableKind::Numeric { .. } => Err(RustyMarginsError::ColumnType {
            name: name.to_string(),
            expected: "categorical",
            actual: "numeric",
        }),
    }
}

/// `n` evenly spaced values across the training range of a numeric variable.
pub fn span_of(model: &dyn FittedModel, name: &str, n: usize) -> Result<Vec<Value>> {
    let variable = model
        .design()
        .variable(name)
        .ok_or_else(|| RustyMarginsError::TermNotInModel(name.to_string()))?;
    match variable.kind {
        VariableKind::Numeric { lower, upper, .. } => {
            if n < 2 {
                return Err(RustyMarginsError::InvalidValue(format!("a span needs at least 2 points, got {}", n)));
            }
            let step = (upper - lower) / (n - 1) as f64;
            Ok((0..n).map(|i| Value::Number(lower + step * i as f64)).collect())
        }
        VariableKind::Categorical { .. } => Err(RustyMarginsError::ColumnType {
            name: name.to_string(),
            expected: "numeric",
            actual: "categorical",
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
