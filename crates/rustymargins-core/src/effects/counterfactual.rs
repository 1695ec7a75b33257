// =============================================================================
// Counterfactual Rows
// =============================================================================
//
// Every effect in this crate has the same shape:
//
//     effect(β) = mean_r [ h(x_hi,r'β) - h(x_lo,r'β) ] / denom
//
//   - slope:     x_hi / x_lo are the rows with the focal variable at x ± step/2,
//                denom = step
//   - contrast:  x_hi / x_lo are the rows with the focal factor at `to` and
//                `from`, denom = 1
//   - h is the identity on the link scale and g⁻¹ on the response scale
//   - the mean runs over the rows the conditioning policy selects
//
// On the link scale the effect is linear in β with gradient
//
//     J = mean_r (x_hi,r - x_lo,r) / denom
//
// On the response scale the chain rule gives
//
//     J = mean_r (h'(η_hi,r) x_hi,r - h'(η_lo,r) x_lo,r) / denom
//
// Averaging the Jacobian BEFORE forming J V J' is what makes the standard
// error of an average effect account for the correlation between rows.
//
// =============================================================================

use ndarray::{Array1, Array2, Axis};

use crate::data::{Dataset, Value};
use crate::design::{Variable, VariableKind};
use crate::effects::Scale;
use crate::error::{Result, RustyMarginsError};
use crate::links::Link;
use crate::model::FittedModel;

/// Paired model-matrix rows whose averaged difference is the effect.
#[derive(Debug, Clone)]
pub struct Counterfactual {
    pub x_hi: Array2<f64>,
    pub x_lo: Array2<f64>,
    pub denom: f64,
}

impl Counterfactual {
    /// Effect value at coefficients `beta`.
    pub fn value(&self, beta: &Array1<f64>, link: &dyn Link, scale: Scale) -> f64 {
        let eta_hi = self.x_hi.dot(beta);
        let eta_lo = self.x_lo.dot(beta);
        let diffs: Array1<f64> = match scale {
            Scale::Link => &eta_hi - &eta_lo,
            Scale::Response => &link.inverse(&eta_hi) - &link.inverse(&eta_lo),
        };
        diffs.mean().unwrap_or(f64::NAN) / self.denom
    }

    /// Gradient of the effect with respect to β.
    pub fn gradient(&self, beta: &Array1<f64>, link: &dyn Link, scale: Scale) -> Array1<f64> {
        let rows: Array2<f64> = match scale {
            Scale::Link => &self.x_hi - &self.x_lo,
            Scale::Response => {
                let d_hi = link.inverse_derivative(&self.x_hi.dot(beta));
                let d_lo = link.inverse_derivative(&self.x_lo.dot(beta));
                &self.x_hi * &d_hi.insert_axis(Axis(1)) - &self.x_lo * &d_lo.insert_axis(Axis(1))
            }
        };
        let p = rows.ncols();
        rows.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p)) / self.denom
    }
}

/// Encode a slope counterfactual: every row's focal value moved by ±step/2.
pub fn slope(model: &dyn FittedModel, base: &Dataset, focal: &str, step: f64) -> Result<Counterfactual> {
    let mut hi = base.clone();
    let mut lo = base.clone();
    hi.map_numeric(focal, |x| x + step / 2.0)?;
    lo.map_numeric(focal, |x| x - step / 2.0)?;
    Ok(Counterfactual {
        x_hi: model.model_matrix(&hi)?,
        x_lo: model.model_matrix(&lo)?,
        denom: step,
    })
}

/// Encode a level contrast: every row's focal factor set to `to` vs `from`.
pub fn contrast(model: &dyn FittedModel, base: &Dataset, focal: &str, from: &str, to: &str) -> Result<Counterfactual> {
    let mut hi = base.clone();
    let mut lo = base.clone();
    hi.fill(focal, &Value::from(to))?;
    lo.fill(focal, &Value::from(from))?;
    Ok(Counterfactual {
        x_hi: model.model_matrix(&hi)?,
        x_lo: model.model_matrix(&lo)?,
        denom: 1.0,
    })
}

/// Finite-difference step for a numeric variable: a fraction of its
/// training range, or the fraction itself when the range is degenerate.
pub fn step_for(variable: &Variable, step_scale: f64) -> f64 {
    match variable.kind {
        VariableKind::Numeric { lower, upper, .. } if upper > lower => step_scale * (upper - lower),
        _ => step_scale,
    }
}

/// Check a conditioning value against a model variable and normalise it.
///
/// Factors accept a level label or (for `C(year)`-style factors) a number;
/// numeric variables accept only numbers.
pub fn normalise_value(variable: &Variable, value: &Value) -> Result<Value> {
    match (&variable.kind, value) {
        (VariableKind::Numeric { .. }, Value::Number(_)) => Ok(value.clone()),
        (VariableKind::Numeric { .. }, Value::Level(_)) => Err(RustyMarginsError::ColumnType {
            name: variable.name.clone(),
            expected: "numeric",
            actual: "categorical",
        }),
        (VariableKind::Categorical { levels }, value) => {
            let label = value.to_string();
            if levels.contains(&label) {
                Ok(Value::Level(label))
            } else {
                Err(RustyMarginsError::UnknownLevel {
                    factor: variable.name.clone(),
                    level: label,
                })
            }
        }
    }
}

/// Reference values with some variables overridden, as one record.
pub fn reference_record(model: &dyn FittedModel, overrides: &[(String, Value)]) -> Vec<(String, Value)> {
    model
        .design()
        .reference_values()
        .into_iter()
        .map(|(name, value)| {
            let replaced = overrides
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
                .unwrap_or(value);
            (name, replaced)
        })
        .collect()
}

/// The observed rows restricted to those complete in the model's fixed variables.
pub fn observed_rows(model: &dyn FittedModel, data: &Dataset) -> Result<Dataset> {
    let names: Vec<&str> = model.design().fixed_variables().iter().map(String::as_str).collect();
    for name in &names {
        if !data.has_column(name) {
            return Err(RustyMarginsError::UnknownColumn(name.to_string()));
        }
    }
    let rows = data.complete_cases(&names)?;
    if rows.n_rows() == 0 {
        return Err(RustyMarginsError::EmptyInput(
            "no complete rows to average effects over".to_string(),
        ));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{IdentityLink, LogLink};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_link_scale_gradient_is_averaged_difference() {
        let cf = Counterfactual {
            x_hi: array![[1.0, 2.0], [1.0, 4.0]],
            x_lo: array![[1.0, 1.0], [1.0, 2.0]],
            denom: 0.5,
        };
        let beta = array![3.0, 0.5];
        let g = cf.gradient(&beta, &IdentityLink, Scale::Link);
        assert_abs_diff_eq!(g[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g[1], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cf.value(&beta, &IdentityLink, Scale::Link), g.dot(&beta), epsilon = 1e-12);
    }

    #[test]
    fn test_response_scale_gradient_matches_finite_difference() {
        let cf = Counterfactual {
            x_hi: array![[1.0, 0.6], [1.0, 1.1]],
            x_lo: array![[1.0, 0.4], [1.0, 0.9]],
            denom: 0.2,
        };
        let beta = array![0.3, 0.8];
        let g = cf.gradient(&beta, &LogLink, Scale::Response);
        let h = 1e-6;
        for j in 0..2 {
            let mut up = beta.clone();
            let mut down = beta.clone();
            up[j] += h;
            down[j] -= h;
            let numeric = (cf.value(&up, &LogLink, Scale::Response) - cf.value(&down, &LogLink, Scale::Response)) / (2.0 * h);
            assert_abs_diff_eq!(g[j], numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_step_and_normalise() {
        let x = Variable {
            name: "x".to_string(),
            kind: VariableKind::Numeric { mean: 1.0, lower: 0.0, upper: 50.0 },
        };
        assert_abs_diff_eq!(step_for(&x, 1e-4), 5e-3, epsilon = 1e-15);
        assert!(normalise_value(&x, &Value::from("a")).is_err());

        let year = Variable {
            name: "year".to_string(),
            kind: VariableKind::Categorical {
                levels: vec!["2007".to_string(), "2008".to_string()],
            },
        };
        assert_eq!(normalise_value(&year, &Value::Number(2008.0)).unwrap(), Value::from("2008"));
        assert!(matches!(
            normalise_value(&year, &Value::from("2010")),
            Err(RustyMarginsError::UnknownLevel { .. })
        ));
    }
}
