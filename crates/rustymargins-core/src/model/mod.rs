// =============================================================================
// Fitted Models
// =============================================================================
//
// Every model kind the effect machinery works with exposes the same small
// surface through the `FittedModel` trait:
//
//   - the frozen design (how to turn any dataset into X)
//   - the coefficient vector β̂ and its covariance Var(β̂)
//   - the link function (for response-scale effects)
//   - the residual degrees of freedom (for t-based intervals)
//
// That is all an effect needs: an effect is a function of β, evaluated at
// counterfactual rows of X, with uncertainty propagated from Var(β̂).
//
// MODEL KINDS
// -----------
//   LinearModel    Gaussian/identity by least squares, or any family/link
//                  by IRLS (`fit_glm`). Interaction models are linear
//                  models whose formula has interactions.
//   AdditiveModel  smooth terms s(x) with GCV-selected penalties.
//   MixedModel     Gaussian LMM with one grouping factor, fitted by REML.
//                  Its β̂ and Var(β̂) are the population-level (fixed) part;
//                  random effects are available separately.
//
// Rows with a missing value in any variable the formula uses are dropped
// before fitting; `FittedModel::data` returns the rows actually used.
//
// =============================================================================

mod additive;
mod linear;
mod mixed;

pub use additive::{AdditiveConfig, AdditiveModel};
pub use linear::LinearModel;
pub use mixed::{MixedConfig, MixedModel};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::design::{DesignOptions, DesignSpec, RandomDesign};
use crate::error::{Result, RustyMarginsError};
use crate::formula::{parse_formula, ParsedFormula};
use crate::inference::{confidence_interval, pvalue, significance_stars, Distribution};
use crate::links::Link;

/// Which fitting procedure produced a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    Linear,
    Generalized,
    Additive,
    Mixed,
}

/// The read-only surface every fitted model offers to effects and predictions.
pub trait FittedModel: std::fmt::Debug {
    fn kind(&self) -> ModelKind;

    /// The formula as written by the caller.
    fn formula(&self) -> &str;

    /// Frozen encodings for building model matrices.
    fn design(&self) -> &DesignSpec;

    /// The rows the model was fitted on.
    fn data(&self) -> &Dataset;

    /// Fixed-effect coefficients β̂.
    fn coefficients(&self) -> &Array1<f64>;

    /// Var(β̂), scaled by the dispersion.
    fn covariance(&self) -> &Array2<f64>;

    fn link(&self) -> &dyn Link;

    fn family_name(&self) -> &str;

    /// Residual degrees of freedom (n - p, or n - edf when penalised).
    fn df_residual(&self) -> f64;

    fn n_obs(&self) -> usize {
        self.data().n_rows()
    }

    /// Random-effect estimates; `None` for models without random terms.
    fn random_effects(&self) -> Option<&RandomEffects> {
        None
    }

    fn coefficient_names(&self) -> &[String] {
        self.design().column_names()
    }

    fn model_matrix(&self, data: &Dataset) -> Result<Array2<f64>> {
        self.design().model_matrix(data)
    }

    /// η = Xβ̂ for the rows of `data`.
    fn linear_predictor(&self, data: &Dataset) -> Result<Array1<f64>> {
        Ok(self.model_matrix(data)?.dot(self.coefficients()))
    }

    /// Look up one coefficient by its column name, e.g. "bill_len:species[Gentoo]".
    fn coefficient(&self, name: &str) -> Result<f64> {
        self.design()
            .column_index(name)
            .map(|j| self.coefficients()[j])
            .ok_or_else(|| RustyMarginsError::TermNotInModel(name.to_string()))
    }
}

// =============================================================================
// Random effects
// =============================================================================

/// Estimated random-effect structure of a mixed model.
#[derive(Debug, Clone)]
pub struct RandomEffects {
    pub design: RandomDesign,
    /// Σ_b: covariance of one group's random coefficients (q × q)
    pub covariance: Array2<f64>,
    /// Conditional modes, one row per group level (G × q)
    pub blups: Array2<f64>,
    /// Residual variance σ̂²
    pub sigma2: f64,
    /// Relative covariance factor parameters from REML
    pub theta: Vec<f64>,
}

impl RandomEffects {
    pub fn group_index(&self, level: &str) -> Result<usize> {
        self.design
            .levels
            .iter()
            .position(|l| l == level)
            .ok_or_else(|| RustyMarginsError::UnknownLevel {
                factor: self.design.group.clone(),
                level: level.to_string(),
            })
    }

    /// Random coefficients of one group.
    pub fn blup(&self, level: &str) -> Result<Array1<f64>> {
        let g = self.group_index(level)?;
        Ok(self.blups.row(g).to_owned())
    }

    /// Standard deviations of the random coefficients, then the residual.
    pub fn standard_deviations(&self) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .design
            .column_names()
            .into_iter()
            .enumerate()
            .map(|(j, name)| (format!("{}: {}", self.design.group, name), self.covariance[[j, j]].sqrt()))
            .collect();
        out.push(("Residual".to_string(), self.sigma2.sqrt()));
        out
    }
}

// =============================================================================
// Shared fitting preparation
// =============================================================================

/// Parsed formula, frozen design and the complete-case data it was built on.
pub(crate) struct Prepared {
    pub parsed: ParsedFormula,
    pub design: DesignSpec,
    pub data: Dataset,
    pub y: Array1<f64>,
    pub x: Array2<f64>,
}

pub(crate) fn prepare(formula: &str, data: &Dataset, options: &DesignOptions) -> Result<Prepared> {
    let parsed = parse_formula(formula)?;

    let mut used: Vec<String> = vec![parsed.response.clone()];
    used.extend(parsed.variables());
    let used_refs: Vec<&str> = used.iter().map(String::as_str).collect();
    let data = data.complete_cases(&used_refs)?;
    if data.n_rows() == 0 {
        return Err(RustyMarginsError::EmptyInput(
            "no complete rows for the variables in the formula".to_string(),
        ));
    }

    let design = DesignSpec::new(&parsed, &data, options)?;
    let y = design.response(&data)?;
    let x = design.model_matrix(&data)?;
    if x.nrows() <= x.ncols() {
        return Err(RustyMarginsError::InvalidValue(format!(
            "{} observations cannot support {} coefficients",
            x.nrows(),
            x.ncols()
        )));
    }
    Ok(Prepared {
        parsed,
        design,
        data,
        y,
        x,
    })
}

pub(crate) fn reject_random_terms(parsed: &ParsedFormula, model: &str) -> Result<()> {
    if parsed.random_terms.is_empty() {
        Ok(())
    } else {
        Err(RustyMarginsError::FormulaError(format!(
            "random-effect terms are not supported by {}; use MixedModel",
            model
        )))
    }
}

// =============================================================================
// Coefficient table
// =============================================================================

/// One row of a coefficient summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub conf_low: f64,
    pub conf_high: f64,
    pub stars: String,
}

/// Estimates, standard errors, tests and intervals for every coefficient.
pub fn coefficient_table(
    model: &dyn FittedModel,
    confidence: f64,
    distribution: Distribution,
) -> Vec<CoefficientRow> {
    let beta = model.coefficients();
    let cov = model.covariance();
    let df = model.df_residual();
    model
        .coefficient_names()
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let estimate = beta[j];
            let std_error = cov[[j, j]].max(0.0).sqrt();
            let statistic = estimate / std_error;
            let p_value = pvalue(statistic, distribution, df);
            let (conf_low, conf_high) = confidence_interval(estimate, std_error, distribution, df, confidence);
            CoefficientRow {
                term: name.clone(),
                estimate,
                std_error,
                statistic,
                p_value,
                conf_low,
                conf_high,
                stars: significance_stars(p_value).to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn data() -> Dataset {
        Dataset::new()
            .with_numeric("y", vec![1.1, 2.9, 5.2, 7.1, 8.8, f64::NAN, 13.2])
            .unwrap()
            .with_numeric("x", vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap()
            .with_factor("unused", &["a", "", "b", "a", "b", "a", "b"])
            .unwrap()
    }

    #[test]
    fn test_prepare_drops_incomplete_rows_of_used_columns_only() {
        let prepared = prepare("y ~ x", &data(), &DesignOptions::default()).unwrap();
        // Row 5 has a missing response; the missing "unused" label is ignored
        assert_eq!(prepared.data.n_rows(), 6);
        assert_eq!(prepared.x.dim(), (6, 2));
    }

    #[test]
    fn test_prepare_rejects_too_few_rows() {
        let tiny = Dataset::new()
            .with_numeric("y", vec![1.0, 2.0])
            .unwrap()
            .with_numeric("x", vec![1.0, 2.0])
            .unwrap();
        assert!(matches!(
            prepare("y ~ x", &tiny, &DesignOptions::default()),
            Err(RustyMarginsError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_coefficient_table() {
        let model = LinearModel::fit("y ~ x", &data()).unwrap();
        let table = coefficient_table(&model, 0.95, Distribution::StudentT);
        assert_eq!(table.len(), 2);
        assert_eq!(table[1].term, "x");
        assert_abs_diff_eq!(table[1].statistic, table[1].estimate / table[1].std_error, epsilon = 1e-12);
        assert!(table[1].conf_low < table[1].estimate && table[1].estimate < table[1].conf_high);
        assert_eq!(table[1].stars, "***");
        assert!(matches!(model.coefficient("z"), Err(RustyMarginsError::TermNotInModel(_))));
    }
}
