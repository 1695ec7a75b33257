// =============================================================================
// Linear and Generalized Linear Models
// =============================================================================
//
//     g(E[y]) = Xβ
//
// `LinearModel::fit` is ordinary least squares (Gaussian family, identity
// link). `LinearModel::fit_glm` takes any family and link and runs IRLS.
//
// Var(β̂) = φ (X'WX)⁻¹ with φ = RSS / (n - p) for the Gaussian family and
// φ = 1 for Poisson and Binomial.
//
// =============================================================================

use ndarray::{Array1, Array2};

use crate::data::Dataset;
use crate::design::{DesignOptions, DesignSpec};
use crate::error::Result;
use crate::families::{Family, GaussianFamily};
use crate::links::{IdentityLink, Link};
use crate::model::{prepare, reject_random_terms, FittedModel, ModelKind};
use crate::solvers::{fit_glm, IRLSConfig, IRLSResult};

/// A fitted (generalized) linear model.
#[derive(Debug)]
pub struct LinearModel {
    formula: String,
    kind: ModelKind,
    design: DesignSpec,
    data: Dataset,
    family: Box<dyn Family>,
    link: Box<dyn Link>,
    fit: IRLSResult,
    dispersion: f64,
    covariance: Array2<f64>,
}

impl LinearModel {
    /// Ordinary least squares.
    pub fn fit(formula: &str, data: &Dataset) -> Result<Self> {
        Self::fit_glm(formula, data, Box::new(GaussianFamily), Box::new(IdentityLink))
    }

    /// Generalized linear model by IRLS.
    ///
    /// # Arguments
    /// * `formula` - e.g. "body_mass ~ flipper_len + C(species)"
    /// * `data` - Observations; incomplete rows are dropped
    /// * `family` / `link` - Response distribution and link function
    pub fn fit_glm(formula: &str, data: &Dataset, family: Box<dyn Family>, link: Box<dyn Link>) -> Result<Self> {
        Self::fit_with(formula, data, family, link, &IRLSConfig::default())
    }

    pub fn fit_with(
        formula: &str,
        data: &Dataset,
        family: Box<dyn Family>,
        link: Box<dyn Link>,
        config: &IRLSConfig,
    ) -> Result<Self> {
        let prepared = prepare(formula, data, &DesignOptions::default())?;
        reject_random_terms(&prepared.parsed, "LinearModel")?;

        let fit = fit_glm(&prepared.y, &prepared.x, family.as_ref(), link.as_ref(), config)?;

        let n = prepared.x.nrows();
        let p = prepared.x.ncols();
        let dispersion = if family.fixed_dispersion() {
            1.0
        } else {
            // Pearson estimate; equals RSS / (n - p) for the Gaussian family
            let variance = family.variance(&fit.fitted_values);
            let pearson: f64 = prepared
                .y
                .iter()
                .zip(fit.fitted_values.iter())
                .zip(variance.iter())
                .map(|((&y, &mu), &v)| (y - mu).powi(2) / v)
                .sum();
            pearson / (n - p) as f64
        };
        let covariance = &fit.covariance_unscaled * dispersion;

        let kind = if family.name() == "Gaussian" && link.name() == "identity" {
            ModelKind::Linear
        } else {
            ModelKind::Generalized
        };

        log::info!(
            "fitted {:?} model '{}' on {} rows: {} coefficients, deviance = {:.4}, dispersion = {:.4}",
            kind,
            formula,
            n,
            p,
            fit.deviance,
            dispersion
        );

        Ok(Self {
            formula: formula.to_string(),
            kind,
            design: prepared.design,
            data: prepared.data,
            family,
            link,
            fit,
            dispersion,
            covariance,
        })
    }

    pub fn dispersion(&self) -> f64 {
        self.dispersion
    }

    /// Residual standard deviation √φ.
    pub fn sigma(&self) -> f64 {
        self.dispersion.sqrt()
    }

    pub fn deviance(&self) -> f64 {
        self.fit.deviance
    }

    pub fn fitted_values(&self) -> &Array1<f64> {
        &self.fit.fitted_values
    }

    pub fn converged(&self) -> bool {
        self.fit.converged
    }

    pub fn iterations(&self) -> usize {
        self.fit.iterations
    }
}

impl FittedModel for LinearModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn formula(&self) -> &str {
        &self.formula
    }

    fn design(&self) -> &DesignSpec {
        &self.design
    }

    fn data(&self) -> &Dataset {
        &self.data
    }

    fn coefficients(&self) -> &Array1<f64> {
        &self.fit.coefficients
    }

    fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    fn link(&self) -> &dyn Link {
        self.link.as_ref()
    }

    fn family_name(&self) -> &str {
        self.family.name()
    }

    fn df_residual(&self) -> f64 {
        (self.fit.fitted_values.len() - self.fit.coefficients.len()) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RustyMarginsError;
    use crate::families::PoissonFamily;
    use crate::links::LogLink;
    use approx::assert_abs_diff_eq;

    fn data() -> Dataset {
        Dataset::new()
            .with_numeric("y", vec![3.1, 4.9, 7.2, 8.8, 11.1, 5.0, 7.1, 8.9, 11.2, 12.8])
            .unwrap()
            .with_numeric("x", vec![1.0, 2.0, 3.0, 4.0, 5.0, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap()
            .with_factor("g", &["a", "a", "a", "a", "a", "b", "b", "b", "b", "b"])
            .unwrap()
    }

    #[test]
    fn test_ols_with_factor() {
        let model = LinearModel::fit("y ~ x + g", &data()).unwrap();
        assert_eq!(model.kind(), ModelKind::Linear);
        assert_eq!(model.coefficient_names(), &["(Intercept)", "x", "g[b]"]);
        // Group b sits about 2 above group a at every x
        assert_abs_diff_eq!(model.coefficient("g[b]").unwrap(), 2.0, epsilon = 0.1);
        assert_abs_diff_eq!(model.coefficient("x").unwrap(), 1.98, epsilon = 0.05);
        assert_eq!(model.df_residual(), 7.0);

        // Var(β̂) = σ̂² (X'X)⁻¹ with σ̂² = RSS / (n - p)
        let rss: f64 = model
            .data()
            .numeric("y")
            .unwrap()
            .iter()
            .zip(model.fitted_values().iter())
            .map(|(y, m)| (y - m).powi(2))
            .sum();
        assert_abs_diff_eq!(model.dispersion(), rss / 7.0, epsilon = 1e-10);
    }

    #[test]
    fn test_no_intercept_gives_one_mean_per_level() {
        let data = Dataset::new()
            .with_numeric("y", vec![9.0, 11.0, 19.0, 21.0, 29.0, 31.0])
            .unwrap()
            .with_factor("g", &["a", "a", "b", "b", "c", "c"])
            .unwrap();
        for formula in ["y ~ 0 + g", "y ~ g - 1"] {
            let model = LinearModel::fit(formula, &data).unwrap();
            assert_eq!(model.coefficient_names(), &["g[a]", "g[b]", "g[c]"]);
            assert_abs_diff_eq!(model.coefficient("g[a]").unwrap(), 10.0, epsilon = 1e-10);
            assert_abs_diff_eq!(model.coefficient("g[b]").unwrap(), 20.0, epsilon = 1e-10);
            assert_abs_diff_eq!(model.coefficient("g[c]").unwrap(), 30.0, epsilon = 1e-10);
            assert_abs_diff_eq!(model.fitted_values()[0], 10.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_poisson_glm_has_unit_dispersion() {
        let counts = Dataset::new()
            .with_numeric("n", vec![1.0, 2.0, 2.0, 4.0, 6.0, 9.0])
            .unwrap()
            .with_numeric("t", vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        let model = LinearModel::fit_glm("n ~ t", &counts, Box::new(PoissonFamily), Box::new(LogLink)).unwrap();
        assert_eq!(model.kind(), ModelKind::Generalized);
        assert_eq!(model.dispersion(), 1.0);
        assert!(model.coefficient("t").unwrap() > 0.0);
        assert_eq!(model.link().name(), "log");
    }

    #[test]
    fn test_random_terms_rejected() {
        let err = LinearModel::fit("y ~ x + (1 | g)", &data()).unwrap_err();
        assert!(matches!(err, RustyMarginsError::FormulaError(_)));
    }

    #[test]
    fn test_unknown_column_is_fatal() {
        let err = LinearModel::fit("y ~ flipper", &data()).unwrap_err();
        assert_eq!(err, RustyMarginsError::UnknownColumn("flipper".to_string()));
    }
}
