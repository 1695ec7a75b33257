// =============================================================================
// Linear Mixed Models
// =============================================================================
//
//     y = Xβ + Z b + ε,   b_g ~ N(0, Σ_b),   ε ~ N(0, σ² I)
//
// Formula syntax follows lme4: `mass ~ bill_len + (1 | island)` gives every
// island its own intercept deviation; `(1 + bill_len | island)` adds a
// correlated slope deviation.
//
// Effects and FixedOnly predictions use the population-level part β̂ with
// Var(β̂) = σ̂²(X'V⁻¹X)⁻¹. The random part enters predictions only when
// asked for: averaged over groups (wider intervals) or for one named group.
//
// =============================================================================

use ndarray::{Array1, Array2};

use crate::data::Dataset;
use crate::design::{DesignOptions, DesignSpec};
use crate::error::{Result, RustyMarginsError};
use crate::links::{IdentityLink, Link};
use crate::model::{prepare, FittedModel, ModelKind, RandomEffects};
use crate::solvers::{fit_lmm_reml, RemlConfig};

/// Configuration for mixed-model fitting.
#[derive(Debug, Clone, Default)]
pub struct MixedConfig {
    pub design: DesignOptions,
    pub reml: RemlConfig,
}

/// A linear mixed model fitted by REML.
#[derive(Debug)]
pub struct MixedModel {
    formula: String,
    design: DesignSpec,
    data: Dataset,
    link: IdentityLink,
    coefficients: Array1<f64>,
    covariance: Array2<f64>,
    random: RandomEffects,
    reml_criterion: f64,
}

impl MixedModel {
    pub fn fit(formula: &str, data: &Dataset) -> Result<Self> {
        Self::fit_with(formula, data, &MixedConfig::default())
    }

    pub fn fit_with(formula: &str, data: &Dataset, config: &MixedConfig) -> Result<Self> {
        let prepared = prepare(formula, data, &config.design)?;
        let random_design = prepared.design.random().cloned().ok_or_else(|| {
            RustyMarginsError::FormulaError(format!(
                "mixed model formula '{}' has no random-effect term such as (1 | group)",
                formula
            ))
        })?;

        let z = random_design.z_matrix(&prepared.data)?;
        let groups: Vec<usize> = random_design
            .group_codes(&prepared.data)?
            .into_iter()
            .enumerate()
            .map(|(row, code)| {
                code.ok_or_else(|| {
                    RustyMarginsError::InvalidValue(format!(
                        "row {} has no level of grouping factor '{}'",
                        row, random_design.group
                    ))
                })
            })
            .collect::<Result<_>>()?;

        let fit = fit_lmm_reml(
            &prepared.y,
            &prepared.x,
            &z,
            &groups,
            random_design.levels.len(),
            &config.reml,
        )?;

        log::info!(
            "fitted mixed model '{}' on {} rows, {} groups: sigma = {:.4}, REML criterion = {:.4}",
            formula,
            prepared.y.len(),
            random_design.levels.len(),
            fit.sigma2.sqrt(),
            fit.reml_criterion
        );

        Ok(Self {
            formula: formula.to_string(),
            design: prepared.design,
            data: prepared.data,
            link: IdentityLink,
            coefficients: fit.coefficients,
            covariance: fit.covariance,
            random: RandomEffects {
                design: random_design,
                covariance: fit.random_covariance,
                blups: fit.blups,
                sigma2: fit.sigma2,
                theta: fit.theta,
            },
            reml_criterion: fit.reml_criterion,
        })
    }

    /// Residual variance σ̂².
    pub fn sigma2(&self) -> f64 {
        self.random.sigma2
    }

    pub fn reml_criterion(&self) -> f64 {
        self.reml_criterion
    }
}

impl FittedModel for MixedModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Mixed
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
        &self.coefficients
    }

    fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    fn link(&self) -> &dyn Link {
        &self.link
    }

    fn family_name(&self) -> &str {
        "Gaussian"
    }

    fn df_residual(&self) -> f64 {
        (self.n_obs() - self.coefficients.len()) as f64
    }

    fn random_effects(&self) -> Option<&RandomEffects> {
        Some(&self.random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grouped() -> Dataset {
        // Four sites with shifted intercepts, common slope 0.5
        let shifts = [-2.0, 1.0, 0.5, 3.0];
        let wobble = [0.3, -0.2, 0.1, -0.3, 0.2, -0.1];
        let mut y = Vec::new();
        let mut x = Vec::new();
        let mut site = Vec::new();
        for (g, shift) in shifts.iter().enumerate() {
            for (i, w) in wobble.iter().enumerate() {
                let xi = i as f64;
                x.push(xi);
                y.push(10.0 + shift + 0.5 * xi + w);
                site.push(format!("site{}", g));
            }
        }
        Dataset::new()
            .with_numeric("y", y)
            .unwrap()
            .with_numeric("x", x)
            .unwrap()
            .with_factor("site", &site)
            .unwrap()
    }

    #[test]
    fn test_random_intercept_fit() {
        let model = MixedModel::fit("y ~ x + (1 | site)", &grouped()).unwrap();
        assert_eq!(model.kind(), ModelKind::Mixed);
        assert_eq!(model.coefficient_names(), &["(Intercept)", "x"]);
        // x repeats identically within every site, so GLS and OLS slopes agree:
        // 0.5 + Σ(x - 2.5)·wobble / Sxx
        assert_abs_diff_eq!(model.coefficient("x").unwrap(), 0.5 - 0.6 / 17.5, epsilon = 1e-6);

        let re = model.random_effects().unwrap();
        assert_eq!(re.blups.dim(), (4, 1));
        // Site 3 sits highest, site 0 lowest
        assert!(re.blup("site3").unwrap()[0] > re.blup("site0").unwrap()[0]);
        assert!(re.covariance[[0, 0]] > model.sigma2());
        assert!(matches!(re.blup("nowhere"), Err(RustyMarginsError::UnknownLevel { .. })));
        assert_eq!(re.standard_deviations().len(), 2);
    }

    #[test]
    fn test_formula_without_random_term_rejected() {
        let err = MixedModel::fit("y ~ x", &grouped()).unwrap_err();
        assert!(matches!(err, RustyMarginsError::FormulaError(_)));
    }
}
