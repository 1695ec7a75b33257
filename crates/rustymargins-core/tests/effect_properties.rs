//! Properties every effect estimate must satisfy, whatever the data.
//!
//! - Without interactions, Reference and Average slopes agree
//! - With an interaction, the conditioned slope is base + interaction coefficient
//! - Adding random-effect variance never narrows a prediction interval
//! - Level contrasts are antisymmetric
//! - A known slope is recovered, with a standard error that shrinks with n

mod common;

use approx::assert_abs_diff_eq;
use proptest::prelude::*;
use rustymargins_core::{
    estimate_effects, predict, reference_grid, span_of, ConditioningPolicy, Contrast, EffectConfig, EffectRequest,
    FittedModel, LinearModel, MixedModel, PredictionConfig, RandomEffectMode, Scale, Value,
};

fn slope(model: &dyn FittedModel, data: &rustymargins_core::Dataset, policy: ConditioningPolicy) -> (f64, f64) {
    let effects = estimate_effects(model, data, &EffectRequest::new("x", policy), &EffectConfig::default()).unwrap();
    (effects[0].estimate, effects[0].std_error)
}

// ============================================================================
// Known slope
// ============================================================================

#[test]
fn test_recovers_known_slope_with_small_standard_error() {
    let data = common::straight_line(1000, 2024);
    let model = LinearModel::fit("y ~ x", &data).unwrap();
    let (estimate, se) = slope(&model, &data, ConditioningPolicy::Reference);
    assert_abs_diff_eq!(estimate, 2.0, epsilon = 0.05);
    assert!(se < 0.05, "SE = {}", se);
    assert_abs_diff_eq!(model.coefficient("(Intercept)").unwrap(), 1.0, epsilon = 0.3);
}

#[test]
fn test_standard_error_shrinks_with_sample_size() {
    let ses: Vec<f64> = [50, 200, 1000]
        .iter()
        .map(|&n| {
            let data = common::straight_line(n, 7);
            let model = LinearModel::fit("y ~ x", &data).unwrap();
            slope(&model, &data, ConditioningPolicy::Reference).1
        })
        .collect();
    assert!(ses[0] > ses[1] && ses[1] > ses[2], "{:?}", ses);
}

// ============================================================================
// Interaction models
// ============================================================================

#[test]
fn test_conditioned_slope_is_base_plus_interaction() {
    let data = common::grouped_lines(90, 5, [1.0, 2.0, -0.5]);
    let model = LinearModel::fit("y ~ x * g", &data).unwrap();
    let base = model.coefficient("x").unwrap();
    for level in ["b", "c"] {
        let policy = ConditioningPolicy::Condition(vec![("g".to_string(), Value::from(level))]);
        let (estimate, _) = slope(&model, &data, policy);
        let extra = model.coefficient(&format!("x:g[{}]", level)).unwrap();
        assert_abs_diff_eq!(estimate, base + extra, epsilon = 1e-6);
    }
    let (at_reference, _) = slope(&model, &data, ConditioningPolicy::Reference);
    assert_abs_diff_eq!(at_reference, base, epsilon = 1e-6);
}

#[test]
fn test_average_slope_weights_levels_by_frequency() {
    // 91 rows: levels a, b, c appear 31, 30, 30 times
    let data = common::grouped_lines(91, 9, [1.0, 2.0, -0.5]);
    let model = LinearModel::fit("y ~ x * g", &data).unwrap();
    let by = estimate_effects(
        &model,
        &data,
        &EffectRequest::new("x", ConditioningPolicy::By("g".to_string())),
        &EffectConfig::default(),
    )
    .unwrap();
    let weighted = (31.0 * by[0].estimate + 30.0 * by[1].estimate + 30.0 * by[2].estimate) / 91.0;
    let (average, _) = slope(&model, &data, ConditioningPolicy::Average);
    assert_abs_diff_eq!(average, weighted, epsilon = 1e-6);

    let equal = by.iter().map(|e| e.estimate).sum::<f64>() / 3.0;
    let (over, _) = slope(&model, &data, ConditioningPolicy::AverageOver("g".to_string()));
    assert_abs_diff_eq!(over, equal, epsilon = 1e-6);
}

#[test]
fn test_contrast_without_intercept_uses_every_level() {
    let data = common::grouped_lines(90, 4, [0.0, 0.0, 0.0]);
    let model = LinearModel::fit("y ~ 0 + g", &data).unwrap();
    let means: Vec<f64> = ["a", "b", "c"]
        .iter()
        .map(|level| {
            let f = data.factor("g").unwrap();
            let y = data.numeric("y").unwrap();
            let rows: Vec<usize> = (0..f.len()).filter(|&i| f.label(i) == Some(*level)).collect();
            rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
        })
        .collect();
    for (level, mean) in ["a", "b", "c"].iter().zip(&means) {
        assert_abs_diff_eq!(model.coefficient(&format!("g[{}]", level)).unwrap(), *mean, epsilon = 1e-8);
    }

    let request = EffectRequest::new("g", ConditioningPolicy::Reference).with_contrast(Contrast::Levels {
        from: "a".to_string(),
        to: "b".to_string(),
    });
    let effect = estimate_effects(&model, &data, &request, &EffectConfig::default()).unwrap();
    assert_abs_diff_eq!(effect[0].estimate, means[1] - means[0], epsilon = 1e-8);

    let grid = reference_grid(&model, &[("g".to_string(), vec![Value::from("a")])]).unwrap();
    let at_a = predict(&model, &grid, &PredictionConfig::default()).unwrap();
    assert_abs_diff_eq!(at_a[0].estimate, means[0], epsilon = 1e-8);
}

// ============================================================================
// Random effects
// ============================================================================

#[test]
fn test_random_slope_model() {
    let data = common::grouped_lines(90, 3, [1.0, 2.0, -0.5]);
    let model = MixedModel::fit("y ~ x + (1 + x | g)", &data).unwrap();
    let random = model.random_effects().unwrap();
    assert_eq!(random.covariance.dim(), (2, 2));
    let sds = random.standard_deviations();
    assert_eq!(sds.len(), 3);
    assert_eq!(sds[1].0, "g: x");
    // Slopes 1, 2 and -0.5 differ by far more than the noise
    assert!(sds[1].1 > 0.3, "slope SD = {}", sds[1].1);

    // Added variance (1, x) Σ_b (1, x)' is smallest at x* = -Σ01 / Σ11
    let sigma = &random.covariance;
    let x_star = -sigma[[0, 1]] / sigma[[1, 1]];
    let offsets = [0.0, 0.5, 1.0, 2.0, 4.0];
    let grid_x: Vec<Value> = offsets.iter().map(|d| Value::Number(x_star + d)).collect();
    let grid = reference_grid(&model, &[("x".to_string(), grid_x)]).unwrap();
    let config = |mode| PredictionConfig {
        scale: Scale::Link,
        mode,
        ..PredictionConfig::default()
    };
    let fixed = predict(&model, &grid, &config(RandomEffectMode::FixedOnly)).unwrap();
    let marginal = predict(&model, &grid, &config(RandomEffectMode::MarginalOverGroups)).unwrap();
    let mut previous = 0.0;
    for ((f, m), d) in fixed.iter().zip(&marginal).zip(offsets) {
        let x = x_star + d;
        let added = m.std_error.powi(2) - f.std_error.powi(2);
        let expected = sigma[[0, 0]] + 2.0 * x * sigma[[0, 1]] + x * x * sigma[[1, 1]];
        assert_abs_diff_eq!(added, expected, epsilon = 1e-8);
        assert!(added >= previous - 1e-12);
        previous = added;
    }

    // A named group shifts by its intercept and slope BLUPs
    let b = random.blup("c").unwrap();
    let in_c = predict(&model, &grid, &config(RandomEffectMode::Group("c".to_string()))).unwrap();
    for ((f, c), d) in fixed.iter().zip(&in_c).zip(offsets) {
        assert_abs_diff_eq!(c.estimate - f.estimate, b[0] + b[1] * (x_star + d), epsilon = 1e-8);
    }
    // Group c's slope (-0.5) is well below the population slope
    assert!(b[1] < 0.0);
}

#[test]
fn test_marginal_over_groups_interval_never_narrower() {
    for seed in [1_u64, 2, 3] {
        let data = common::grouped_lines(60, seed, [1.0, 1.0, 1.0]);
        let model = MixedModel::fit("y ~ x + (1 | g)", &data).unwrap();
        let grid = reference_grid(&model, &[("x".to_string(), span_of(&model, "x", 7).unwrap())]).unwrap();
        for scale in [Scale::Link, Scale::Response] {
            let fixed = PredictionConfig {
                scale,
                ..PredictionConfig::default()
            };
            let marginal = PredictionConfig {
                scale,
                mode: RandomEffectMode::MarginalOverGroups,
                ..PredictionConfig::default()
            };
            let a = predict(&model, &grid, &fixed).unwrap();
            let b = predict(&model, &grid, &marginal).unwrap();
            for (f, m) in a.iter().zip(&b) {
                assert_eq!(f.estimate, m.estimate);
                assert!(m.conf_high - m.conf_low >= f.conf_high - f.conf_low);
            }
        }
    }
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: in an additive linear model the slope does not depend on
    /// where it is evaluated
    #[test]
    fn prop_reference_equals_average_without_interaction(
        seed in any::<u64>(),
        n in 30usize..120,
        b in -3.0f64..3.0,
    ) {
        let data = common::grouped_lines(n, seed, [b, b, b]);
        let model = LinearModel::fit("y ~ x + g", &data).unwrap();
        let (reference, se_ref) = slope(&model, &data, ConditioningPolicy::Reference);
        let (average, se_avg) = slope(&model, &data, ConditioningPolicy::Average);
        prop_assert!((reference - average).abs() < 1e-6);
        prop_assert!((se_ref - se_avg).abs() < 1e-6);
    }

    /// Property: effect(A → B) = -effect(B → A) on either scale
    #[test]
    fn prop_contrasts_antisymmetric(
        seed in any::<u64>(),
        from in 0usize..3,
        shift in 1usize..3,
        average in any::<bool>(),
        response in any::<bool>(),
    ) {
        let levels = ["a", "b", "c"];
        let (a, b) = (levels[from], levels[(from + shift) % 3]);
        let data = common::grouped_lines(45, seed, [1.0, 0.5, 2.0]);
        let model = LinearModel::fit("y ~ x * g", &data).unwrap();
        let policy = if average { ConditioningPolicy::Average } else { ConditioningPolicy::Reference };
        let scale = if response { Scale::Response } else { Scale::Link };
        let run = |from: &str, to: &str| {
            let request = EffectRequest::new("g", policy.clone())
                .with_contrast(Contrast::Levels { from: from.to_string(), to: to.to_string() })
                .on_scale(scale);
            estimate_effects(&model, &data, &request, &EffectConfig::default()).unwrap().remove(0)
        };
        let forward = run(a, b);
        let backward = run(b, a);
        prop_assert!((forward.estimate + backward.estimate).abs() < 1e-9);
        prop_assert!((forward.std_error - backward.std_error).abs() < 1e-9);
        prop_assert!((forward.conf_low + backward.conf_high).abs() < 1e-9);
    }
}
