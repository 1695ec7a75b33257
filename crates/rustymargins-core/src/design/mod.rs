// =============================================================================
// Design Matrices
// =============================================================================
//
// Turns a parsed formula plus a dataset into the model matrix X. The same
// encodings are then reused to build X REPEATABLY for any other dataset.
//
// WHY "FROZEN" ENCODINGS?
// -----------------------
// An effect is computed by predicting on synthetic rows: the data with one
// variable nudged, or a reference row with every covariate at a typical
// value. Those rows must be encoded exactly like the training rows:
//
//   - the same factor levels, in the same order, with the same reference
//   - the same spline knots and centring constants
//
// `DesignSpec::new` resolves all of this once from the training data.
// `DesignSpec::model_matrix` then encodes any dataset with those choices.
//
// CODING
// ------
//   (Intercept)              column of ones
//   numeric x                one column "x"
//   factor g                 treatment dummies "g[level]" for each
//                            non-reference level (first level = reference)
//   factor g, margin absent  one dummy per level, reference included
//                            ("y ~ 0 + g", or g in "x:g" without x)
//   a:b                      products of the component columns, named
//                            "a:b[level]" etc.
//   s(x)                     centred B-spline columns "s(x).1", "s(x).2", …
//
// Random-effect terms "(1 + x | g)" do not enter X; they are described by a
// separate `RandomDesign` that builds the per-row Z columns and group codes.
//
// =============================================================================

use std::collections::HashMap;
use std::ops::Range;

use ndarray::{Array1, Array2};

use crate::data::{format_number, Column, Dataset, Value};
use crate::error::{Result, RustyMarginsError};
use crate::formula::ParsedFormula;
use crate::splines::SplineBasis;

/// Options for smooth-term bases.
#[derive(Debug, Clone)]
pub struct DesignOptions {
    /// Basis dimension for `s(x)` without an explicit `k`.
    /// Default: 10 (as mgcv)
    pub default_k: usize,

    /// B-spline degree. Default: 3 (cubic)
    pub degree: usize,

    /// Order of the difference penalty. Default: 2
    pub penalty_order: usize,
}

impl Default for DesignOptions {
    fn default() -> Self {
        Self {
            default_k: 10,
            degree: 3,
            penalty_order: 2,
        }
    }
}

/// Frozen encoding of one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableKind {
    /// Numeric covariate with its training mean and range.
    Numeric { mean: f64, lower: f64, upper: f64 },
    /// Factor with its fitted levels; the first is the reference.
    Categorical { levels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
}

impl Variable {
    pub fn is_categorical(&self) -> bool {
        matches!(self.kind, VariableKind::Categorical { .. })
    }

    /// Typical value: the mean for numerics, the reference level for factors.
    pub fn typical_value(&self) -> Value {
        match &self.kind {
            VariableKind::Numeric { mean, .. } => Value::Number(*mean),
            VariableKind::Categorical { levels } => Value::Level(levels[0].clone()),
        }
    }

    /// Column names; `full` keeps a column for the reference level too.
    fn dummy_names(&self, full: bool) -> Vec<String> {
        match &self.kind {
            VariableKind::Numeric { .. } => vec![self.name.clone()],
            VariableKind::Categorical { levels } => levels[usize::from(!full)..]
                .iter()
                .map(|l| format!("{}[{}]", self.name, l))
                .collect(),
        }
    }

    /// Encode this variable's column of `data` (n × c).
    fn encode(&self, data: &Dataset, full: bool) -> Result<Array2<f64>> {
        let column = data.column(&self.name)?;
        let n = data.n_rows();
        match &self.kind {
            VariableKind::Numeric { .. } => {
                let values = match column {
                    Column::Numeric(v) => v,
                    other => {
                        return Err(RustyMarginsError::ColumnType {
                            name: self.name.clone(),
                            expected: "numeric",
                            actual: other.kind(),
                        })
                    }
                };
                if let Some(row) = values.iter().position(|v| !v.is_finite()) {
                    return Err(missing_value(&self.name, row));
                }
                Ok(Array2::from_shape_fn((n, 1), |(i, _)| values[i]))
            }
            VariableKind::Categorical { levels } => {
                let codes = frozen_codes(&self.name, levels, column)?;
                let skip = usize::from(!full);
                let mut out = Array2::zeros((n, levels.len() - skip));
                for (i, code) in codes.into_iter().enumerate() {
                    let code = code.ok_or_else(|| missing_value(&self.name, i))?;
                    if code >= skip {
                        out[[i, code - skip]] = 1.0;
                    }
                }
                Ok(out)
            }
        }
    }
}

fn missing_value(name: &str, row: usize) -> RustyMarginsError {
    RustyMarginsError::InvalidValue(format!(
        "missing value in column '{}' at row {}; drop incomplete rows first",
        name, row
    ))
}

/// Labels of a column viewed as a factor (numeric columns via their values).
fn column_labels(column: &Column) -> Vec<Option<String>> {
    match column {
        Column::Categorical(f) => (0..f.len()).map(|i| f.label(i).map(str::to_string)).collect(),
        Column::Numeric(v) => v
            .iter()
            .map(|&x| if x.is_finite() { Some(format_number(x)) } else { None })
            .collect(),
    }
}

/// Map a column onto frozen levels by label.
fn frozen_codes(name: &str, levels: &[String], column: &Column) -> Result<Vec<Option<usize>>> {
    let index: HashMap<&str, usize> = levels.iter().enumerate().map(|(i, l)| (l.as_str(), i)).collect();
    column_labels(column)
        .into_iter()
        .map(|label| match label {
            None => Ok(None),
            Some(l) => index
                .get(l.as_str())
                .copied()
                .map(Some)
                .ok_or_else(|| RustyMarginsError::UnknownLevel {
                    factor: name.to_string(),
                    level: l,
                }),
        })
        .collect()
}

/// Resolve a variable against the training data.
fn resolve_variable(name: &str, force_categorical: bool, data: &Dataset) -> Result<Variable> {
    let column = data.column(name)?;
    let kind = match (column, force_categorical) {
        (Column::Numeric(_), false) => {
            let mean = data.mean(name)?;
            let (lower, upper) = data.range(name)?;
            VariableKind::Numeric { mean, lower, upper }
        }
        (Column::Categorical(f), _) => {
            // Keep only levels that occur, in the factor's order
            let mut used = vec![false; f.levels().len()];
            f.codes().iter().flatten().for_each(|&c| used[c] = true);
            let levels: Vec<String> = f
                .levels()
                .iter()
                .zip(&used)
                .filter(|(_, &u)| u)
                .map(|(l, _)| l.clone())
                .collect();
            VariableKind::Categorical { levels }
        }
        (Column::Numeric(v), true) => {
            let mut distinct: Vec<f64> = v.iter().copied().filter(|x| x.is_finite()).collect();
            distinct.sort_by(|a, b| a.total_cmp(b));
            distinct.dedup();
            VariableKind::Categorical {
                levels: distinct.into_iter().map(format_number).collect(),
            }
        }
    };
    if let VariableKind::Categorical { levels } = &kind {
        if levels.len() < 2 {
            return Err(RustyMarginsError::InvalidValue(format!(
                "factor '{}' needs at least two observed levels",
                name
            )));
        }
    }
    Ok(Variable {
        name: name.to_string(),
        kind,
    })
}

/// What a block of model-matrix columns represents.
#[derive(Debug, Clone, PartialEq)]
pub enum TermKind {
    Intercept,
    Main { variable: String },
    Interaction { factors: Vec<String> },
    Smooth { variable: String, basis: SplineBasis },
}

/// A contiguous block of model-matrix columns belonging to one formula term.
#[derive(Debug, Clone, PartialEq)]
pub struct TermBlock {
    pub label: String,
    pub kind: TermKind,
    pub columns: Range<usize>,
    /// Per variable of a main or interaction term: full (all-level) coding.
    pub full_coding: Vec<bool>,
}

impl TermBlock {
    /// Does this block change when `variable` changes?
    pub fn involves(&self, variable: &str) -> bool {
        match &self.kind {
            TermKind::Intercept => false,
            TermKind::Main { variable: v } | TermKind::Smooth { variable: v, .. } => v == variable,
            TermKind::Interaction { factors } => factors.iter().any(|f| f == variable),
        }
    }
}

/// Random-effect structure for one grouping factor.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomDesign {
    pub group: String,
    pub levels: Vec<String>,
    pub intercept: bool,
    pub slopes: Vec<String>,
}

impl RandomDesign {
    /// Number of random columns per group (q).
    pub fn n_columns(&self) -> usize {
        usize::from(self.intercept) + self.slopes.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_columns());
        if self.intercept {
            names.push("(Intercept)".to_string());
        }
        names.extend(self.slopes.iter().cloned());
        names
    }

    /// Per-row random columns Z (n × q).
    pub fn z_matrix(&self, data: &Dataset) -> Result<Array2<f64>> {
        let n = data.n_rows();
        let mut z = Array2::zeros((n, self.n_columns()));
        let mut col = 0;
        if self.intercept {
            z.column_mut(0).fill(1.0);
            col = 1;
        }
        for slope in &self.slopes {
            let values = data.numeric(slope)?;
            for (i, &v) in values.iter().enumerate() {
                if !v.is_finite() {
                    return Err(missing_value(slope, i));
                }
                z[[i, col]] = v;
            }
            col += 1;
        }
        Ok(z)
    }

    /// Group index per row; `None` for a level the fit never saw.
    pub fn group_codes(&self, data: &Dataset) -> Result<Vec<Option<usize>>> {
        let column = data.column(&self.group)?;
        Ok(column_labels(column)
            .into_iter()
            .map(|label| label.and_then(|l| self.levels.iter().position(|x| *x == l)))
            .collect())
    }
}

/// Frozen recipe for building model matrices from datasets.
#[derive(Debug, Clone)]
pub struct DesignSpec {
    response: String,
    has_intercept: bool,
    variables: Vec<Variable>,
    fixed_variables: Vec<String>,
    blocks: Vec<TermBlock>,
    column_names: Vec<String>,
    penalty_order: usize,
    random: Option<RandomDesign>,
}

impl DesignSpec {
    /// Resolve a parsed formula against the training data.
    ///
    /// Every name in the formula must be a column of `data`; encodings
    /// (levels, means, spline knots) are taken from `data` and frozen.
    pub fn new(formula: &ParsedFormula, data: &Dataset, options: &DesignOptions) -> Result<Self> {
        if data.n_rows() == 0 {
            return Err(RustyMarginsError::EmptyInput("dataset has no rows".to_string()));
        }
        if !data.has_column(&formula.response) {
            return Err(RustyMarginsError::UnknownColumn(formula.response.clone()));
        }

        let categorical_flag = |name: &str| {
            formula.categorical_vars.contains(name)
                || formula
                    .interactions
                    .iter()
                    .any(|i| i.factors.iter().zip(&i.categorical_flags).any(|(f, &c)| f == name && c))
        };

        let mut variables: Vec<Variable> = Vec::new();
        for name in formula.variables() {
            let is_group = formula.random_terms.iter().any(|r| r.group == name);
            variables.push(resolve_variable(&name, categorical_flag(&name) || is_group, data)?);
        }
        let lookup = |name: &str| -> Result<&Variable> {
            variables
                .iter()
                .find(|v| v.name == name)
                .ok_or_else(|| RustyMarginsError::UnknownColumn(name.to_string()))
        };

        let mut blocks = Vec::new();
        let mut column_names: Vec<String> = Vec::new();
        let mut push_block = |label: String, kind: TermKind, names: Vec<String>, full_coding: Vec<bool>| {
            let start = column_names.len();
            column_names.extend(names);
            blocks.push(TermBlock {
                label,
                kind,
                columns: start..column_names.len(),
                full_coding,
            });
        };

        if formula.has_intercept {
            push_block(
                "(Intercept)".to_string(),
                TermKind::Intercept,
                vec!["(Intercept)".to_string()],
                Vec::new(),
            );
        }

        // A factor is fully coded when the term without it is not in the
        // model. The empty margin is the intercept, which the first factor
        // main effect stands in for when the intercept is dropped.
        let margin_present = |margin: &[&String]| {
            formula.main_effects.iter().any(|m| margin.len() == 1 && margin[0] == m)
                || formula.interactions.iter().any(|i| {
                    i.factors.len() == margin.len() && margin.iter().all(|f| i.factors.contains(*f))
                })
        };
        let mut intercept_spanned = formula.has_intercept;

        for name in &formula.main_effects {
            let var = lookup(name)?;
            let full = var.is_categorical() && !intercept_spanned;
            intercept_spanned |= full;
            push_block(
                name.clone(),
                TermKind::Main { variable: name.clone() },
                var.dummy_names(full),
                vec![full],
            );
        }

        for interaction in &formula.interactions {
            let mut names = vec![String::new()];
            let mut full_coding = Vec::with_capacity(interaction.factors.len());
            for factor in &interaction.factors {
                let var = lookup(factor)?;
                let margin: Vec<&String> = interaction.factors.iter().filter(|f| *f != factor).collect();
                let full = var.is_categorical() && !margin_present(&margin);
                full_coding.push(full);
                let parts = var.dummy_names(full);
                names = names
                    .iter()
                    .flat_map(|prefix| {
                        parts.iter().map(move |p| {
                            if prefix.is_empty() {
                                p.clone()
                            } else {
                                format!("{}:{}", prefix, p)
                            }
                        })
                    })
                    .collect();
            }
            push_block(
                interaction.label(),
                TermKind::Interaction {
                    factors: interaction.factors.clone(),
                },
                names,
                full_coding,
            );
        }

        for smooth in &formula.smooth_terms {
            let var = lookup(&smooth.var_name)?;
            if var.is_categorical() {
                return Err(RustyMarginsError::ColumnType {
                    name: smooth.var_name.clone(),
                    expected: "numeric",
                    actual: "categorical",
                });
            }
            let values = data.numeric(&smooth.var_name)?;
            let mut distinct: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
            distinct.sort_by(|a, b| a.total_cmp(b));
            distinct.dedup();

            let mut k = smooth.k.unwrap_or(options.default_k);
            if k > distinct.len() {
                log::warn!(
                    "s({}) asks for k={} but has only {} distinct values; using k={}",
                    smooth.var_name,
                    k,
                    distinct.len(),
                    distinct.len()
                );
                k = distinct.len();
            }
            let basis = SplineBasis::fit(values, k, options.degree)?;
            let label = format!("s({})", smooth.var_name);
            let names = (1..=basis.n_columns()).map(|j| format!("{}.{}", label, j)).collect();
            push_block(
                label,
                TermKind::Smooth {
                    variable: smooth.var_name.clone(),
                    basis,
                },
                names,
                Vec::new(),
            );
        }

        if column_names.is_empty() {
            return Err(RustyMarginsError::FormulaError(
                "formula has no fixed-effect columns".to_string(),
            ));
        }

        let random = match formula.random_terms.as_slice() {
            [] => None,
            [term] => {
                let group = lookup(&term.group)?;
                let levels = match &group.kind {
                    VariableKind::Categorical { levels } => levels.clone(),
                    VariableKind::Numeric { .. } => {
                        return Err(RustyMarginsError::ColumnType {
                            name: term.group.clone(),
                            expected: "categorical",
                            actual: "numeric",
                        })
                    }
                };
                for slope in &term.slopes {
                    if lookup(slope)?.is_categorical() {
                        return Err(RustyMarginsError::ColumnType {
                            name: slope.clone(),
                            expected: "numeric",
                            actual: "categorical",
                        });
                    }
                }
                Some(RandomDesign {
                    group: term.group.clone(),
                    levels,
                    intercept: term.intercept,
                    slopes: term.slopes.clone(),
                })
            }
            _ => {
                return Err(RustyMarginsError::FormulaError(
                    "only one random-effect term (one grouping factor) is supported".to_string(),
                ))
            }
        };

        Ok(Self {
            response: formula.response.clone(),
            has_intercept: formula.has_intercept,
            variables,
            fixed_variables: formula.fixed_variables(),
            blocks,
            column_names,
            penalty_order: options.penalty_order,
            random,
        })
    }

    /// Encode `data` with the frozen encodings (n × p).
    pub fn model_matrix(&self, data: &Dataset) -> Result<Array2<f64>> {
        let n = data.n_rows();
        let mut x = Array2::zeros((n, self.column_names.len()));
        let mut cache: HashMap<(&str, bool), Array2<f64>> = HashMap::new();

        let mut encoded = |name: &str, full: bool| -> Result<Array2<f64>> {
            if let Some(m) = cache.get(&(name, full)) {
                return Ok(m.clone());
            }
            let var = self
                .variable(name)
                .ok_or_else(|| RustyMarginsError::UnknownColumn(name.to_string()))?;
            let m = var.encode(data, full)?;
            cache.insert((&var.name, full), m.clone());
            Ok(m)
        };

        for block in &self.blocks {
            let start = block.columns.start;
            match &block.kind {
                TermKind::Intercept => x.column_mut(start).fill(1.0),
                TermKind::Main { variable } => {
                    let full = block.full_coding.first().copied().unwrap_or(false);
                    let m = encoded(variable.as_str(), full)?;
                    x.slice_mut(ndarray::s![.., block.columns.clone()]).assign(&m);
                }
                TermKind::Interaction { factors } => {
                    let mut product = Array2::ones((n, 1));
                    for (k, factor) in factors.iter().enumerate() {
                        let full = block.full_coding.get(k).copied().unwrap_or(false);
                        let m = encoded(factor.as_str(), full)?;
                        let (a, b) = (product.ncols(), m.ncols());
                        product = Array2::from_shape_fn((n, a * b), |(i, j)| {
                            product[[i, j / b]] * m[[i, j % b]]
                        });
                    }
                    x.slice_mut(ndarray::s![.., block.columns.clone()]).assign(&product);
                }
                TermKind::Smooth { variable, basis } => {
                    let values = data.numeric(variable)?;
                    if let Some(row) = values.iter().position(|v| !v.is_finite()) {
                        return Err(missing_value(variable, row));
                    }
                    let b = basis.evaluate(values);
                    x.slice_mut(ndarray::s![.., block.columns.clone()]).assign(&b);
                }
            }
        }
        Ok(x)
    }

    /// Response vector from `data`.
    pub fn response(&self, data: &Dataset) -> Result<Array1<f64>> {
        let y = data.numeric(&self.response)?;
        if let Some(row) = y.iter().position(|v| !v.is_finite()) {
            return Err(missing_value(&self.response, row));
        }
        Ok(Array1::from_vec(y.to_vec()))
    }

    pub fn response_name(&self) -> &str {
        &self.response
    }

    pub fn has_intercept(&self) -> bool {
        self.has_intercept
    }

    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    pub fn blocks(&self) -> &[TermBlock] {
        &self.blocks
    }

    /// All resolved variables (fixed part, random slopes and grouping factor).
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// True when `name` enters the fixed (population-level) part of the model.
    pub fn is_fixed_variable(&self, name: &str) -> bool {
        self.fixed_variables.iter().any(|v| v == name)
    }

    pub fn fixed_variables(&self) -> &[String] {
        &self.fixed_variables
    }

    pub fn random(&self) -> Option<&RandomDesign> {
        self.random.as_ref()
    }

    /// Column ranges and unscaled penalties of the smooth terms.
    pub fn smooth_penalties(&self) -> Vec<(String, Range<usize>, Array2<f64>)> {
        self.blocks
            .iter()
            .filter_map(|b| match &b.kind {
                TermKind::Smooth { basis, .. } => {
                    Some((b.label.clone(), b.columns.clone(), basis.penalty(self.penalty_order)))
                }
                _ => None,
            })
            .collect()
    }

    /// Every variable at its typical value (mean / reference level).
    pub fn reference_values(&self) -> Vec<(String, Value)> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.typical_value()))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parse_formula;
    use approx::assert_abs_diff_eq;

    fn data() -> Dataset {
        Dataset::new()
            .with_numeric("y", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap()
            .with_numeric("x", vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0])
            .unwrap()
            .with_factor("g", &["a", "b", "c", "a", "b", "c"])
            .unwrap()
            .with_numeric("year", vec![2007.0, 2008.0, 2007.0, 2009.0, 2008.0, 2009.0])
            .unwrap()
    }

    fn spec(formula: &str) -> DesignSpec {
        DesignSpec::new(&parse_formula(formula).unwrap(), &data(), &DesignOptions::default()).unwrap()
    }

    #[test]
    fn test_treatment_coding() {
        let spec = spec("y ~ x + g");
        assert_eq!(spec.column_names(), &["(Intercept)", "x", "g[b]", "g[c]"]);
        let x = spec.model_matrix(&data()).unwrap();
        assert_eq!(x.row(0).to_vec(), vec![1.0, 0.5, 0.0, 0.0]);
        assert_eq!(x.row(2).to_vec(), vec![1.0, 1.5, 0.0, 1.0]);
    }

    #[test]
    fn test_interaction_columns() {
        let spec = spec("y ~ x*g");
        assert_eq!(
            spec.column_names(),
            &["(Intercept)", "x", "g[b]", "g[c]", "x:g[b]", "x:g[c]"]
        );
        let x = spec.model_matrix(&data()).unwrap();
        // Row 4: x = 2.5, g = b
        assert_eq!(x[[4, 4]], 2.5);
        assert_eq!(x[[4, 5]], 0.0);
    }

    #[test]
    fn test_numeric_as_factor() {
        let spec = spec("y ~ C(year)");
        assert_eq!(spec.column_names(), &["(Intercept)", "year[2008]", "year[2009]"]);
        assert!(spec.variable("year").unwrap().is_categorical());
    }

    #[test]
    fn test_frozen_levels_on_new_data() {
        let spec = spec("y ~ x + g");
        let row = Dataset::single_row(&[
            ("x".to_string(), Value::Number(10.0)),
            ("g".to_string(), Value::from("c")),
        ])
        .unwrap();
        let x = spec.model_matrix(&row).unwrap();
        assert_eq!(x.row(0).to_vec(), vec![1.0, 10.0, 0.0, 1.0]);

        let bad = Dataset::single_row(&[
            ("x".to_string(), Value::Number(1.0)),
            ("g".to_string(), Value::from("z")),
        ])
        .unwrap();
        assert!(matches!(
            spec.model_matrix(&bad),
            Err(RustyMarginsError::UnknownLevel { .. })
        ));
    }

    #[test]
    fn test_unknown_column() {
        let err = DesignSpec::new(
            &parse_formula("y ~ flipper").unwrap(),
            &data(),
            &DesignOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, RustyMarginsError::UnknownColumn("flipper".to_string()));
    }

    #[test]
    fn test_smooth_block_and_penalty() {
        let spec = spec("y ~ s(x, k=5)");
        // 6 distinct values, so k=5 is kept; centring drops one column
        assert_eq!(spec.n_columns(), 1 + 4);
        let penalties = spec.smooth_penalties();
        assert_eq!(penalties.len(), 1);
        assert_eq!(penalties[0].1, 1..5);
        assert_eq!(penalties[0].2.shape(), &[4, 4]);

        let x = spec.model_matrix(&data()).unwrap();
        for j in 1..5 {
            assert_abs_diff_eq!(x.column(j).sum(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_random_design() {
        let spec = spec("y ~ x + (1 + x | g)");
        assert_eq!(spec.column_names(), &["(Intercept)", "x"]);
        assert!(!spec.is_fixed_variable("g"));
        let random = spec.random().unwrap();
        assert_eq!(random.levels, vec!["a", "b", "c"]);
        assert_eq!(random.column_names(), vec!["(Intercept)", "x"]);
        let z = random.z_matrix(&data()).unwrap();
        assert_eq!(z.row(1).to_vec(), vec![1.0, 1.0]);
        assert_eq!(random.group_codes(&data()).unwrap()[5], Some(2));
    }

    #[test]
    fn test_no_intercept_codes_every_level() {
        let spec = spec("y ~ 0 + g + x");
        assert_eq!(spec.column_names(), &["g[a]", "g[b]", "g[c]", "x"]);
        let x = spec.model_matrix(&data()).unwrap();
        assert_eq!(x.row(0).to_vec(), vec![1.0, 0.0, 0.0, 0.5]);
        assert_eq!(x.row(5).to_vec(), vec![0.0, 0.0, 1.0, 3.0]);

        // Only the first factor spans the dropped intercept
        let spec = self::spec("y ~ g + C(year) - 1");
        assert_eq!(
            spec.column_names(),
            &["g[a]", "g[b]", "g[c]", "year[2008]", "year[2009]"]
        );
    }

    #[test]
    fn test_interaction_without_margin_codes_every_level() {
        // x:g with x present: treatment coding
        let spec = spec("y ~ x + x:g");
        assert_eq!(spec.column_names(), &["(Intercept)", "x", "x:g[b]", "x:g[c]"]);

        // x:g without x: one slope per level
        let spec = self::spec("y ~ g + x:g");
        assert_eq!(
            spec.column_names(),
            &["(Intercept)", "g[b]", "g[c]", "x:g[a]", "x:g[b]", "x:g[c]"]
        );
        let x = spec.model_matrix(&data()).unwrap();
        // Row 3: x = 2.0, g = a
        assert_eq!(x.row(3).to_vec(), vec![1.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_reference_values() {
        let spec = spec("y ~ x + g");
        let refs = spec.reference_values();
        assert_eq!(refs[0], ("x".to_string(), Value::Number(1.75)));
        assert_eq!(refs[1], ("g".to_string(), Value::from("a")));
    }
}
