// =============================================================================
// Observation Table
// =============================================================================
//
// A small column store for the data a model is fitted on: rows are subjects
// (e.g. individual penguins), columns are either numeric measurements
// (body mass, bill length) or categorical attributes (species, sex, year).
//
// MISSING VALUES:
// ---------------
//   - Numeric columns use NaN.
//   - Factor columns store `None` for a missing code.
// Use `complete_cases` before fitting to drop incomplete rows.
//
// COUNTERFACTUAL COPIES:
// ----------------------
// Effects are computed by predicting on modified copies of the data
// ("what if every penguin were 1 mm longer?"). `fill` and `map_numeric`
// create those copies; the design module re-encodes them with the encodings
// frozen at fit time.
//
// =============================================================================

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RustyMarginsError};

/// A single cell value used to fix a variable (conditioning, reference grids).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Level(String),
}

impl Value {
    /// "numeric" or "categorical", matching `Column::kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Number(_) => "numeric",
            Value::Level(_) => "categorical",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(x) => write!(f, "{}", format_number(*x)),
            Value::Level(l) => write!(f, "{}", l),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Number(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Level(s.to_string())
    }
}

/// Format a number the way a level label should read ("2007", not "2007.0").
pub fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

/// Categorical column: ordered levels plus one (optional) code per row.
///
/// The first level is the reference level for treatment coding.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    levels: Vec<String>,
    codes: Vec<Option<usize>>,
}

impl Factor {
    /// Build a factor with levels in order of first appearance.
    ///
    /// Empty strings and "NA" are treated as missing.
    pub fn from_strings<S: AsRef<str>>(values: &[S]) -> Self {
        let mut levels: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let codes = values
            .iter()
            .map(|v| {
                let v = v.as_ref();
                if is_missing_label(v) {
                    return None;
                }
                let next = levels.len();
                let code = *index.entry(v.to_string()).or_insert_with(|| {
                    levels.push(v.to_string());
                    next
                });
                Some(code)
            })
            .collect();
        Self { levels, codes }
    }

    /// Build a factor with an explicit level order.
    pub fn with_levels<S: AsRef<str>>(values: &[S], levels: &[&str]) -> Result<Self> {
        let levels: Vec<String> = levels.iter().map(|l| l.to_string()).collect();
        let codes = values
            .iter()
            .map(|v| {
                let v = v.as_ref();
                if is_missing_label(v) {
                    return Ok(None);
                }
                levels
                    .iter()
                    .position(|l| l == v)
                    .map(Some)
                    .ok_or_else(|| RustyMarginsError::UnknownLevel {
                        factor: "<new>".to_string(),
                        level: v.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { levels, codes })
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn codes(&self) -> &[Option<usize>] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn index_of(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }

    /// Level label of a row, `None` when missing.
    pub fn label(&self, row: usize) -> Option<&str> {
        self.codes
            .get(row)
            .copied()
            .flatten()
            .map(|c| self.levels[c].as_str())
    }
}

fn is_missing_label(v: &str) -> bool {
    v.is_empty() || v == "NA"
}

/// A named column of the dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Categorical(Factor),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Column::Numeric(_) => "numeric",
            Column::Categorical(_) => "categorical",
        }
    }

    fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Numeric(v) => !v[row].is_finite(),
            Column::Categorical(f) => f.codes[row].is_none(),
        }
    }

    fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(rows.iter().map(|&r| v[r]).collect()),
            Column::Categorical(f) => Column::Categorical(Factor {
                levels: f.levels.clone(),
                codes: rows.iter().map(|&r| f.codes[r]).collect(),
            }),
        }
    }
}

/// Column-oriented observation table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a column. The first column fixes the row count.
    pub fn with_column(mut self, name: &str, column: Column) -> Result<Self> {
        self.insert(name, column)?;
        Ok(self)
    }

    pub fn with_numeric(self, name: &str, values: Vec<f64>) -> Result<Self> {
        self.with_column(name, Column::Numeric(values))
    }

    pub fn with_factor<S: AsRef<str>>(self, name: &str, values: &[S]) -> Result<Self> {
        self.with_column(name, Column::Categorical(Factor::from_strings(values)))
    }

    pub fn with_factor_levels<S: AsRef<str>>(
        self,
        name: &str,
        values: &[S],
        levels: &[&str],
    ) -> Result<Self> {
        let factor = Factor::with_levels(values, levels).map_err(|e| match e {
            RustyMarginsError::UnknownLevel { level, .. } => RustyMarginsError::UnknownLevel {
                factor: name.to_string(),
                level,
            },
            other => other,
        })?;
        self.with_column(name, Column::Categorical(factor))
    }

    fn insert(&mut self, name: &str, column: Column) -> Result<()> {
        if self.columns.is_empty() {
            self.n_rows = column.len();
        } else if column.len() != self.n_rows {
            return Err(RustyMarginsError::DimensionMismatch(format!(
                "column '{}' has {} rows but the dataset has {}",
                name,
                column.len(),
                self.n_rows
            )));
        }
        match self.position(name) {
            Some(i) => self.columns[i] = column,
            None => {
                self.names.push(name.to_string());
                self.columns.push(column);
            }
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.position(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| RustyMarginsError::UnknownColumn(name.to_string()))
    }

    fn column_mut(&mut self, name: &str) -> Result<&mut Column> {
        match self.position(name) {
            Some(i) => Ok(&mut self.columns[i]),
            None => Err(RustyMarginsError::UnknownColumn(name.to_string())),
        }
    }

    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Numeric(v) => Ok(v),
            other => Err(type_error(name, "numeric", other)),
        }
    }

    pub fn factor(&self, name: &str) -> Result<&Factor> {
        match self.column(name)? {
            Column::Categorical(f) => Ok(f),
            other => Err(type_error(name, "categorical", other)),
        }
    }

    /// Recode a numeric column as a factor, in place.
    ///
    /// Levels are the distinct finite values in ascending order, labelled
    /// without a trailing ".0" (so a `year` column gets levels "2007",
    /// "2008", "2009"). Already-categorical columns are left untouched.
    pub fn to_factor(&mut self, name: &str) -> Result<()> {
        let column = self.column_mut(name)?;
        let values = match column {
            Column::Categorical(_) => return Ok(()),
            Column::Numeric(v) => v.clone(),
        };

        let mut distinct: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();

        let levels: Vec<String> = distinct.iter().map(|&x| format_number(x)).collect();
        let codes = values
            .iter()
            .map(|x| {
                if x.is_finite() {
                    distinct.iter().position(|d| d == x)
                } else {
                    None
                }
            })
            .collect();
        *column = Column::Categorical(Factor { levels, codes });
        Ok(())
    }

    /// Rows with no missing value in any of `names`.
    pub fn complete_cases(&self, names: &[&str]) -> Result<Dataset> {
        let columns = names
            .iter()
            .map(|n| self.column(n))
            .collect::<Result<Vec<_>>>()?;
        let rows: Vec<usize> = (0..self.n_rows)
            .filter(|&r| columns.iter().all(|c| !c.is_missing(r)))
            .collect();
        if rows.len() < self.n_rows {
            log::info!(
                "dropped {} incomplete rows ({} remain)",
                self.n_rows - rows.len(),
                rows.len()
            );
        }
        Ok(self.select_rows(&rows))
    }

    /// New dataset with the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        Dataset {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.select(rows)).collect(),
            n_rows: rows.len(),
        }
    }

    /// Set every row of a column to one value.
    ///
    /// Setting a factor to a level it does not have appends the level; the
    /// design encoder then rejects it if the fitted model never saw it.
    /// A numeric column used as a factor (`C(year)`) accepts its level
    /// labels ("2008"), and a factor accepts a number as its label.
    pub fn fill(&mut self, name: &str, value: &Value) -> Result<()> {
        let n = self.n_rows;
        let column = self.column_mut(name)?;
        match (column, value) {
            (Column::Numeric(v), Value::Number(x)) => v.iter_mut().for_each(|vi| *vi = *x),
            (Column::Numeric(v), Value::Level(level)) => {
                let x: f64 = level.parse().map_err(|_| RustyMarginsError::ColumnType {
                    name: name.to_string(),
                    expected: "numeric",
                    actual: "categorical",
                })?;
                v.iter_mut().for_each(|vi| *vi = x);
            }
            (Column::Categorical(f), value) => {
                let level = value.to_string();
                let code = match f.index_of(&level) {
                    Some(c) => c,
                    None => {
                        f.levels.push(level);
                        f.levels.len() - 1
                    }
                };
                f.codes = vec![Some(code); n];
            }
        }
        Ok(())
    }

    /// Apply `f` to every value of a numeric column.
    pub fn map_numeric<F: Fn(f64) -> f64>(&mut self, name: &str, f: F) -> Result<()> {
        match self.column_mut(name)? {
            Column::Numeric(v) => {
                v.iter_mut().for_each(|x| *x = f(*x));
                Ok(())
            }
            other => {
                let actual = other.kind();
                Err(RustyMarginsError::ColumnType {
                    name: name.to_string(),
                    expected: "numeric",
                    actual,
                })
            }
        }
    }

    /// Mean of the finite values of a numeric column.
    pub fn mean(&self, name: &str) -> Result<f64> {
        let v = self.numeric(name)?;
        let finite: Vec<f64> = v.iter().copied().filter(|x| x.is_finite()).collect();
        if finite.is_empty() {
            return Err(RustyMarginsError::EmptyInput(format!(
                "column '{}' has no finite values",
                name
            )));
        }
        Ok(finite.iter().sum::<f64>() / finite.len() as f64)
    }

    /// (min, max) of the finite values of a numeric column.
    pub fn range(&self, name: &str) -> Result<(f64, f64)> {
        let v = self.numeric(name)?;
        let (lo, hi) = v
            .iter()
            .filter(|x| x.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });
        if lo > hi {
            return Err(RustyMarginsError::EmptyInput(format!(
                "column '{}' has no finite values",
                name
            )));
        }
        Ok((lo, hi))
    }

    /// A one-row dataset built from explicit values.
    pub fn single_row(values: &[(String, Value)]) -> Result<Dataset> {
        values.iter().try_fold(Dataset::new(), |ds, (name, value)| match value {
            Value::Number(x) => ds.with_numeric(name, vec![*x]),
            Value::Level(l) => ds.with_factor(name, &[l.as_str()]),
        })
    }

    /// Build a dataset row by row. Column names and order come from the
    /// first record; every record must name the same columns, and a column
    /// must hold only numbers or only levels.
    pub fn from_records(records: &[Vec<(String, Value)>]) -> Result<Dataset> {
        let first = records
            .first()
            .ok_or_else(|| RustyMarginsError::EmptyInput("no records".to_string()))?;

        let mut ds = Dataset::new();
        for (j, (name, head)) in first.iter().enumerate() {
            let cells = records
                .iter()
                .map(|record| match record.get(j) {
                    Some((n, v)) if n == name => Ok(v),
                    _ => Err(RustyMarginsError::DimensionMismatch(format!(
                        "record does not have column '{}' in position {}",
                        name, j
                    ))),
                })
                .collect::<Result<Vec<&Value>>>()?;

            let mismatch = |v: &Value| RustyMarginsError::ColumnType {
                name: name.clone(),
                expected: head.kind(),
                actual: v.kind(),
            };
            ds = match head {
                Value::Number(_) => {
                    let values = cells
                        .iter()
                        .map(|v| match v {
                            Value::Number(x) => Ok(*x),
                            other => Err(mismatch(other)),
                        })
                        .collect::<Result<Vec<f64>>>()?;
                    ds.with_numeric(name, values)?
                }
                Value::Level(_) => {
                    let labels = cells
                        .iter()
                        .map(|v| match v {
                            Value::Level(l) => Ok(l.as_str()),
                            other => Err(mismatch(other)),
                        })
                        .collect::<Result<Vec<&str>>>()?;
                    ds.with_factor(name, &labels)?
                }
            };
        }
        Ok(ds)
    }
}

fn type_error(name: &str, expected: &'static str, column: &Column) -> RustyMarginsError {
    RustyMarginsError::ColumnType {
        name: name.to_string(),
        expected,
        actual: column.kind(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn penguins() -> Dataset {
        Dataset::new()
            .with_numeric("body_mass", vec![3750.0, 3800.0, f64::NAN, 5700.0])
            .unwrap()
            .with_factor("species", &["Adelie", "Adelie", "Gentoo", "Gentoo"])
            .unwrap()
            .with_numeric("year", vec![2007.0, 2009.0, 2008.0, 2007.0])
            .unwrap()
    }

    #[test]
    fn test_factor_levels_in_order_of_appearance() {
        let f = Factor::from_strings(&["b", "a", "b", "NA", "c"]);
        assert_eq!(f.levels(), &["b", "a", "c"]);
        assert_eq!(f.codes(), &[Some(0), Some(1), Some(0), None, Some(2)]);
        assert_eq!(f.label(1), Some("a"));
        assert_eq!(f.label(3), None);
    }

    #[test]
    fn test_explicit_level_order() {
        let ds = Dataset::new()
            .with_factor_levels("sex", &["male", "female"], &["female", "male"])
            .unwrap();
        assert_eq!(ds.factor("sex").unwrap().codes(), &[Some(1), Some(0)]);

        let err = Dataset::new()
            .with_factor_levels("sex", &["other"], &["female", "male"])
            .unwrap_err();
        assert!(matches!(err, RustyMarginsError::UnknownLevel { ref factor, .. } if factor == "sex"));
    }

    #[test]
    fn test_length_mismatch() {
        let err = penguins().with_numeric("short", vec![1.0]).unwrap_err();
        assert!(matches!(err, RustyMarginsError::DimensionMismatch(_)));
    }

    #[test]
    fn test_year_to_factor() {
        let mut ds = penguins();
        ds.to_factor("year").unwrap();
        let year = ds.factor("year").unwrap();
        assert_eq!(year.levels(), &["2007", "2008", "2009"]);
        assert_eq!(year.codes(), &[Some(0), Some(2), Some(1), Some(0)]);
        assert!(ds.numeric("year").is_err());
    }

    #[test]
    fn test_complete_cases() {
        let ds = penguins().complete_cases(&["body_mass", "species"]).unwrap();
        assert_eq!(ds.n_rows(), 3);
        assert_eq!(ds.numeric("body_mass").unwrap(), &[3750.0, 3800.0, 5700.0]);
        assert_eq!(ds.factor("species").unwrap().label(2), Some("Gentoo"));
    }

    #[test]
    fn test_fill_and_map() {
        let mut ds = penguins();
        ds.fill("species", &Value::from("Chinstrap")).unwrap();
        assert!(ds.factor("species").unwrap().codes().iter().all(|&c| c == Some(2)));

        ds.map_numeric("year", |y| y + 1.0).unwrap();
        assert_eq!(ds.numeric("year").unwrap()[0], 2008.0);

        assert!(ds.fill("year", &Value::from("x")).is_err());
        assert!(ds.map_numeric("species", |x| x).is_err());
    }

    #[test]
    fn test_mean_and_range_skip_missing() {
        let ds = penguins();
        assert_eq!(ds.mean("body_mass").unwrap(), (3750.0 + 3800.0 + 5700.0) / 3.0);
        assert_eq!(ds.range("body_mass").unwrap(), (3750.0, 5700.0));
        assert!(matches!(ds.mean("flipper"), Err(RustyMarginsError::UnknownColumn(_))));
    }

    #[test]
    fn test_single_row() {
        let row = Dataset::single_row(&[
            ("x".to_string(), Value::Number(1.5)),
            ("g".to_string(), Value::from("b")),
        ])
        .unwrap();
        assert_eq!(row.n_rows(), 1);
        assert_eq!(row.factor("g").unwrap().label(0), Some("b"));
        assert_eq!(Value::Number(2007.0).to_string(), "2007");
    }

    #[test]
    fn test_fill_numeric_with_level_label() {
        let mut ds = penguins();
        ds.fill("year", &Value::from("2008")).unwrap();
        assert!(ds.numeric("year").unwrap().iter().all(|&y| y == 2008.0));
    }

    #[test]
    fn test_from_records() {
        let records = vec![
            vec![("x".to_string(), Value::Number(1.0)), ("g".to_string(), Value::from("a"))],
            vec![("x".to_string(), Value::Number(2.0)), ("g".to_string(), Value::from("b"))],
        ];
        let ds = Dataset::from_records(&records).unwrap();
        assert_eq!(ds.names(), &["x", "g"]);
        assert_eq!(ds.numeric("x").unwrap(), &[1.0, 2.0]);
        assert_eq!(ds.factor("g").unwrap().levels(), &["a", "b"]);

        let mixed = vec![
            vec![("x".to_string(), Value::Number(1.0))],
            vec![("x".to_string(), Value::from("a"))],
        ];
        assert!(matches!(
            Dataset::from_records(&mixed),
            Err(RustyMarginsError::ColumnType { .. })
        ));
        assert!(Dataset::from_records(&[]).is_err());
    }
}
