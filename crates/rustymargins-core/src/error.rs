// =============================================================================
// Error Types
// =============================================================================
//
// Every fallible operation in the library returns `Result<T>`, an alias for
// `std::result::Result<T, RustyMarginsError>`.
//
// WHERE ERRORS COME FROM:
// -----------------------
//   - Formula / data resolution: a formula names a column that does not
//     exist, or treats a numeric column as a factor.
//   - Fitting: singular systems, empty inputs, optimizer non-convergence.
//   - Effect requests: asking for an effect on a variable the model never
//     saw, or for a level that is not in the fitted factor.
//
// None of these are retried. They are surfaced to the caller as-is.
//
// =============================================================================

use thiserror::Error;

/// All errors produced by `rustymargins-core`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RustyMarginsError {
    /// Array shapes do not line up (e.g. X has 10 rows, y has 9).
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// An input that must contain data is empty.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// A value is outside its valid domain.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A decomposition or solve failed (usually collinear predictors).
    #[error("linear algebra error: {0}")]
    LinearAlgebraError(String),

    /// The formula string could not be parsed.
    #[error("formula error: {0}")]
    FormulaError(String),

    /// A formula or request refers to a column the dataset does not have.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// A factor level that the fitted encoding does not know about.
    #[error("unknown level '{level}' for factor '{factor}'")]
    UnknownLevel { factor: String, level: String },

    /// An effect was requested for a variable that is not part of the model.
    #[error("term '{0}' is not in the fitted model")]
    TermNotInModel(String),

    /// A column was used with the wrong type (numeric vs categorical).
    #[error("column '{name}' is {actual}, expected {expected}")]
    ColumnType {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// An iterative optimizer did not reach its tolerance.
    #[error("failed to converge: {0}")]
    ConvergenceFailure(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RustyMarginsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = RustyMarginsError::UnknownLevel {
            factor: "species".to_string(),
            level: "Emperor".to_string(),
        };
        assert_eq!(err.to_string(), "unknown level 'Emperor' for factor 'species'");

        let err = RustyMarginsError::TermNotInModel("flipper_len".to_string());
        assert!(err.to_string().contains("flipper_len"));
    }

    #[test]
    fn test_column_type_message() {
        let err = RustyMarginsError::ColumnType {
            name: "year".to_string(),
            expected: "categorical",
            actual: "numeric",
        };
        assert_eq!(err.to_string(), "column 'year' is numeric, expected categorical");
    }
}
