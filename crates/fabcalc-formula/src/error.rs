//! Formula error types

use fabcalc_core::EntityId;
use std::fmt;
use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors that stop a formula (or a whole worksheet) from being evaluated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    /// Malformed syntax, unknown function name or wrong arity
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// Cycle in a dependency graph; the first member is repeated at the end
    #[error("Circular reference detected: {}", .cycle.join(" -> "))]
    CircularReference { cycle: Vec<String> },
}

impl FormulaError {
    pub(crate) fn parse<S: Into<String>>(position: usize, message: S) -> Self {
        FormulaError::Parse {
            position,
            message: message.into(),
        }
    }

    /// Members of the cycle, if this is a circular reference
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            FormulaError::CircularReference { cycle } => Some(cycle),
            FormulaError::Parse { .. } => None,
        }
    }
}

/// Why a single cell could not be evaluated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalErrorKind {
    /// Reference to a column that does not exist in the worksheet
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// Reference to a worksheet that does not exist in the package
    #[error("Unknown worksheet: {0}")]
    UnknownWorksheet(String),

    /// Division or modulo by zero under the strict policy
    #[error("Division by zero")]
    DivisionByZero,

    /// Non-numeric input under the strict policy
    #[error("Column '{column}' holds a non-numeric {value_type} value")]
    NonNumeric {
        column: String,
        value_type: &'static str,
    },

    /// Result does not fit in a decimal
    #[error("Numeric overflow")]
    Overflow,

    /// Referenced worksheet is part of a cross-worksheet cycle or is the
    /// worksheet being calculated
    #[error("Circular worksheet reference: {0}")]
    CircularWorksheetReference(String),

    /// Referenced worksheet has an invalid formula and was not recalculated
    #[error("Worksheet '{0}' was not recalculated")]
    HaltedWorksheet(String),
}

/// A failed cell
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cell {column_key} of row {row_id}: {kind}")]
pub struct EvalError {
    pub column_key: String,
    pub row_id: EntityId,
    pub kind: EvalErrorKind,
}

/// Non-fatal problem recorded while evaluating a cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalWarning {
    /// Division or modulo by zero produced 0
    DivisionByZero,
    /// A non-numeric raw value was read as 0
    NonNumericValue {
        column: String,
        value_type: &'static str,
    },
}

impl fmt::Display for EvalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalWarning::DivisionByZero => write!(f, "Division by zero evaluated as 0"),
            EvalWarning::NonNumericValue { column, value_type } => {
                write!(f, "Non-numeric {} value in '{}' read as 0", value_type, column)
            }
        }
    }
}
