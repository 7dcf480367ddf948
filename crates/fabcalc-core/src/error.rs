//! Error types for fabcalc-core

use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or editing the entity graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Unrecognized column display type
    #[error("Invalid column type: {0}")]
    InvalidColumnType(String),

    /// Column key already used in the worksheet
    #[error("Column key already exists: {0}")]
    DuplicateColumnKey(String),

    /// Column key is empty or not a valid identifier
    #[error("Invalid column key: '{0}'")]
    InvalidColumnKey(String),

    /// Worksheet name already used in the package
    #[error("Worksheet name already exists: {0}")]
    DuplicateWorksheetName(String),

    /// A rollup amount left the decimal range
    #[error("Decimal overflow computing {0}")]
    Overflow(&'static str),
}
