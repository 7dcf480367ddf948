//! Error types for the recalculation engine

use fabcalc_formula::FormulaError;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by trigger points and the storage collaborator
#[derive(Debug, Error)]
pub enum Error {
    /// Formula could not be parsed or sits on a dependency cycle
    #[error(transparent)]
    Formula(#[from] FormulaError),

    /// Entity graph is inconsistent
    #[error(transparent)]
    Core(#[from] fabcalc_core::Error),

    /// Storage collaborator failed to load or save
    #[error("Store error: {0}")]
    Store(String),

    /// Request covers more rows than the configured ceiling
    #[error("Recalculation covers {rows} rows, more than the limit of {limit}")]
    RowLimitExceeded { rows: usize, limit: usize },
}

impl Error {
    /// Create a storage error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Error::Store(msg.into())
    }
}
