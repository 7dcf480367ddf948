//! Prelude module - common imports for fabcalc users
//!
//! ```rust
//! use fabcalc::prelude::*;
//! ```

pub use crate::{
    // Calculation types
    CalculationEngine,
    CalculationOptions,
    CalculationReport,
    // Model types
    ColumnDef,
    ColumnType,
    // Policies
    CoercionPolicy,
    DivisionByZeroPolicy,
    // Error types
    Error,
    // Service types
    EstimateStore,
    EvaluationOptions,
    Estimator,
    InMemoryStore,
    Package,
    RawValue,
    Result,
    Revision,
    Row,
    Worksheet,
};
