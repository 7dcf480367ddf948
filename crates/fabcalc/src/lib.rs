//! # fabcalc
//!
//! Worksheet recalculation engine for fabrication estimates.
//!
//! Estimates are organised as revisions holding packages, packages holding
//! worksheets, and worksheets holding rows. Worksheet columns are either user
//! inputs or formulas over other columns of the same row.
//!
//! ## Features
//!
//! - Formula columns with arithmetic, comparisons, `IF`/`ROUND`/`ABS`/`MIN`/`MAX`
//! - Column aggregates (`SUM(qty)`) and cross-worksheet references
//!   (`Labor.SUM(hours)`, `'Material Costs'.TotalCost`)
//! - Dependency ordering with cycle detection, per worksheet and per package
//! - Cascading rollup: row → worksheet → package → revision, with overhead
//!   and margin
//! - Decimal arithmetic throughout, rounded only when stored
//!
//! ## Example
//!
//! ```rust
//! use fabcalc::prelude::*;
//! use rust_decimal::Decimal;
//!
//! let mut sheet = Worksheet::new(3, 2, "Steel");
//! sheet.add_column(ColumnDef::new("qty", ColumnType::Number)).unwrap();
//! sheet.add_column(ColumnDef::new("unit_cost", ColumnType::Currency)).unwrap();
//! sheet.add_column(ColumnDef::formula("total_cost", "qty * unit_cost")).unwrap();
//! sheet.add_row(Row::new(10).with_value("qty", 2).with_value("unit_cost", 10));
//! sheet.add_row(Row::new(11).with_value("qty", 4).with_value("unit_cost", 5));
//!
//! let mut package = Package::new(2, 1, "Fabrication");
//! package.add_worksheet(sheet).unwrap();
//! let mut revision = Revision::new(1).with_rates(Decimal::from(10), Decimal::from(20));
//! revision.add_package(package);
//!
//! let mut estimator = Estimator::new(InMemoryStore::from_iter([revision]));
//! let result = estimator.recalculate_revision(1).unwrap().unwrap();
//!
//! assert_eq!(result.value.summary.breakdown.subtotal, Decimal::from(40));
//! assert_eq!(result.value.summary.total_amount(), Decimal::from(528) / Decimal::from(10));
//! ```

pub mod calculation;
pub mod cross_sheet;
pub mod error;
pub mod estimator;
pub mod prelude;
pub mod store;

pub use calculation::{
    summarize_package, summarize_revision, summarize_worksheet, CalculationEngine,
    CalculationIssue, CalculationOptions, CalculationReport, CalculationStats, WorksheetPlan,
};
pub use cross_sheet::{HaltedSheets, SiblingSheets};
pub use error::{Error, Result};
pub use estimator::{Estimator, Recalculated};
pub use store::{EntityRef, EstimateStore, InMemoryStore};

// Re-export core types
pub use fabcalc_core::{
    keys_match, ColumnDef, ColumnType, CostBreakdown, EntityId, Package, PackageSummary, RawValue,
    Revision, RevisionSummary, Row, SummaryField, Worksheet, WorksheetSummary,
    DEFAULT_DECIMAL_PLACES, LABOR_COST_KEY, LABOR_HOURS_KEY, MATERIAL_COST_KEY, TOTAL_COST_KEY,
};

// Re-export formula types
pub use fabcalc_formula::{
    build_dependency_graph, evaluate, parse_formula, validate_column_formula, validate_formula,
    validate_worksheet_formula,
    AggregateFunction, CoercionPolicy, CrossSheetSource, DivisionByZeroPolicy, EvalError,
    EvalErrorKind, EvalWarning, EvaluationOptions, Expr, FormulaCache, FormulaError,
    FormulaValidation, NoCrossSheet, RowContext,
};
