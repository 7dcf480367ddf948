//! # fabcalc-formula
//!
//! Formula parser and evaluator for fabcalc worksheets.
//!
//! This crate provides:
//! - Formula parsing (text → AST) with a parse cache
//! - Dependency tracking and evaluation order for formula columns
//! - Formula evaluation (AST → decimal) against one row
//! - Aggregates (SUM/AVG/MIN/MAX/COUNT) over a worksheet column
//! - Pre-save formula validation
//!
//! ## Example
//!
//! ```rust
//! use fabcalc_core::{ColumnDef, ColumnType, Row, Worksheet};
//! use fabcalc_formula::{evaluate, parse_formula, EvaluationOptions, RowContext};
//! use rust_decimal::Decimal;
//!
//! let mut sheet = Worksheet::new(1, 1, "Steel");
//! sheet.add_column(ColumnDef::new("qty", ColumnType::Number)).unwrap();
//! sheet.add_column(ColumnDef::new("unit_cost", ColumnType::Currency)).unwrap();
//! sheet.add_row(Row::new(1).with_value("qty", 2).with_value("unit_cost", 10));
//!
//! let ast = parse_formula("=qty * unit_cost").unwrap();
//! let ctx = RowContext::new(&sheet, &sheet.rows[0]);
//! let result = evaluate(&ast, &ctx, &EvaluationOptions::default()).unwrap();
//! assert_eq!(result.value, Decimal::from(20));
//! ```

pub mod aggregate;
pub mod ast;
pub mod dependency;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod validation;

pub use aggregate::{aggregate, aggregate_worksheet, column_number};
pub use ast::{BinaryOperator, Expr, UnaryOperator};
pub use dependency::{
    build_dependency_graph, cycle_error, ColumnGraph, DependencyGraph, FormulaReferences,
};
pub use error::{EvalError, EvalErrorKind, EvalWarning, FormulaError, FormulaResult};
pub use evaluator::{
    evaluate, CoercionPolicy, ColumnValue, CrossSheetSource, DivisionByZeroPolicy, Evaluated,
    EvaluationContext, EvaluationOptions, Evaluator, NoCrossSheet, RowContext,
};
pub use functions::{round_half_away, AggregateFunction, ScalarFunction};
pub use parser::{parse_formula, FormulaCache, MAX_DEPTH, MAX_NESTING};
pub use validation::{
    validate_column_formula, validate_formula, validate_worksheet_formula, FormulaValidation,
};
