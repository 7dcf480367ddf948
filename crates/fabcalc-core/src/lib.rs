//! # fabcalc-core
//!
//! Core data model for the fabcalc estimating worksheet engine.
//!
//! This crate provides the entity graph the calculation engine works over:
//! - [`ColumnDef`] - Column definitions (key, display type, optional formula)
//! - [`RawValue`] - User-entered row values (numbers, text, booleans, dates)
//! - [`Row`], [`Worksheet`], [`Package`], [`Revision`] - The owned hierarchy
//! - [`WorksheetSummary`], [`PackageSummary`], [`RevisionSummary`] - Derived rollups
//!
//! ## Example
//!
//! ```rust
//! use fabcalc_core::{ColumnDef, ColumnType, Row, Worksheet};
//! use rust_decimal::Decimal;
//!
//! let mut sheet = Worksheet::new(1, 10, "Steel");
//! sheet.add_column(ColumnDef::new("qty", ColumnType::Number)).unwrap();
//! sheet.add_column(ColumnDef::formula("total", "qty * 2")).unwrap();
//!
//! sheet.add_row(Row::new(100).with_value("qty", Decimal::from(4)));
//! assert_eq!(sheet.active_rows().count(), 1);
//! ```

pub mod column;
pub mod error;
pub mod package;
pub mod revision;
pub mod row;
pub mod summary;
pub mod value;
pub mod worksheet;

// Re-exports for convenience
pub use column::{ColumnDef, ColumnType, DEFAULT_DECIMAL_PLACES};
pub use error::{Error, Result};
pub use package::Package;
pub use revision::{Revision, RowLocation};
pub use row::Row;
pub use summary::{
    CostBreakdown, PackageSummary, RevisionSummary, SummaryField, WorksheetSummary,
    LABOR_COST_KEY, LABOR_HOURS_KEY, MATERIAL_COST_KEY, TOTAL_COST_KEY,
};
pub use value::RawValue;
pub use worksheet::Worksheet;

/// Identifier assigned to every persisted entity by the storage collaborator
pub type EntityId = i64;

/// Case-insensitive key/name comparison used for column keys and worksheet names
pub fn keys_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
