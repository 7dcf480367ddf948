//! Worksheet type

use crate::column::{is_valid_key, ColumnDef};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::summary::WorksheetSummary;
use crate::EntityId;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A worksheet (one grid of rows inside a package)
///
/// The worksheet owns its columns and rows. `totals` and `summary` are
/// derived and overwritten by every recalculation.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Worksheet {
    pub id: EntityId,
    pub package_id: EntityId,
    /// Unique within the package (case-insensitive)
    pub name: String,
    /// Declared column order
    pub columns: Vec<ColumnDef>,
    /// Display order
    pub rows: Vec<Row>,
    /// Column totals keyed by column key
    pub totals: BTreeMap<String, Decimal>,
    pub summary: WorksheetSummary,
    pub is_deleted: bool,
}

impl Worksheet {
    /// Create an empty worksheet
    pub fn new<S: Into<String>>(id: EntityId, package_id: EntityId, name: S) -> Self {
        Self {
            id,
            package_id,
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a column, rejecting invalid or duplicate keys
    pub fn add_column(&mut self, column: ColumnDef) -> Result<()> {
        if !is_valid_key(&column.key) {
            return Err(Error::InvalidColumnKey(column.key));
        }
        if self.column(&column.key).is_some() {
            return Err(Error::DuplicateColumnKey(column.key));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Add a column (builder form)
    pub fn with_column(mut self, column: ColumnDef) -> Result<Self> {
        self.add_column(column)?;
        Ok(self)
    }

    /// Append a row, taking ownership of it
    pub fn add_row(&mut self, mut row: Row) {
        row.worksheet_id = self.id;
        self.rows.push(row);
    }

    /// Get a column by key (case-insensitive)
    pub fn column(&self, key: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.matches_key(key))
    }

    /// Get a mutable column by key (case-insensitive)
    pub fn column_mut(&mut self, key: &str) -> Option<&mut ColumnDef> {
        self.columns.iter_mut().find(|c| c.matches_key(key))
    }

    /// Iterate formula columns in declared order
    pub fn formula_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_formula())
    }

    /// Iterate rows that take part in calculation
    pub fn active_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|r| r.is_active())
    }

    /// Get a row by id
    pub fn row(&self, id: EntityId) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }

    /// Get a mutable row by id
    pub fn row_mut(&mut self, id: EntityId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.id == id)
    }

    /// Position of a row in display order
    pub fn row_index(&self, id: EntityId) -> Option<usize> {
        self.rows.iter().position(|r| r.id == id)
    }

    /// Case-insensitive name comparison
    pub fn name_matches(&self, name: &str) -> bool {
        crate::keys_match(&self.name, name)
    }
}
