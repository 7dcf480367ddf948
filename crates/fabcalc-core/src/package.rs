//! Package type

use crate::error::{Error, Result};
use crate::summary::PackageSummary;
use crate::worksheet::Worksheet;
use crate::EntityId;
use rust_decimal::Decimal;

/// A package of worksheets inside a revision
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Package {
    pub id: EntityId,
    pub revision_id: EntityId,
    pub name: String,
    /// Overhead applied to the package subtotal
    pub overhead_percentage: Decimal,
    pub worksheets: Vec<Worksheet>,
    pub summary: PackageSummary,
    pub is_deleted: bool,
}

impl Package {
    /// Create an empty package
    pub fn new<S: Into<String>>(id: EntityId, revision_id: EntityId, name: S) -> Self {
        Self {
            id,
            revision_id,
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the package overhead percentage
    pub fn with_overhead(mut self, percentage: Decimal) -> Self {
        self.overhead_percentage = percentage;
        self
    }

    /// Add a worksheet, rejecting names already used by a live sibling
    pub fn add_worksheet(&mut self, mut worksheet: Worksheet) -> Result<()> {
        if self.worksheet_by_name(&worksheet.name).is_some() {
            return Err(Error::DuplicateWorksheetName(worksheet.name));
        }
        worksheet.package_id = self.id;
        self.worksheets.push(worksheet);
        Ok(())
    }

    /// Get a worksheet by id
    pub fn worksheet(&self, id: EntityId) -> Option<&Worksheet> {
        self.worksheets.iter().find(|w| w.id == id)
    }

    /// Get a mutable worksheet by id
    pub fn worksheet_mut(&mut self, id: EntityId) -> Option<&mut Worksheet> {
        self.worksheets.iter_mut().find(|w| w.id == id)
    }

    /// Find a live worksheet by name (case-insensitive)
    pub fn worksheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        self.active_worksheets().find(|w| w.name_matches(name))
    }

    /// Iterate worksheets that are not soft-deleted
    pub fn active_worksheets(&self) -> impl Iterator<Item = &Worksheet> {
        self.worksheets.iter().filter(|w| !w.is_deleted)
    }

    /// Active rows across all live worksheets
    pub fn active_row_count(&self) -> usize {
        self.active_worksheets()
            .map(|w| w.active_rows().count())
            .sum()
    }
}
