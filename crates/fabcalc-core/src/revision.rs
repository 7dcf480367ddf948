//! Revision type (aggregate root)

use crate::package::Package;
use crate::summary::RevisionSummary;
use crate::worksheet::Worksheet;
use crate::EntityId;
use rust_decimal::Decimal;

/// Default overhead percentage for new revisions
pub const DEFAULT_OVERHEAD_PERCENTAGE: i64 = 15;
/// Default margin percentage for new revisions
pub const DEFAULT_MARGIN_PERCENTAGE: i64 = 20;

/// Position of a row inside a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    pub package_index: usize,
    pub worksheet_index: usize,
    pub row_index: usize,
}

/// An estimate revision
///
/// Owns its packages. Overhead and margin percentages together with the
/// rows' raw values are the only authoritative inputs to the rollup.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Revision {
    pub id: EntityId,
    pub overhead_percentage: Decimal,
    pub margin_percentage: Decimal,
    pub packages: Vec<Package>,
    pub summary: RevisionSummary,
    pub is_deleted: bool,
}

impl Default for Revision {
    fn default() -> Self {
        Self {
            id: 0,
            overhead_percentage: Decimal::from(DEFAULT_OVERHEAD_PERCENTAGE),
            margin_percentage: Decimal::from(DEFAULT_MARGIN_PERCENTAGE),
            packages: Vec::new(),
            summary: RevisionSummary::default(),
            is_deleted: false,
        }
    }
}

impl Revision {
    /// Create an empty revision with default overhead and margin
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Set overhead and margin percentages
    pub fn with_rates(mut self, overhead_percentage: Decimal, margin_percentage: Decimal) -> Self {
        self.overhead_percentage = overhead_percentage;
        self.margin_percentage = margin_percentage;
        self
    }

    /// Add a package
    pub fn add_package(&mut self, mut package: Package) {
        package.revision_id = self.id;
        self.packages.push(package);
    }

    /// Get a package by id
    pub fn package(&self, id: EntityId) -> Option<&Package> {
        self.packages.iter().find(|p| p.id == id)
    }

    /// Get a mutable package by id
    pub fn package_mut(&mut self, id: EntityId) -> Option<&mut Package> {
        self.packages.iter_mut().find(|p| p.id == id)
    }

    /// Iterate packages that are not soft-deleted
    pub fn active_packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter().filter(|p| !p.is_deleted)
    }

    /// Find a worksheet by id in any package
    pub fn find_worksheet(&self, id: EntityId) -> Option<&Worksheet> {
        self.packages.iter().find_map(|p| p.worksheet(id))
    }

    /// Index of the package containing a worksheet
    pub fn package_index_of_worksheet(&self, worksheet_id: EntityId) -> Option<usize> {
        self.packages
            .iter()
            .position(|p| p.worksheet(worksheet_id).is_some())
    }

    /// Locate a row by id
    pub fn find_row(&self, row_id: EntityId) -> Option<RowLocation> {
        for (package_index, pkg) in self.packages.iter().enumerate() {
            for (worksheet_index, ws) in pkg.worksheets.iter().enumerate() {
                if let Some(row_index) = ws.row_index(row_id) {
                    return Some(RowLocation {
                        package_index,
                        worksheet_index,
                        row_index,
                    });
                }
            }
        }
        None
    }

    /// Active rows across all live packages
    pub fn active_row_count(&self) -> usize {
        self.active_packages().map(Package::active_row_count).sum()
    }
}
