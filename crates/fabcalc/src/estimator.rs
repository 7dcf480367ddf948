//! Trigger points and summary queries
//!
//! An [`Estimator`] loads the revision owning the addressed entity from its
//! store, runs the requested stage of the cascade and saves the result. Each
//! trigger returns `None` when the entity, or anything above it, is missing
//! or soft-deleted.

use crate::calculation::{CalculationEngine, CalculationOptions, CalculationReport};
use crate::cross_sheet::{HaltedSheets, SiblingSheets};
use crate::error::Result;
use crate::store::{EntityRef, EstimateStore};
use fabcalc_core::{
    EntityId, Package, PackageSummary, Revision, RevisionSummary, Worksheet, WorksheetSummary,
};
use fabcalc_formula::{validate_worksheet_formula, FormulaValidation};
use log::{info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A recalculated aggregate root with the issues found on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Recalculated<T> {
    pub value: T,
    pub report: CalculationReport,
}

/// Recalculation service over a store
#[derive(Debug)]
pub struct Estimator<S> {
    store: S,
    engine: CalculationEngine,
}

impl<S: EstimateStore> Estimator<S> {
    /// Create an estimator with default options
    pub fn new(store: S) -> Self {
        Self::with_options(store, CalculationOptions::default())
    }

    /// Create an estimator with custom options
    pub fn with_options(store: S, options: CalculationOptions) -> Self {
        Self {
            store,
            engine: CalculationEngine::new(options),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn engine_mut(&mut self) -> &mut CalculationEngine {
        &mut self.engine
    }

    /// Re-evaluate one row and recompute its worksheet's totals and summary
    ///
    /// Returns the worksheet holding the row. Package and revision summaries
    /// are left alone.
    pub fn recalculate_row(&mut self, row_id: EntityId) -> Result<Option<Recalculated<Worksheet>>> {
        let mut revision = match self.load_owner(EntityRef::Row(row_id))? {
            Some(revision) => revision,
            None => return not_found("Row", row_id),
        };
        let location = match revision.find_row(row_id) {
            Some(location) => location,
            None => return not_found("Row", row_id),
        };

        let package = &mut revision.packages[location.package_index];
        let worksheet = &package.worksheets[location.worksheet_index];
        if package.is_deleted || worksheet.is_deleted || worksheet.rows[location.row_index].is_deleted
        {
            return not_found("Row", row_id);
        }

        let halted = HaltedSheets::default();
        let (report, value) = match SiblingSheets::split(
            &mut package.worksheets,
            location.worksheet_index,
            &halted,
        ) {
            Some((worksheet, siblings)) => {
                let report = self.engine.calculate_row(worksheet, row_id, &siblings);
                (report, worksheet.clone())
            }
            None => return not_found("Row", row_id),
        };

        self.store.save_revision(&revision)?;
        info!("Row {} recalculated in worksheet {}", row_id, value.id);
        Ok(Some(Recalculated { value, report }))
    }

    /// Recalculate every row of a worksheet, then its totals and summary
    ///
    /// Cross-worksheet references read the siblings as they are stored.
    pub fn recalculate_worksheet(
        &mut self,
        worksheet_id: EntityId,
    ) -> Result<Option<Recalculated<Worksheet>>> {
        let mut revision = match self.load_owner(EntityRef::Worksheet(worksheet_id))? {
            Some(revision) => revision,
            None => return not_found("Worksheet", worksheet_id),
        };
        let package = match live_package_of_worksheet(&mut revision, worksheet_id) {
            Some(package) => package,
            None => return not_found("Worksheet", worksheet_id),
        };
        let index = match package
            .worksheets
            .iter()
            .position(|ws| ws.id == worksheet_id && !ws.is_deleted)
        {
            Some(index) => index,
            None => return not_found("Worksheet", worksheet_id),
        };

        let halted = HaltedSheets::default();
        let (report, value) = match SiblingSheets::split(&mut package.worksheets, index, &halted) {
            Some((worksheet, siblings)) => {
                let report = self.engine.calculate_worksheet(worksheet, &siblings);
                (report, worksheet.clone())
            }
            None => return not_found("Worksheet", worksheet_id),
        };

        self.store.save_revision(&revision)?;
        Ok(Some(Recalculated { value, report }))
    }

    /// Recalculate the worksheets of a package and the package summary
    pub fn recalculate_package(
        &mut self,
        package_id: EntityId,
    ) -> Result<Option<Recalculated<Package>>> {
        let mut revision = match self.load_owner(EntityRef::Package(package_id))? {
            Some(revision) => revision,
            None => return not_found("Package", package_id),
        };
        let package = match revision.package_mut(package_id).filter(|p| !p.is_deleted) {
            Some(package) => package,
            None => return not_found("Package", package_id),
        };

        let report = self.engine.calculate_package(package)?;
        let value = package.clone();
        self.store.save_revision(&revision)?;
        Ok(Some(Recalculated { value, report }))
    }

    /// Recalculate a whole revision, applying overhead and margin
    pub fn recalculate_revision(
        &mut self,
        revision_id: EntityId,
    ) -> Result<Option<Recalculated<Revision>>> {
        let mut revision = match self.load_live_revision(revision_id)? {
            Some(revision) => revision,
            None => return not_found("Revision", revision_id),
        };

        let report = self.engine.calculate_revision(&mut revision)?;
        self.store.save_revision(&revision)?;
        Ok(Some(Recalculated {
            value: revision,
            report,
        }))
    }

    /// Stored column totals of a worksheet
    pub fn column_totals(&self, worksheet_id: EntityId) -> Result<Option<BTreeMap<String, Decimal>>> {
        Ok(self.worksheet(worksheet_id)?.map(|ws| ws.totals))
    }

    /// Stored summary of a worksheet
    pub fn worksheet_summary(&self, worksheet_id: EntityId) -> Result<Option<WorksheetSummary>> {
        Ok(self.worksheet(worksheet_id)?.map(|ws| ws.summary))
    }

    /// Stored summary of a package
    pub fn package_summary(&self, package_id: EntityId) -> Result<Option<PackageSummary>> {
        let revision = match self.load_owner(EntityRef::Package(package_id))? {
            Some(revision) => revision,
            None => return Ok(None),
        };
        Ok(revision
            .packages
            .into_iter()
            .find(|p| p.id == package_id && !p.is_deleted)
            .map(|p| p.summary))
    }

    /// Stored summary of a revision
    pub fn revision_summary(&self, revision_id: EntityId) -> Result<Option<RevisionSummary>> {
        Ok(self.load_live_revision(revision_id)?.map(|rev| rev.summary))
    }

    /// Check a formula against the columns of a worksheet without saving it
    ///
    /// With a `column_key` the formula is checked as that column's new
    /// formula, so cycles it would close are reported.
    pub fn validate_formula(
        &self,
        worksheet_id: EntityId,
        column_key: Option<&str>,
        formula: &str,
    ) -> Result<Option<FormulaValidation>> {
        let worksheet = match self.worksheet(worksheet_id)? {
            Some(worksheet) => worksheet,
            None => return Ok(None),
        };
        Ok(Some(validate_worksheet_formula(&worksheet, column_key, formula)))
    }

    fn load_live_revision(&self, revision_id: EntityId) -> Result<Option<Revision>> {
        Ok(self
            .store
            .load_revision(revision_id)?
            .filter(|rev| !rev.is_deleted))
    }

    fn load_owner(&self, entity: EntityRef) -> Result<Option<Revision>> {
        match self.store.find_revision_of(entity)? {
            Some(revision_id) => self.load_live_revision(revision_id),
            None => Ok(None),
        }
    }

    fn worksheet(&self, worksheet_id: EntityId) -> Result<Option<Worksheet>> {
        let mut revision = match self.load_owner(EntityRef::Worksheet(worksheet_id))? {
            Some(revision) => revision,
            None => return Ok(None),
        };
        let worksheet = live_package_of_worksheet(&mut revision, worksheet_id).and_then(|p| {
            p.worksheets
                .iter()
                .find(|ws| ws.id == worksheet_id && !ws.is_deleted)
                .cloned()
        });
        Ok(worksheet)
    }
}

fn live_package_of_worksheet(revision: &mut Revision, worksheet_id: EntityId) -> Option<&mut Package> {
    let index = revision.package_index_of_worksheet(worksheet_id)?;
    Some(&mut revision.packages[index]).filter(|p| !p.is_deleted)
}

fn not_found<T>(kind: &str, id: EntityId) -> Result<Option<T>> {
    warn!("{} {} not found or deleted", kind, id);
    Ok(None)
}
