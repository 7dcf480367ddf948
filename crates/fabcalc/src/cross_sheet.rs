//! Cross-worksheet resolver
//!
//! Resolves `Name.SUM(column)` and `Name.TotalCost` style references against
//! the other worksheets of the package, as they are currently stored.

use ahash::AHashSet;
use fabcalc_core::{EntityId, SummaryField, Worksheet};
use fabcalc_formula::{aggregate_worksheet, AggregateFunction, CrossSheetSource, EvalErrorKind};
use rust_decimal::Decimal;

/// Worksheets of a package left out of the current run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HaltedSheets {
    /// On a cross-worksheet cycle
    pub cyclic: AHashSet<EntityId>,
    /// Holding a formula that does not parse or a column cycle
    pub invalid: AHashSet<EntityId>,
}

impl HaltedSheets {
    /// True when the worksheet was not recalculated in this run
    pub fn contains(&self, worksheet_id: EntityId) -> bool {
        self.cyclic.contains(&worksheet_id) || self.invalid.contains(&worksheet_id)
    }
}

/// The worksheets of a package other than the one being calculated
///
/// Reading a halted worksheet fails: one on a cross-worksheet cycle with
/// [`EvalErrorKind::CircularWorksheetReference`], an invalid one with
/// [`EvalErrorKind::HaltedWorksheet`].
#[derive(Debug, Clone, Copy)]
pub struct SiblingSheets<'a> {
    before: &'a [Worksheet],
    after: &'a [Worksheet],
    halted: &'a HaltedSheets,
}

impl<'a> SiblingSheets<'a> {
    /// Siblings from two slices surrounding the current worksheet
    pub fn new(before: &'a [Worksheet], after: &'a [Worksheet], halted: &'a HaltedSheets) -> Self {
        Self {
            before,
            after,
            halted,
        }
    }

    /// Borrow the worksheet at `index` mutably and the others as its siblings
    pub fn split(
        worksheets: &'a mut [Worksheet],
        index: usize,
        halted: &'a HaltedSheets,
    ) -> Option<(&'a mut Worksheet, SiblingSheets<'a>)> {
        if index >= worksheets.len() {
            return None;
        }
        let (before, rest) = worksheets.split_at_mut(index);
        let (current, after) = rest.split_first_mut()?;
        Some((current, SiblingSheets::new(before, after, halted)))
    }

    /// Look up a live sibling by name (case-insensitive)
    pub fn find(&self, name: &str) -> Result<&'a Worksheet, EvalErrorKind> {
        let worksheet = self
            .before
            .iter()
            .chain(self.after.iter())
            .filter(|ws| !ws.is_deleted)
            .find(|ws| ws.name_matches(name))
            .ok_or_else(|| EvalErrorKind::UnknownWorksheet(name.to_string()))?;

        if self.halted.cyclic.contains(&worksheet.id) {
            return Err(EvalErrorKind::CircularWorksheetReference(
                worksheet.name.clone(),
            ));
        }
        if self.halted.invalid.contains(&worksheet.id) {
            return Err(EvalErrorKind::HaltedWorksheet(worksheet.name.clone()));
        }
        Ok(worksheet)
    }
}

impl CrossSheetSource for SiblingSheets<'_> {
    fn aggregate(
        &self,
        worksheet: &str,
        func: AggregateFunction,
        column: &str,
    ) -> Result<Decimal, EvalErrorKind> {
        aggregate_worksheet(self.find(worksheet)?, func, column)
    }

    fn property(&self, worksheet: &str, field: SummaryField) -> Result<Decimal, EvalErrorKind> {
        Ok(self.find(worksheet)?.summary.field(field))
    }
}
