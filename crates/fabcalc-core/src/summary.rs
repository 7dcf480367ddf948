//! Derived rollups
//!
//! Summaries are recomputed wholesale by the calculation cascade and never
//! edited directly. The authoritative state is the rows' raw values plus the
//! overhead/margin percentages.

use crate::{EntityId, Error, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;

/// Conventional column holding a row's material cost
pub const MATERIAL_COST_KEY: &str = "material_cost";
/// Conventional column holding a row's labor hours
pub const LABOR_HOURS_KEY: &str = "labor_hours";
/// Conventional column holding a row's labor cost
pub const LABOR_COST_KEY: &str = "labor_cost";
/// Conventional column holding a row's total cost
pub const TOTAL_COST_KEY: &str = "total_cost";

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

fn add(total: &mut Decimal, value: Decimal, what: &'static str) -> Result<()> {
    *total = total.checked_add(value).ok_or(Error::Overflow(what))?;
    Ok(())
}

/// `amount * percentage / 100`
fn percent_of(amount: Decimal, percentage: Decimal, what: &'static str) -> Result<Decimal> {
    amount
        .checked_mul(percentage)
        .and_then(|v| v.checked_div(HUNDRED))
        .ok_or(Error::Overflow(what))
}

/// Worksheet summary fields addressable from cross-worksheet formulas
/// (`Fabrication.TotalCost`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryField {
    TotalCost,
    TotalMaterialCost,
    TotalLaborCost,
    TotalLaborHours,
}

impl SummaryField {
    /// Look up a field by its formula name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "TOTALCOST" => Some(SummaryField::TotalCost),
            "TOTALMATERIALCOST" => Some(SummaryField::TotalMaterialCost),
            "TOTALLABORCOST" => Some(SummaryField::TotalLaborCost),
            "TOTALLABORHOURS" => Some(SummaryField::TotalLaborHours),
            _ => None,
        }
    }

    /// Formula name of the field
    pub fn name(self) -> &'static str {
        match self {
            SummaryField::TotalCost => "TotalCost",
            SummaryField::TotalMaterialCost => "TotalMaterialCost",
            SummaryField::TotalLaborCost => "TotalLaborCost",
            SummaryField::TotalLaborHours => "TotalLaborHours",
        }
    }
}

impl fmt::Display for SummaryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Totals of one worksheet
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WorksheetSummary {
    pub worksheet_id: EntityId,
    pub worksheet_name: String,
    pub material_cost: Decimal,
    pub labor_hours: Decimal,
    pub labor_cost: Decimal,
    pub total_cost: Decimal,
    /// Active (non-header, non-deleted) rows
    pub row_count: usize,
    pub column_totals: BTreeMap<String, Decimal>,
}

impl WorksheetSummary {
    /// Build a summary from column totals, reading the conventional columns
    pub fn from_totals(
        worksheet_id: EntityId,
        worksheet_name: &str,
        row_count: usize,
        column_totals: BTreeMap<String, Decimal>,
    ) -> Self {
        let total_of = |key: &str| {
            column_totals
                .iter()
                .find(|(k, _)| crate::keys_match(k, key))
                .map(|(_, v)| *v)
                .unwrap_or(Decimal::ZERO)
        };

        Self {
            worksheet_id,
            worksheet_name: worksheet_name.to_string(),
            material_cost: total_of(MATERIAL_COST_KEY),
            labor_hours: total_of(LABOR_HOURS_KEY),
            labor_cost: total_of(LABOR_COST_KEY),
            total_cost: total_of(TOTAL_COST_KEY),
            row_count,
            column_totals,
        }
    }

    /// Read a field addressed by a cross-worksheet formula
    pub fn field(&self, field: SummaryField) -> Decimal {
        match field {
            SummaryField::TotalCost => self.total_cost,
            SummaryField::TotalMaterialCost => self.material_cost,
            SummaryField::TotalLaborCost => self.labor_cost,
            SummaryField::TotalLaborHours => self.labor_hours,
        }
    }
}

/// Totals of one package, summed from its worksheets
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PackageSummary {
    pub package_id: EntityId,
    pub package_name: String,
    pub material_cost: Decimal,
    pub labor_hours: Decimal,
    pub labor_cost: Decimal,
    /// Sum of worksheet total costs
    pub subtotal: Decimal,
    pub overhead_percentage: Decimal,
    /// `subtotal * overhead_percentage / 100`
    pub overhead_cost: Decimal,
    /// `subtotal + overhead_cost`
    pub package_total: Decimal,
    pub worksheet_count: usize,
}

impl PackageSummary {
    /// Sum worksheet summaries into a package summary
    ///
    /// Fails with [`Error::Overflow`] when a sum leaves the decimal range.
    pub fn from_worksheets<'a, I>(
        package_id: EntityId,
        package_name: &str,
        overhead_percentage: Decimal,
        worksheets: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = &'a WorksheetSummary>,
    {
        let mut summary = Self {
            package_id,
            package_name: package_name.to_string(),
            overhead_percentage,
            ..Default::default()
        };

        for ws in worksheets {
            add(&mut summary.material_cost, ws.material_cost, "package material cost")?;
            add(&mut summary.labor_hours, ws.labor_hours, "package labor hours")?;
            add(&mut summary.labor_cost, ws.labor_cost, "package labor cost")?;
            add(&mut summary.subtotal, ws.total_cost, "package subtotal")?;
            summary.worksheet_count += 1;
        }

        summary.overhead_cost =
            percent_of(summary.subtotal, overhead_percentage, "package overhead")?;
        summary.package_total = summary.subtotal;
        add(&mut summary.package_total, summary.overhead_cost, "package total")?;
        Ok(summary)
    }
}

/// Overhead and margin applied to a subtotal
///
/// Overhead is applied first; margin is applied to subtotal + overhead.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CostBreakdown {
    pub subtotal: Decimal,
    pub overhead_percentage: Decimal,
    pub overhead_amount: Decimal,
    pub subtotal_with_overhead: Decimal,
    pub margin_percentage: Decimal,
    pub margin_amount: Decimal,
    pub total_amount: Decimal,
}

impl CostBreakdown {
    /// Apply overhead then margin to a subtotal
    pub fn calculate(
        subtotal: Decimal,
        overhead_percentage: Decimal,
        margin_percentage: Decimal,
    ) -> Result<Self> {
        let overhead_amount = percent_of(subtotal, overhead_percentage, "overhead")?;
        let mut subtotal_with_overhead = subtotal;
        add(&mut subtotal_with_overhead, overhead_amount, "subtotal with overhead")?;
        let margin_amount = percent_of(subtotal_with_overhead, margin_percentage, "margin")?;
        let mut total_amount = subtotal_with_overhead;
        add(&mut total_amount, margin_amount, "total amount")?;

        Ok(Self {
            subtotal,
            overhead_percentage,
            overhead_amount,
            subtotal_with_overhead,
            margin_percentage,
            margin_amount,
            total_amount,
        })
    }
}

/// Totals of one revision, summed from its packages
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RevisionSummary {
    pub revision_id: EntityId,
    pub material_cost: Decimal,
    pub labor_hours: Decimal,
    pub labor_cost: Decimal,
    pub breakdown: CostBreakdown,
    pub package_count: usize,
}

impl RevisionSummary {
    /// Sum package subtotals and apply the revision's overhead and margin
    pub fn from_packages<'a, I>(
        revision_id: EntityId,
        overhead_percentage: Decimal,
        margin_percentage: Decimal,
        packages: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = &'a PackageSummary>,
    {
        let mut summary = Self {
            revision_id,
            ..Default::default()
        };
        let mut subtotal = Decimal::ZERO;

        for pkg in packages {
            add(&mut summary.material_cost, pkg.material_cost, "revision material cost")?;
            add(&mut summary.labor_hours, pkg.labor_hours, "revision labor hours")?;
            add(&mut summary.labor_cost, pkg.labor_cost, "revision labor cost")?;
            add(&mut subtotal, pkg.subtotal, "revision subtotal")?;
            summary.package_count += 1;
        }

        summary.breakdown =
            CostBreakdown::calculate(subtotal, overhead_percentage, margin_percentage)?;
        Ok(summary)
    }

    /// Final amount after overhead and margin
    pub fn total_amount(&self) -> Decimal {
        self.breakdown.total_amount
    }
}
