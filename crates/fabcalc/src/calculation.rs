//! Recalculation cascade
//!
//! Recomputes the formula columns of a worksheet, then rolls the results up
//! through worksheet, package and revision summaries. Every stage only writes
//! derived state: `computed`, `calculated_total`, `totals` and the summaries.
//!
//! # Example
//!
//! ```rust
//! use fabcalc::prelude::*;
//! use fabcalc::NoCrossSheet;
//! use rust_decimal::Decimal;
//!
//! let mut sheet = Worksheet::new(1, 1, "Steel")
//!     .with_column(ColumnDef::new("qty", ColumnType::Number)).unwrap()
//!     .with_column(ColumnDef::new("unit_cost", ColumnType::Currency)).unwrap()
//!     .with_column(ColumnDef::formula("total_cost", "qty * unit_cost")).unwrap();
//! sheet.add_row(Row::new(1).with_value("qty", 2).with_value("unit_cost", 10));
//!
//! let mut engine = CalculationEngine::default();
//! let report = engine.calculate_worksheet(&mut sheet, &NoCrossSheet);
//! assert!(report.is_clean());
//! assert_eq!(sheet.totals["total_cost"], Decimal::from(20));
//! ```

use crate::cross_sheet::{HaltedSheets, SiblingSheets};
use crate::store::EntityRef;
use crate::error::{Error, Result};
use ahash::{AHashMap, AHashSet};
use fabcalc_core::{
    ColumnDef, EntityId, Package, PackageSummary, Revision, RevisionSummary, Row, Worksheet,
    WorksheetSummary, DEFAULT_DECIMAL_PLACES, TOTAL_COST_KEY,
};
use fabcalc_formula::{
    aggregate, evaluate, round_half_away, AggregateFunction, ColumnGraph, CrossSheetSource,
    DependencyGraph, EvalError, EvalErrorKind, EvalWarning, Evaluated, EvaluationOptions, Expr,
    FormulaCache, FormulaError, FormulaResult, RowContext,
};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Options for recalculation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalculationOptions {
    /// Division by zero and non-numeric input handling
    pub evaluation: EvaluationOptions,
    /// Row ceiling for package and revision recalculation (default: none)
    pub max_rows: Option<usize>,
}

/// Statistics from a calculation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalculationStats {
    /// Worksheets whose rows and totals were recomputed
    pub worksheets_calculated: usize,
    /// Worksheets left untouched because of a parse error or a cycle
    pub worksheets_halted: usize,
    /// Active rows evaluated
    pub rows_calculated: usize,
    /// Formula cells stored
    pub cells_calculated: usize,
    /// Formula cells that kept their previous value
    pub cells_failed: usize,
    /// Non-fatal warnings recorded
    pub warnings: usize,
}

/// Something that went wrong during a calculation run
#[derive(Debug, Clone, PartialEq)]
pub enum CalculationIssue {
    /// A cell could not be evaluated and kept its previous value
    CellFailed {
        worksheet_id: EntityId,
        error: EvalError,
    },
    /// A cell was stored but its value was substituted along the way
    CellWarning {
        worksheet_id: EntityId,
        column_key: String,
        row_id: EntityId,
        warning: EvalWarning,
    },
    /// A worksheet was not recalculated at all
    WorksheetHalted {
        worksheet_id: EntityId,
        worksheet_name: String,
        error: FormulaError,
    },
    /// A package or revision summary kept its previous value
    SummaryFailed {
        entity: EntityRef,
        error: fabcalc_core::Error,
    },
}

impl fmt::Display for CalculationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalculationIssue::CellFailed {
                worksheet_id,
                error,
            } => write!(f, "Worksheet {}: {}", worksheet_id, error),
            CalculationIssue::CellWarning {
                worksheet_id,
                column_key,
                row_id,
                warning,
            } => write!(
                f,
                "Worksheet {}: Cell {} of row {}: {}",
                worksheet_id, column_key, row_id, warning
            ),
            CalculationIssue::WorksheetHalted {
                worksheet_id,
                worksheet_name,
                error,
            } => write!(
                f,
                "Worksheet '{}' ({}) not recalculated: {}",
                worksheet_name, worksheet_id, error
            ),
            CalculationIssue::SummaryFailed { entity, error } => {
                write!(f, "{:?} summary not updated: {}", entity, error)
            }
        }
    }
}

/// Statistics and issues of one trigger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalculationReport {
    pub stats: CalculationStats,
    pub issues: Vec<CalculationIssue>,
}

impl CalculationReport {
    /// True when nothing failed and nothing was substituted
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Cells that failed
    pub fn cell_errors(&self) -> impl Iterator<Item = &EvalError> + '_ {
        self.issues.iter().filter_map(|issue| match issue {
            CalculationIssue::CellFailed { error, .. } => Some(error),
            _ => None,
        })
    }

    /// Warnings recorded for stored cells
    pub fn warnings(&self) -> impl Iterator<Item = &EvalWarning> + '_ {
        self.issues.iter().filter_map(|issue| match issue {
            CalculationIssue::CellWarning { warning, .. } => Some(warning),
            _ => None,
        })
    }

    /// Worksheets that were halted, with the reason
    pub fn halted_worksheets(&self) -> impl Iterator<Item = (EntityId, &FormulaError)> + '_ {
        self.issues.iter().filter_map(|issue| match issue {
            CalculationIssue::WorksheetHalted {
                worksheet_id,
                error,
                ..
            } => Some((*worksheet_id, error)),
            _ => None,
        })
    }

    fn halt(&mut self, worksheet: &Worksheet, error: FormulaError) {
        warn!(
            "Worksheet '{}' ({}) halted: {}",
            worksheet.name, worksheet.id, error
        );
        self.stats.worksheets_halted += 1;
        self.issues.push(CalculationIssue::WorksheetHalted {
            worksheet_id: worksheet.id,
            worksheet_name: worksheet.name.clone(),
            error,
        });
    }

    /// Rollups that failed, with the reason
    pub fn summary_errors(&self) -> impl Iterator<Item = (EntityRef, &fabcalc_core::Error)> + '_ {
        self.issues.iter().filter_map(|issue| match issue {
            CalculationIssue::SummaryFailed { entity, error } => Some((*entity, error)),
            _ => None,
        })
    }

    fn summary_failed(&mut self, entity: EntityRef, error: fabcalc_core::Error) {
        warn!("{:?} summary not updated: {}", entity, error);
        self.issues.push(CalculationIssue::SummaryFailed { entity, error });
    }

    fn cell_failed(&mut self, worksheet_id: EntityId, error: EvalError) {
        debug!("Worksheet {}: {}", worksheet_id, error);
        self.stats.cells_failed += 1;
        self.issues.push(CalculationIssue::CellFailed {
            worksheet_id,
            error,
        });
    }

    fn cell_warning(
        &mut self,
        worksheet_id: EntityId,
        column_key: &str,
        row_id: EntityId,
        warning: EvalWarning,
    ) {
        self.stats.warnings += 1;
        self.issues.push(CalculationIssue::CellWarning {
            worksheet_id,
            column_key: column_key.to_string(),
            row_id,
            warning,
        });
    }
}

/// Formula columns of a worksheet in evaluation order, parsed
#[derive(Debug)]
pub struct WorksheetPlan {
    order: Vec<(String, Arc<Expr>)>,
    worksheet_references: Vec<String>,
}

impl WorksheetPlan {
    fn build(worksheet: &Worksheet, cache: &mut FormulaCache) -> FormulaResult<Self> {
        let graph = ColumnGraph::build(&worksheet.columns, Some(&worksheet.name), cache)?;
        let order = graph
            .evaluation_order()?
            .into_iter()
            .filter_map(|key| {
                let expr = graph.formula(&key)?.clone();
                Some((key, expr))
            })
            .collect();

        Ok(Self {
            order,
            worksheet_references: graph.worksheet_references().iter().cloned().collect(),
        })
    }

    /// Formula column keys, each after the columns it reads
    pub fn evaluation_order(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(|(key, _)| key.as_str())
    }

    /// Sibling worksheet names read by any formula
    pub fn worksheet_references(&self) -> &[String] {
        &self.worksheet_references
    }
}

/// Identity of a worksheet's formula set; a change invalidates its plan
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlanSignature {
    name: String,
    columns: Vec<(String, Option<String>)>,
}

impl PlanSignature {
    fn of(worksheet: &Worksheet) -> Self {
        Self {
            name: worksheet.name.clone(),
            columns: worksheet
                .columns
                .iter()
                .map(|c| (c.key.clone(), c.formula.clone()))
                .collect(),
        }
    }
}

#[derive(Debug)]
struct CachedPlan {
    signature: PlanSignature,
    plan: FormulaResult<Arc<WorksheetPlan>>,
}

/// The calculation engine
///
/// Holds the parsed-formula cache and one evaluation plan per worksheet; no
/// other state survives between calls.
#[derive(Debug, Default)]
pub struct CalculationEngine {
    options: CalculationOptions,
    formulas: FormulaCache,
    plans: AHashMap<EntityId, CachedPlan>,
}

impl CalculationEngine {
    /// Create an engine with the given options
    pub fn new(options: CalculationOptions) -> Self {
        Self {
            options,
            formulas: FormulaCache::new(),
            plans: AHashMap::default(),
        }
    }

    /// Options in use
    pub fn options(&self) -> &CalculationOptions {
        &self.options
    }

    /// Drop the cached plan of a worksheet
    pub fn invalidate(&mut self, worksheet_id: EntityId) {
        self.plans.remove(&worksheet_id);
    }

    /// Drop every cached plan and parsed formula
    pub fn clear_cache(&mut self) {
        self.plans.clear();
        self.formulas.clear();
    }

    /// Evaluation plan of a worksheet, rebuilt when its formulas changed
    pub fn plan(&mut self, worksheet: &Worksheet) -> FormulaResult<Arc<WorksheetPlan>> {
        let signature = PlanSignature::of(worksheet);
        if let Some(cached) = self.plans.get(&worksheet.id) {
            if cached.signature == signature {
                debug!("Using cached evaluation order for worksheet {}", worksheet.id);
                return cached.plan.clone();
            }
        }

        let plan = WorksheetPlan::build(worksheet, &mut self.formulas).map(Arc::new);
        if let Ok(plan) = &plan {
            debug!(
                "Rebuilt evaluation order for worksheet {}: [{}]",
                worksheet.id,
                plan.evaluation_order().collect::<Vec<_>>().join(", ")
            );
        }
        self.plans.insert(
            worksheet.id,
            CachedPlan {
                signature,
                plan: plan.clone(),
            },
        );
        plan
    }

    /// Re-evaluate one row, then recompute the worksheet totals and summary
    ///
    /// Aggregates read the other rows as they are stored.
    pub fn calculate_row(
        &mut self,
        worksheet: &mut Worksheet,
        row_id: EntityId,
        siblings: &dyn CrossSheetSource,
    ) -> CalculationReport {
        let mut report = CalculationReport::default();
        let plan = match self.plan(worksheet) {
            Ok(plan) => plan,
            Err(err) => {
                report.halt(worksheet, err);
                return report;
            }
        };

        let worksheet_id = worksheet.id;
        if let Some(index) = worksheet.row_index(row_id) {
            if worksheet.rows[index].is_active() {
                let Worksheet { columns, rows, .. } = &mut *worksheet;
                mirror_raw_values(columns, &mut rows[index]);

                for (key, expr) in &plan.order {
                    let places = decimal_places(worksheet, key);
                    let outcome = {
                        let sheet: &Worksheet = worksheet;
                        let ctx = RowContext::new(sheet, &sheet.rows[index]).with_cross_sheet(siblings);
                        evaluate(expr, &ctx, &self.options.evaluation)
                    };
                    store_result(
                        &mut worksheet.rows[index],
                        worksheet_id,
                        key,
                        places,
                        outcome,
                        &mut report,
                    );
                }

                let has_total = worksheet.column(TOTAL_COST_KEY).is_some();
                update_calculated_total(&mut worksheet.rows[index], has_total);
                report.stats.rows_calculated += 1;
            }
        }

        summarize_worksheet(worksheet);
        report.stats.worksheets_calculated += 1;
        report
    }

    /// Recalculate every row of a worksheet, then its totals and summary
    pub fn calculate_worksheet(
        &mut self,
        worksheet: &mut Worksheet,
        siblings: &dyn CrossSheetSource,
    ) -> CalculationReport {
        let mut report = CalculationReport::default();
        match self.plan(worksheet) {
            Ok(plan) => self.run_worksheet(worksheet, &plan, siblings, &mut report),
            Err(err) => report.halt(worksheet, err),
        }
        report
    }

    /// Recalculate the worksheets of a package in dependency order, then the
    /// package summary
    pub fn calculate_package(&mut self, package: &mut Package) -> Result<CalculationReport> {
        self.check_row_limit(package.active_row_count())?;
        let mut report = CalculationReport::default();
        self.run_package(package, &mut report);
        Ok(report)
    }

    /// Recalculate every package of a revision, then the revision summary
    pub fn calculate_revision(&mut self, revision: &mut Revision) -> Result<CalculationReport> {
        self.check_row_limit(revision.active_row_count())?;
        let mut report = CalculationReport::default();
        for package in revision.packages.iter_mut().filter(|p| !p.is_deleted) {
            self.run_package(package, &mut report);
        }
        match summarize_revision(revision) {
            Ok(()) => info!(
                "Recalculated revision {}: subtotal {}, total {}",
                revision.id,
                revision.summary.breakdown.subtotal,
                revision.summary.total_amount()
            ),
            Err(err) => report.summary_failed(EntityRef::Revision(revision.id), err),
        }
        Ok(report)
    }

    fn check_row_limit(&self, rows: usize) -> Result<()> {
        match self.options.max_rows {
            Some(limit) if rows > limit => Err(Error::RowLimitExceeded { rows, limit }),
            _ => Ok(()),
        }
    }

    /// Column-major pass: each formula column is evaluated for every row
    /// before the next one, so aggregates see finalized values
    fn run_worksheet(
        &self,
        worksheet: &mut Worksheet,
        plan: &WorksheetPlan,
        siblings: &dyn CrossSheetSource,
        report: &mut CalculationReport,
    ) {
        let worksheet_id = worksheet.id;
        {
            let Worksheet { columns, rows, .. } = &mut *worksheet;
            for row in rows.iter_mut().filter(|row| row.is_active()) {
                mirror_raw_values(columns, row);
            }
        }

        for (key, expr) in &plan.order {
            let places = decimal_places(worksheet, key);
            let outcomes: Vec<(usize, std::result::Result<Evaluated, EvalErrorKind>)> = {
                let sheet: &Worksheet = worksheet;
                sheet
                    .rows
                    .iter()
                    .enumerate()
                    .filter(|(_, row)| row.is_active())
                    .map(|(index, row)| {
                        let ctx = RowContext::new(sheet, row).with_cross_sheet(siblings);
                        (index, evaluate(expr, &ctx, &self.options.evaluation))
                    })
                    .collect()
            };

            for (index, outcome) in outcomes {
                store_result(
                    &mut worksheet.rows[index],
                    worksheet_id,
                    key,
                    places,
                    outcome,
                    report,
                );
            }
        }

        let has_total = worksheet.column(TOTAL_COST_KEY).is_some();
        let mut rows_calculated = 0;
        for row in worksheet.rows.iter_mut().filter(|row| row.is_active()) {
            update_calculated_total(row, has_total);
            rows_calculated += 1;
        }

        summarize_worksheet(worksheet);
        report.stats.rows_calculated += rows_calculated;
        report.stats.worksheets_calculated += 1;
        info!(
            "Recalculated worksheet '{}' ({}): {} rows, total cost {}",
            worksheet.name, worksheet_id, rows_calculated, worksheet.summary.total_cost
        );
    }

    fn run_package(&mut self, package: &mut Package, report: &mut CalculationReport) {
        let mut plans = Vec::new();
        let mut halted = HaltedSheets::default();
        for (index, worksheet) in package.worksheets.iter().enumerate() {
            if worksheet.is_deleted {
                continue;
            }
            match self.plan(worksheet) {
                Ok(plan) => plans.push((index, plan)),
                Err(err) => {
                    halted.invalid.insert(worksheet.id);
                    report.halt(worksheet, err);
                }
            }
        }

        let order = worksheet_order(package, &plans, &mut halted.cyclic, report);
        debug!(
            "Worksheet order for package {}: [{}]",
            package.id,
            order
                .iter()
                .map(|&i| package.worksheets[i].name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        for index in order {
            let plan = match plans.iter().find(|(i, _)| *i == index) {
                Some((_, plan)) => Arc::clone(plan),
                None => continue,
            };
            if let Some((worksheet, siblings)) =
                SiblingSheets::split(&mut package.worksheets, index, &halted)
            {
                self.run_worksheet(worksheet, &plan, &siblings, report);
            }
        }

        match summarize_package(package) {
            Ok(()) => info!(
                "Recalculated package '{}' ({}): subtotal {}, total {}",
                package.name, package.id, package.summary.subtotal, package.summary.package_total
            ),
            Err(err) => report.summary_failed(EntityRef::Package(package.id), err),
        }
    }
}

/// Order live worksheets so each comes after the worksheets it reads
///
/// Worksheets on a cross-worksheet cycle are halted, left out of the order
/// and added to `cyclic`.
fn worksheet_order(
    package: &Package,
    plans: &[(usize, Arc<WorksheetPlan>)],
    cyclic: &mut AHashSet<EntityId>,
    report: &mut CalculationReport,
) -> Vec<usize> {
    loop {
        let graph = worksheet_graph(package, plans, cyclic);
        let cycle = match graph.topological_order() {
            Ok(order) => return order,
            Err(cycle) => cycle,
        };

        let names: Vec<String> = cycle
            .iter()
            .map(|&i| package.worksheets[i].name.clone())
            .collect();
        warn!(
            "Cross-worksheet cycle in package {}: {}",
            package.id,
            names.join(" -> ")
        );
        let error = FormulaError::CircularReference { cycle: names };
        for &index in &cycle {
            let worksheet = &package.worksheets[index];
            if cyclic.insert(worksheet.id) {
                report.halt(worksheet, error.clone());
            }
        }
    }
}

fn worksheet_graph(
    package: &Package,
    plans: &[(usize, Arc<WorksheetPlan>)],
    cyclic: &AHashSet<EntityId>,
) -> DependencyGraph<usize> {
    let live = |index: usize| !cyclic.contains(&package.worksheets[index].id);
    let mut graph = DependencyGraph::new();

    for (index, plan) in plans.iter().filter(|(i, _)| live(*i)) {
        graph.add_node(*index);
        for name in plan.worksheet_references() {
            let target = plans
                .iter()
                .map(|(i, _)| *i)
                .filter(|&i| i != *index && live(i))
                .find(|&i| package.worksheets[i].name_matches(name));
            if let Some(target) = target {
                graph.add_dependency(*index, target);
            }
        }
    }

    graph
}

fn decimal_places(worksheet: &Worksheet, key: &str) -> u32 {
    worksheet
        .column(key)
        .map_or(DEFAULT_DECIMAL_PLACES, |c| c.decimal_places)
}

/// Input columns keep their raw value as their computed value; entries for
/// columns that no longer exist are dropped
fn mirror_raw_values(columns: &[ColumnDef], row: &mut Row) {
    row.computed
        .retain(|key, _| columns.iter().any(|c| c.matches_key(key)));

    for column in columns.iter().filter(|c| !c.is_formula()) {
        match row.value(&column.key).to_decimal() {
            Some(value) => {
                row.computed.insert(column.key.clone(), value);
            }
            None => {
                row.computed.remove(&column.key);
            }
        }
    }
}

fn store_result(
    row: &mut Row,
    worksheet_id: EntityId,
    key: &str,
    places: u32,
    outcome: std::result::Result<Evaluated, EvalErrorKind>,
    report: &mut CalculationReport,
) {
    let rounded = outcome.and_then(|evaluated| {
        round_half_away(evaluated.value, i64::from(places))
            .map(|value| (value, evaluated.warnings))
            .ok_or(EvalErrorKind::Overflow)
    });

    match rounded {
        Ok((value, warnings)) => {
            row.computed.insert(key.to_string(), value);
            report.stats.cells_calculated += 1;
            for warning in warnings {
                report.cell_warning(worksheet_id, key, row.id, warning);
            }
        }
        Err(kind) => report.cell_failed(
            worksheet_id,
            EvalError {
                column_key: key.to_string(),
                row_id: row.id,
                kind,
            },
        ),
    }
}

fn update_calculated_total(row: &mut Row, has_total: bool) {
    row.calculated_total = if has_total {
        row.computed_value(TOTAL_COST_KEY)
    } else {
        None
    };
}

/// Worksheet stage: column totals and summary from the stored row values
pub fn summarize_worksheet(worksheet: &mut Worksheet) {
    let mut totals = BTreeMap::new();
    for column in worksheet.columns.iter().filter(|c| c.is_numeric()) {
        let total = aggregate(AggregateFunction::Sum, column, &worksheet.rows)
            .ok()
            .and_then(|sum| round_half_away(sum, i64::from(column.decimal_places)));
        match total {
            Some(total) => {
                totals.insert(column.key.clone(), total);
            }
            None => warn!(
                "Total of column '{}' in worksheet {} overflowed",
                column.key, worksheet.id
            ),
        }
    }

    let row_count = worksheet.active_rows().count();
    worksheet.summary =
        WorksheetSummary::from_totals(worksheet.id, &worksheet.name, row_count, totals.clone());
    worksheet.totals = totals;
}

/// Package stage: sum the summaries of live worksheets
///
/// Halted worksheets contribute the summary they had before. On overflow the
/// package keeps its previous summary.
pub fn summarize_package(package: &mut Package) -> fabcalc_core::Result<()> {
    package.summary = PackageSummary::from_worksheets(
        package.id,
        &package.name,
        package.overhead_percentage,
        package.active_worksheets().map(|ws| &ws.summary),
    )?;
    Ok(())
}

/// Revision stage: sum package subtotals, then apply overhead and margin
///
/// On overflow the revision keeps its previous summary.
pub fn summarize_revision(revision: &mut Revision) -> fabcalc_core::Result<()> {
    revision.summary = RevisionSummary::from_packages(
        revision.id,
        revision.overhead_percentage,
        revision.margin_percentage,
        revision.active_packages().map(|p| &p.summary),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabcalc_core::ColumnType;
    use fabcalc_formula::{DivisionByZeroPolicy, NoCrossSheet};
    use pretty_assertions::assert_eq;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sheet() -> Worksheet {
        let mut ws = Worksheet::new(1, 1, "Steel")
            .with_column(ColumnDef::new("qty", ColumnType::Number))
            .unwrap()
            .with_column(ColumnDef::new("unit_cost", ColumnType::Currency))
            .unwrap()
            .with_column(ColumnDef::formula("total_cost", "qty * unit_cost"))
            .unwrap();
        ws.add_row(Row::new(1).with_value("qty", 2).with_value("unit_cost", 10));
        ws.add_row(Row::new(2).with_value("qty", 4).with_value("unit_cost", 5));
        ws
    }

    fn computed(ws: &Worksheet, key: &str) -> Vec<Option<Decimal>> {
        ws.rows.iter().map(|r| r.computed_value(key)).collect()
    }

    #[test]
    fn test_worksheet_calculation() {
        let mut ws = sheet();
        let mut engine = CalculationEngine::default();
        let report = engine.calculate_worksheet(&mut ws, &NoCrossSheet);

        assert!(report.is_clean());
        assert_eq!(report.stats.rows_calculated, 2);
        assert_eq!(report.stats.cells_calculated, 2);
        assert_eq!(
            computed(&ws, "total_cost"),
            vec![Some(dec("20")), Some(dec("20"))]
        );
        assert_eq!(ws.totals["total_cost"], dec("40"));
        assert_eq!(ws.totals["qty"], dec("6"));
        assert_eq!(ws.summary.total_cost, dec("40"));
        assert_eq!(ws.summary.row_count, 2);
        assert_eq!(ws.rows[0].calculated_total, Some(dec("20")));
        // input columns mirror their raw value
        assert_eq!(ws.rows[1].computed_value("unit_cost"), Some(dec("5")));
    }

    #[test]
    fn test_aggregates_read_finalized_columns() {
        let mut ws = sheet();
        ws.add_column(ColumnDef::formula("share", "total_cost / SUM(total_cost) * 100"))
            .unwrap();

        let mut engine = CalculationEngine::default();
        let report = engine.calculate_worksheet(&mut ws, &NoCrossSheet);

        assert!(report.is_clean());
        assert_eq!(computed(&ws, "share"), vec![Some(dec("50")), Some(dec("50"))]);
    }

    #[test]
    fn test_results_rounded_at_storage() {
        let mut ws = Worksheet::new(1, 1, "Steel")
            .with_column(ColumnDef::new("qty", ColumnType::Number))
            .unwrap()
            .with_column(ColumnDef::formula("third", "qty / 3").with_decimal_places(2))
            .unwrap()
            .with_column(ColumnDef::formula("back", "third * 3").with_decimal_places(4))
            .unwrap();
        ws.add_row(Row::new(1).with_value("qty", 1));
        ws.add_row(Row::new(2).with_value("qty", 2));

        let mut engine = CalculationEngine::default();
        engine.calculate_worksheet(&mut ws, &NoCrossSheet);

        assert_eq!(computed(&ws, "third"), vec![Some(dec("0.33")), Some(dec("0.67"))]);
        // later columns read the stored value
        assert_eq!(computed(&ws, "back"), vec![Some(dec("0.99")), Some(dec("2.01"))]);
        assert_eq!(ws.totals["third"], dec("1.00"));
    }

    #[test]
    fn test_cycle_halts_worksheet_and_keeps_values() {
        let mut ws = sheet();
        ws.add_column(ColumnDef::formula("a", "b + 1")).unwrap();
        ws.add_column(ColumnDef::formula("b", "a + 1")).unwrap();
        ws.rows[0].computed.insert("total_cost".into(), dec("7"));
        ws.totals.insert("total_cost".into(), dec("7"));

        let mut engine = CalculationEngine::default();
        let report = engine.calculate_worksheet(&mut ws, &NoCrossSheet);

        assert_eq!(report.stats.worksheets_halted, 1);
        assert_eq!(report.stats.worksheets_calculated, 0);
        let halted: Vec<_> = report.halted_worksheets().collect();
        assert_eq!(halted.len(), 1);
        assert_eq!(halted[0].0, 1);
        assert_eq!(
            halted[0].1.cycle().map(<[String]>::to_vec),
            Some(vec!["a".to_string(), "b".to_string(), "a".to_string()])
        );

        assert_eq!(ws.rows[0].computed_value("total_cost"), Some(dec("7")));
        assert_eq!(ws.totals["total_cost"], dec("7"));
    }

    #[test]
    fn test_failed_cell_keeps_previous_value() {
        let mut ws = sheet();
        ws.add_column(ColumnDef::formula("extra", "IF(qty > 3, ghost, qty)"))
            .unwrap();
        ws.rows[1].computed.insert("extra".into(), dec("9"));

        let mut engine = CalculationEngine::default();
        let report = engine.calculate_worksheet(&mut ws, &NoCrossSheet);

        let errors: Vec<_> = report.cell_errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_id, 2);
        assert_eq!(errors[0].kind, EvalErrorKind::UnknownColumn("ghost".into()));
        assert_eq!(computed(&ws, "extra"), vec![Some(dec("2")), Some(dec("9"))]);
        assert_eq!(report.stats.cells_failed, 1);
    }

    #[test]
    fn test_warnings_and_strict_policy() {
        let mut ws = sheet();
        ws.add_column(ColumnDef::formula("ratio", "qty / 0")).unwrap();

        let mut engine = CalculationEngine::default();
        let report = engine.calculate_worksheet(&mut ws, &NoCrossSheet);
        assert_eq!(report.warnings().count(), 2);
        assert_eq!(report.stats.warnings, 2);
        assert_eq!(computed(&ws, "ratio"), vec![Some(dec("0")), Some(dec("0"))]);

        let mut strict = CalculationEngine::new(CalculationOptions {
            evaluation: EvaluationOptions {
                division_by_zero: DivisionByZeroPolicy::Error,
                ..Default::default()
            },
            max_rows: None,
        });
        let report = strict.calculate_worksheet(&mut ws, &NoCrossSheet);
        assert_eq!(report.cell_errors().count(), 2);
        assert!(report
            .cell_errors()
            .all(|e| e.kind == EvalErrorKind::DivisionByZero));
    }

    #[test]
    fn test_group_headers_and_deleted_rows_untouched() {
        let mut ws = sheet();
        ws.add_row(Row::group_header(3).with_value("qty", 100).with_value("unit_cost", 1));
        let mut deleted = Row::new(4).with_value("qty", 1).with_value("unit_cost", 1);
        deleted.is_deleted = true;
        ws.add_row(deleted);

        let mut engine = CalculationEngine::default();
        let report = engine.calculate_worksheet(&mut ws, &NoCrossSheet);

        assert_eq!(report.stats.rows_calculated, 2);
        assert!(ws.rows[2].computed.is_empty());
        assert!(ws.rows[3].computed.is_empty());
        assert_eq!(ws.totals["total_cost"], dec("40"));
        assert_eq!(ws.summary.row_count, 2);
    }

    #[test]
    fn test_plan_cache_invalidated_by_formula_change() {
        let mut ws = sheet();
        let mut engine = CalculationEngine::default();

        let first = engine.plan(&ws).unwrap();
        let second = engine.plan(&ws).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        ws.column_mut("total_cost").unwrap().formula = Some("qty * unit_cost * 2".into());
        let third = engine.plan(&ws).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        engine.calculate_worksheet(&mut ws, &NoCrossSheet);
        assert_eq!(ws.totals["total_cost"], dec("80"));

        engine.invalidate(ws.id);
        let fourth = engine.plan(&ws).unwrap();
        assert!(!Arc::ptr_eq(&third, &fourth));
    }

    #[test]
    fn test_plan_orders_dependencies_first() {
        let ws = Worksheet::new(1, 1, "Steel")
            .with_column(ColumnDef::formula("grand", "sub + tax"))
            .unwrap()
            .with_column(ColumnDef::formula("tax", "sub * 0.1"))
            .unwrap()
            .with_column(ColumnDef::formula("sub", "2 * Labor.SUM(hours)"))
            .unwrap();

        let mut engine = CalculationEngine::default();
        let plan = engine.plan(&ws).unwrap();
        assert_eq!(
            plan.evaluation_order().collect::<Vec<_>>(),
            vec!["sub", "tax", "grand"]
        );
        assert_eq!(plan.worksheet_references(), &["Labor".to_string()]);
    }

    #[test]
    fn test_single_row_recalculation() {
        let mut ws = sheet();
        let mut engine = CalculationEngine::default();
        engine.calculate_worksheet(&mut ws, &NoCrossSheet);

        ws.rows[1].set_value("qty", 10);
        let report = engine.calculate_row(&mut ws, 2, &NoCrossSheet);

        assert_eq!(report.stats.rows_calculated, 1);
        assert_eq!(computed(&ws, "total_cost"), vec![Some(dec("20")), Some(dec("50"))]);
        assert_eq!(ws.totals["total_cost"], dec("70"));
        assert_eq!(ws.rows[1].calculated_total, Some(dec("50")));
    }

    #[test]
    fn test_stale_computed_entries_dropped() {
        let mut ws = sheet();
        ws.rows[0].computed.insert("removed".into(), dec("3"));

        let mut engine = CalculationEngine::default();
        engine.calculate_worksheet(&mut ws, &NoCrossSheet);
        assert_eq!(ws.rows[0].computed_value("removed"), None);
    }

    #[test]
    fn test_row_limit() {
        let mut package = Package::new(1, 1, "Fab");
        package.add_worksheet(sheet()).unwrap();

        let mut engine = CalculationEngine::new(CalculationOptions {
            max_rows: Some(1),
            ..Default::default()
        });
        let err = engine.calculate_package(&mut package).unwrap_err();
        assert!(matches!(err, Error::RowLimitExceeded { rows: 2, limit: 1 }));
        assert!(package.worksheets[0].totals.is_empty());
    }

    #[test]
    fn test_issue_display() {
        let issue = CalculationIssue::WorksheetHalted {
            worksheet_id: 3,
            worksheet_name: "Steel".into(),
            error: FormulaError::CircularReference {
                cycle: vec!["a".into(), "a".into()],
            },
        };
        assert_eq!(
            issue.to_string(),
            "Worksheet 'Steel' (3) not recalculated: Circular reference detected: a -> a"
        );
    }
}
