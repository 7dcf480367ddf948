//! Package and revision rollup through the trigger points

use fabcalc::prelude::*;
use fabcalc::{CalculationIssue, EntityRef, EvalErrorKind, FormulaError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rust_decimal::Decimal;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Worksheet whose total cost is the sum of the given raw amounts
fn cost_sheet(id: i64, name: &str, amounts: &[i64]) -> Worksheet {
    let mut sheet = Worksheet::new(id, 0, name)
        .with_column(ColumnDef::new("total_cost", ColumnType::Currency))
        .unwrap();
    for (i, amount) in amounts.iter().enumerate() {
        sheet.add_row(Row::new(id * 100 + i as i64).with_value("total_cost", *amount));
    }
    sheet
}

fn package(id: i64, sheets: Vec<Worksheet>) -> Package {
    let mut package = Package::new(id, 0, format!("Package {}", id));
    for sheet in sheets {
        package.add_worksheet(sheet).unwrap();
    }
    package
}

fn revision(id: i64, packages: Vec<Package>) -> Revision {
    let mut revision = Revision::new(id).with_rates(dec("10"), dec("20"));
    for package in packages {
        revision.add_package(package);
    }
    revision
}

fn estimator(revisions: Vec<Revision>) -> Estimator<InMemoryStore> {
    Estimator::new(revisions.into_iter().collect())
}

/// Labor is listed after the worksheet that reads it
fn cross_sheet_package() -> Package {
    let mut summary = Worksheet::new(10, 0, "Summary")
        .with_column(ColumnDef::new("markup", ColumnType::Number))
        .unwrap()
        .with_column(ColumnDef::formula("total_cost", "Labor.TotalCost * markup"))
        .unwrap()
        .with_column(ColumnDef::formula("crew_hours", "'Labor'.SUM(hours)"))
        .unwrap();
    summary.add_row(Row::new(100).with_value("markup", 2));

    let mut labor = Worksheet::new(11, 0, "Labor")
        .with_column(ColumnDef::new("hours", ColumnType::Number))
        .unwrap()
        .with_column(ColumnDef::formula("labor_cost", "hours * 50"))
        .unwrap()
        .with_column(ColumnDef::formula("total_cost", "labor_cost"))
        .unwrap();
    labor.add_row(Row::new(110).with_value("hours", 2));
    labor.add_row(Row::new(111).with_value("hours", 3));

    package(1, vec![summary, labor])
}

/// Test overhead then margin on the revision subtotal
#[test]
fn test_revision_rollup() {
    let rev = revision(
        1,
        vec![
            package(1, vec![cost_sheet(10, "Steel", &[60, 40])]),
            package(2, vec![cost_sheet(20, "Paint", &[150]), cost_sheet(21, "Labor", &[50])]),
        ],
    );
    let mut estimator = estimator(vec![rev]);
    let result = estimator.recalculate_revision(1).unwrap().unwrap();
    assert!(result.report.is_clean());

    let packages: Vec<_> = result
        .value
        .packages
        .iter()
        .map(|p| p.summary.subtotal)
        .collect();
    assert_eq!(packages, vec![dec("100"), dec("200")]);

    let breakdown = &result.value.summary.breakdown;
    assert_eq!(breakdown.subtotal, dec("300"));
    assert_eq!(breakdown.overhead_amount, dec("30"));
    assert_eq!(breakdown.subtotal_with_overhead, dec("330"));
    assert_eq!(breakdown.margin_amount, dec("66"));
    assert_eq!(breakdown.total_amount, dec("396"));
    assert_eq!(result.value.summary.package_count, 2);

    // persisted for the summary getters
    let summary = estimator.revision_summary(1).unwrap().unwrap();
    assert_eq!(summary.total_amount(), dec("396"));
    assert_eq!(
        estimator.package_summary(2).unwrap().unwrap().worksheet_count,
        2
    );
}

/// Test that package overhead is reported but not applied twice
#[test]
fn test_package_overhead() {
    let mut pkg = package(1, vec![cost_sheet(10, "Steel", &[100])]);
    pkg.overhead_percentage = dec("5");
    let mut estimator = estimator(vec![revision(1, vec![pkg])]);

    let result = estimator.recalculate_package(1).unwrap().unwrap();
    assert_eq!(result.value.summary.overhead_cost, dec("5"));
    assert_eq!(result.value.summary.package_total, dec("105"));

    let revision = estimator.recalculate_revision(1).unwrap().unwrap().value;
    assert_eq!(revision.summary.breakdown.subtotal, dec("100"));
}

/// Test that trigger points stop at the requested level
#[test]
fn test_package_trigger_leaves_revision_summary() {
    let pkg = package(1, vec![cost_sheet(10, "Steel", &[100])]);
    let mut estimator = estimator(vec![revision(1, vec![pkg])]);

    estimator.recalculate_package(1).unwrap().unwrap();
    assert_eq!(
        estimator.package_summary(1).unwrap().unwrap().subtotal,
        dec("100")
    );
    assert_eq!(
        estimator.revision_summary(1).unwrap().unwrap().total_amount(),
        Decimal::ZERO
    );

    let sheet = estimator.recalculate_worksheet(10).unwrap().unwrap().value;
    assert_eq!(sheet.totals["total_cost"], dec("100"));
}

/// Test that referenced worksheets are recalculated first
#[test]
fn test_cross_sheet_ordering() {
    let mut estimator = estimator(vec![revision(1, vec![cross_sheet_package()])]);
    let result = estimator.recalculate_package(1).unwrap().unwrap();
    assert!(result.report.is_clean(), "{:?}", result.report.issues);

    let labor = &result.value.worksheets[1];
    assert_eq!(labor.summary.total_cost, dec("250"));
    assert_eq!(labor.summary.labor_cost, dec("250"));

    let summary = &result.value.worksheets[0];
    assert_eq!(summary.rows[0].computed_value("total_cost"), Some(dec("500")));
    assert_eq!(summary.rows[0].computed_value("crew_hours"), Some(dec("5")));
    assert_eq!(summary.rows[0].calculated_total, Some(dec("500")));

    assert_eq!(result.value.summary.subtotal, dec("750"));
    assert_eq!(result.value.summary.labor_cost, dec("250"));
}

/// Test that a single worksheet trigger reads siblings as stored
#[test]
fn test_worksheet_trigger_reads_stored_siblings() {
    let mut estimator = estimator(vec![revision(1, vec![cross_sheet_package()])]);

    // Labor has never been calculated, so its summary is still zero
    let sheet = estimator.recalculate_worksheet(10).unwrap().unwrap().value;
    assert_eq!(sheet.rows[0].computed_value("total_cost"), Some(Decimal::ZERO));
    assert_eq!(sheet.rows[0].computed_value("crew_hours"), Some(dec("5")));

    estimator.recalculate_worksheet(11).unwrap().unwrap();
    let sheet = estimator.recalculate_worksheet(10).unwrap().unwrap().value;
    assert_eq!(sheet.rows[0].computed_value("total_cost"), Some(dec("500")));
}

/// Test that a cross-worksheet cycle halts only the worksheets on it
#[test]
fn test_cross_sheet_cycle() {
    let mut alpha = Worksheet::new(10, 0, "Alpha")
        .with_column(ColumnDef::new("x", ColumnType::Number))
        .unwrap()
        .with_column(ColumnDef::formula("total_cost", "Beta.SUM(total_cost) + x"))
        .unwrap();
    alpha.add_row(Row::new(100).with_value("x", 1));
    alpha.summary.total_cost = dec("7");

    let mut beta = Worksheet::new(11, 0, "Beta")
        .with_column(ColumnDef::formula("total_cost", "Alpha.TotalCost"))
        .unwrap();
    beta.add_row(Row::new(110));

    let mut reader = Worksheet::new(12, 0, "Reader")
        .with_column(ColumnDef::formula("total_cost", "Alpha.SUM(x) + 1"))
        .unwrap();
    reader.add_row(Row::new(120));

    let independent = cost_sheet(13, "Steel", &[30]);

    let pkg = package(1, vec![alpha, beta, reader, independent]);
    let mut estimator = estimator(vec![revision(1, vec![pkg])]);
    let result = estimator.recalculate_package(1).unwrap().unwrap();

    let halted: Vec<_> = result.report.halted_worksheets().collect();
    assert_eq!(halted.len(), 2);
    assert_eq!(halted[0].0, 10);
    assert_eq!(halted[1].0, 11);
    assert_eq!(
        halted[0].1,
        &FormulaError::CircularReference {
            cycle: vec!["Alpha".into(), "Beta".into(), "Alpha".into()]
        }
    );

    // readers of a halted worksheet fail per cell
    let errors: Vec<_> = result.report.cell_errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row_id, 120);
    assert_eq!(
        errors[0].kind,
        EvalErrorKind::CircularWorksheetReference("Alpha".into())
    );

    // halted worksheets keep their last summary, the rest proceeds
    assert_eq!(result.value.worksheets[3].totals["total_cost"], dec("30"));
    assert_eq!(result.value.summary.subtotal, dec("37"));
    assert_eq!(result.report.stats.worksheets_calculated, 2);
}

/// Test that a worksheet with a column cycle does not block its package
#[test]
fn test_halted_worksheet_contributes_last_summary() {
    let mut broken = Worksheet::new(10, 0, "Broken")
        .with_column(ColumnDef::formula("a", "b + 1"))
        .unwrap()
        .with_column(ColumnDef::formula("b", "a + 1"))
        .unwrap();
    broken.summary.total_cost = dec("42");

    let unparsable = Worksheet::new(11, 0, "Typo")
        .with_column(ColumnDef::formula("total_cost", "qty *"))
        .unwrap();

    let pkg = package(1, vec![broken, unparsable, cost_sheet(12, "Steel", &[8])]);
    let mut estimator = estimator(vec![revision(1, vec![pkg])]);
    let result = estimator.recalculate_package(1).unwrap().unwrap();

    assert_eq!(result.report.stats.worksheets_halted, 2);
    assert!(result.report.issues.iter().any(|issue| matches!(
        issue,
        CalculationIssue::WorksheetHalted {
            worksheet_id: 11,
            error: FormulaError::Parse { .. },
            ..
        }
    )));
    assert_eq!(result.value.summary.subtotal, dec("50"));
}

/// Test that reading a worksheet with an invalid formula fails the cell
#[test]
fn test_reading_invalid_worksheet_fails_cell() {
    let mut typo = Worksheet::new(10, 0, "Typo")
        .with_column(ColumnDef::formula("total_cost", "qty *"))
        .unwrap();
    typo.summary.total_cost = dec("42");

    let mut reader = Worksheet::new(11, 0, "Reader")
        .with_column(ColumnDef::formula("total_cost", "Typo.TotalCost + 1"))
        .unwrap();
    reader.add_row(Row::new(1100));

    let mut estimator = estimator(vec![revision(1, vec![package(1, vec![typo, reader])])]);
    let result = estimator.recalculate_package(1).unwrap().unwrap();

    let errors: Vec<_> = result.report.cell_errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row_id, 1100);
    assert_eq!(errors[0].kind, EvalErrorKind::HaltedWorksheet("Typo".into()));
    assert_eq!(result.value.worksheets[1].rows[0].computed_value("total_cost"), None);
    assert_eq!(result.value.summary.subtotal, dec("42"));
}

/// Test that the subtotal sums worksheet total costs, not material plus labor
#[test]
fn test_subtotal_uses_total_cost() {
    let mut sheet = Worksheet::new(10, 0, "Steel")
        .with_column(ColumnDef::new("material_cost", ColumnType::Currency))
        .unwrap()
        .with_column(ColumnDef::new("labor_cost", ColumnType::Currency))
        .unwrap()
        .with_column(ColumnDef::formula(
            "total_cost",
            "(material_cost + labor_cost) * 1.5",
        ))
        .unwrap();
    sheet.add_row(
        Row::new(1000)
            .with_value("material_cost", 60)
            .with_value("labor_cost", 40),
    );

    let mut estimator = estimator(vec![revision(1, vec![package(1, vec![sheet])])]);
    let result = estimator.recalculate_revision(1).unwrap().unwrap();

    let pkg = &result.value.packages[0].summary;
    assert_eq!(pkg.material_cost, dec("60"));
    assert_eq!(pkg.labor_cost, dec("40"));
    assert_eq!(pkg.subtotal, dec("150"));
    assert_eq!(result.value.summary.material_cost, dec("60"));
    assert_eq!(result.value.summary.breakdown.subtotal, dec("150"));
}

/// Test that rollups leaving the decimal range keep the previous summary
#[test]
fn test_rollup_overflow_keeps_previous_summary() {
    let big = dec("50000000000000000000000000000");
    let sheet = |id: i64, name: &str| {
        let mut sheet = cost_sheet(id, name, &[]);
        sheet.add_row(Row::new(id * 100).with_value("total_cost", big));
        sheet
    };
    let mut pkg = package(1, vec![sheet(10, "Steel"), sheet(11, "Paint")]);
    pkg.summary.subtotal = dec("7");

    let mut packages = estimator(vec![revision(1, vec![pkg])]);
    let result = packages.recalculate_package(1).unwrap().unwrap();

    let errors: Vec<_> = result.report.summary_errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, EntityRef::Package(1));
    assert_eq!(
        errors[0].1.to_string(),
        "Decimal overflow computing package subtotal"
    );
    assert_eq!(result.report.stats.worksheets_calculated, 2);
    assert_eq!(result.value.worksheets[0].totals["total_cost"], big);
    assert_eq!(result.value.summary.subtotal, dec("7"));

    let mut rev = Revision::new(2).with_rates(dec("10"), Decimal::MAX);
    rev.add_package(package(2, vec![cost_sheet(20, "Steel", &[100])]));
    rev.summary.labor_hours = dec("3");

    let mut revisions = estimator(vec![rev]);
    let result = revisions.recalculate_revision(2).unwrap().unwrap();

    let errors: Vec<_> = result.report.summary_errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, EntityRef::Revision(2));
    assert_eq!(result.value.packages[0].summary.subtotal, dec("100"));
    assert_eq!(result.value.summary.labor_hours, dec("3"));
    assert_eq!(result.value.summary.package_count, 0);
}

/// Test soft-deleted entities are skipped at every level
#[test]
fn test_soft_delete() {
    let mut deleted_sheet = cost_sheet(11, "Scrap", &[1000]);
    deleted_sheet.is_deleted = true;
    let mut steel = cost_sheet(10, "Steel", &[100]);
    let mut deleted_row = Row::new(1099).with_value("total_cost", 500);
    deleted_row.is_deleted = true;
    steel.add_row(deleted_row);
    steel.add_row(Row::group_header(1098).with_value("total_cost", 900));

    let mut deleted_package = package(2, vec![cost_sheet(20, "Paint", &[300])]);
    deleted_package.is_deleted = true;

    let rev = revision(1, vec![package(1, vec![steel, deleted_sheet]), deleted_package]);
    let mut gone = revision(2, vec![]);
    gone.is_deleted = true;

    let mut estimator = estimator(vec![rev, gone]);
    let result = estimator.recalculate_revision(1).unwrap().unwrap();

    assert_eq!(result.value.summary.breakdown.subtotal, dec("100"));
    assert_eq!(result.value.summary.package_count, 1);
    assert_eq!(result.value.packages[0].summary.worksheet_count, 1);
    assert_eq!(result.value.packages[0].worksheets[0].summary.row_count, 1);
    assert!(result.value.packages[0].worksheets[1].totals.is_empty());
    assert!(result.value.packages[1].worksheets[0].totals.is_empty());

    assert!(estimator.recalculate_revision(2).unwrap().is_none());
    assert!(estimator.recalculate_worksheet(11).unwrap().is_none());
    assert!(estimator.recalculate_row(1099).unwrap().is_none());
    assert!(estimator.recalculate_package(2).unwrap().is_none());
}

/// Test the row ceiling for wide recalculations
#[test]
fn test_row_limit() {
    let rev = revision(1, vec![package(1, vec![cost_sheet(10, "Steel", &[1, 2, 3])])]);
    let mut estimator = Estimator::with_options(
        [rev].into_iter().collect::<InMemoryStore>(),
        CalculationOptions {
            max_rows: Some(2),
            ..Default::default()
        },
    );

    let err = estimator.recalculate_revision(1).unwrap_err();
    assert!(matches!(err, Error::RowLimitExceeded { rows: 3, limit: 2 }));
    let err = estimator.recalculate_package(1).unwrap_err();
    assert!(matches!(err, Error::RowLimitExceeded { rows: 3, limit: 2 }));

    // narrower triggers are not limited
    assert!(estimator.recalculate_worksheet(10).unwrap().is_some());
    assert_eq!(
        estimator.revision_summary(1).unwrap().unwrap().total_amount(),
        Decimal::ZERO
    );
}

/// Test a row edit followed by a row trigger
#[test]
fn test_row_trigger_after_edit() {
    let mut sheet = Worksheet::new(10, 0, "Steel")
        .with_column(ColumnDef::new("qty", ColumnType::Number))
        .unwrap()
        .with_column(ColumnDef::new("unit_cost", ColumnType::Currency))
        .unwrap()
        .with_column(ColumnDef::formula("total_cost", "qty * unit_cost"))
        .unwrap();
    sheet.add_row(Row::new(1).with_value("qty", 2).with_value("unit_cost", 10));
    sheet.add_row(Row::new(2).with_value("qty", 4).with_value("unit_cost", 5));

    let mut estimator = estimator(vec![revision(1, vec![package(1, vec![sheet])])]);
    estimator.recalculate_revision(1).unwrap().unwrap();

    estimator.store_mut().revision_mut(1).unwrap().packages[0].worksheets[0].rows[0]
        .set_value("qty", 3);
    let result = estimator.recalculate_row(1).unwrap().unwrap();

    assert_eq!(result.value.totals["total_cost"], dec("50"));
    assert_eq!(
        estimator.worksheet_summary(10).unwrap().unwrap().total_cost,
        dec("50")
    );
    // the package summary still holds the previous rollup
    assert_eq!(
        estimator.package_summary(1).unwrap().unwrap().subtotal,
        dec("40")
    );
}

proptest! {
    /// Revision total equals subtotal * (1 + oh/100) * (1 + margin/100)
    #[test]
    fn prop_rollup_order(
        amounts in prop::collection::vec(0i64..1_000_000, 1..6),
        overhead in 0i64..50,
        margin in 0i64..50,
    ) {
        let packages = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                let id = i as i64 + 1;
                package(id, vec![cost_sheet(id * 10, "Costs", &[*amount])])
            })
            .collect();
        let mut rev = revision(1, packages);
        rev.overhead_percentage = Decimal::from(overhead);
        rev.margin_percentage = Decimal::from(margin);

        let mut estimator = estimator(vec![rev]);
        let result = estimator.recalculate_revision(1).unwrap().unwrap();

        let subtotal = Decimal::from(amounts.iter().sum::<i64>());
        let with_overhead = subtotal + subtotal * Decimal::from(overhead) / Decimal::ONE_HUNDRED;
        let expected = with_overhead + with_overhead * Decimal::from(margin) / Decimal::ONE_HUNDRED;
        prop_assert_eq!(result.value.summary.breakdown.subtotal, subtotal);
        prop_assert_eq!(result.value.summary.total_amount(), expected);
    }
}
