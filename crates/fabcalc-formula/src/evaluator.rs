//! Formula evaluator
//!
//! Evaluates formula ASTs against one row. All arithmetic is done on full
//! precision decimals; rounding happens when the caller stores the result.

use crate::aggregate::aggregate_worksheet;
use crate::ast::{BinaryOperator, Expr, UnaryOperator};
use crate::error::{EvalErrorKind, EvalWarning};
use crate::functions::{from_bool, AggregateFunction, ScalarFunction};
use fabcalc_core::{RawValue, Row, SummaryField, Worksheet};
use rust_decimal::Decimal;

/// What to do when a formula divides by zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DivisionByZeroPolicy {
    /// Result is 0 and a warning is recorded
    #[default]
    Zero,
    /// The cell fails with [`EvalErrorKind::DivisionByZero`]
    Error,
}

/// What to do when a formula reads a non-numeric raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionPolicy {
    /// Value is read as 0 and a warning is recorded
    #[default]
    Zero,
    /// The cell fails with [`EvalErrorKind::NonNumeric`]
    Error,
}

/// Evaluation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvaluationOptions {
    pub division_by_zero: DivisionByZeroPolicy,
    pub non_numeric: CoercionPolicy,
}

impl EvaluationOptions {
    /// Fail cells instead of substituting 0
    pub fn strict() -> Self {
        Self {
            division_by_zero: DivisionByZeroPolicy::Error,
            non_numeric: CoercionPolicy::Error,
        }
    }
}

/// A column value as seen by a formula
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue<'a> {
    /// Result of a formula column
    Computed(Decimal),
    /// User-entered value of an input column
    Raw(&'a RawValue),
}

/// Context for formula evaluation
pub trait EvaluationContext {
    /// Value of a column in the current row, or `None` if the column does not
    /// exist
    fn column_value(&self, key: &str) -> Option<ColumnValue<'_>>;

    /// Aggregate a column of the current worksheet
    fn aggregate(&self, func: AggregateFunction, column: &str) -> Result<Decimal, EvalErrorKind>;

    /// Aggregate a column of a sibling worksheet
    fn cross_sheet_aggregate(
        &self,
        worksheet: &str,
        _func: AggregateFunction,
        _column: &str,
    ) -> Result<Decimal, EvalErrorKind> {
        Err(EvalErrorKind::UnknownWorksheet(worksheet.to_string()))
    }

    /// Read a summary field of a sibling worksheet
    fn cross_sheet_property(
        &self,
        worksheet: &str,
        _field: SummaryField,
    ) -> Result<Decimal, EvalErrorKind> {
        Err(EvalErrorKind::UnknownWorksheet(worksheet.to_string()))
    }
}

/// Access to the other worksheets of a package
pub trait CrossSheetSource {
    /// Aggregate a column of the named worksheet
    fn aggregate(
        &self,
        worksheet: &str,
        func: AggregateFunction,
        column: &str,
    ) -> Result<Decimal, EvalErrorKind>;

    /// Read a summary field of the named worksheet
    fn property(&self, worksheet: &str, field: SummaryField) -> Result<Decimal, EvalErrorKind>;
}

/// Source used when a worksheet is evaluated on its own
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCrossSheet;

impl CrossSheetSource for NoCrossSheet {
    fn aggregate(
        &self,
        worksheet: &str,
        _func: AggregateFunction,
        _column: &str,
    ) -> Result<Decimal, EvalErrorKind> {
        Err(EvalErrorKind::UnknownWorksheet(worksheet.to_string()))
    }

    fn property(&self, worksheet: &str, _field: SummaryField) -> Result<Decimal, EvalErrorKind> {
        Err(EvalErrorKind::UnknownWorksheet(worksheet.to_string()))
    }
}

/// Evaluation context for one row of a worksheet
///
/// Column references read the row itself; aggregates read the worksheet's
/// rows as they are stored.
pub struct RowContext<'a> {
    worksheet: &'a Worksheet,
    row: &'a Row,
    cross_sheet: &'a dyn CrossSheetSource,
}

impl<'a> RowContext<'a> {
    /// Create a context with no sibling worksheets
    pub fn new(worksheet: &'a Worksheet, row: &'a Row) -> Self {
        Self {
            worksheet,
            row,
            cross_sheet: &NoCrossSheet,
        }
    }

    /// Resolve cross-worksheet references through `source`
    pub fn with_cross_sheet(mut self, source: &'a dyn CrossSheetSource) -> Self {
        self.cross_sheet = source;
        self
    }
}

impl EvaluationContext for RowContext<'_> {
    fn column_value(&self, key: &str) -> Option<ColumnValue<'_>> {
        let column = self.worksheet.column(key)?;
        if column.is_formula() {
            let value = self.row.computed_value(&column.key).unwrap_or_default();
            Some(ColumnValue::Computed(value))
        } else {
            Some(ColumnValue::Raw(self.row.value(&column.key)))
        }
    }

    fn aggregate(&self, func: AggregateFunction, column: &str) -> Result<Decimal, EvalErrorKind> {
        aggregate_worksheet(self.worksheet, func, column)
    }

    fn cross_sheet_aggregate(
        &self,
        worksheet: &str,
        func: AggregateFunction,
        column: &str,
    ) -> Result<Decimal, EvalErrorKind> {
        if self.worksheet.name_matches(worksheet) {
            return self.aggregate(func, column);
        }
        self.cross_sheet.aggregate(worksheet, func, column)
    }

    fn cross_sheet_property(
        &self,
        worksheet: &str,
        field: SummaryField,
    ) -> Result<Decimal, EvalErrorKind> {
        // the worksheet's own summary is what is being calculated
        if self.worksheet.name_matches(worksheet) {
            return Err(EvalErrorKind::CircularWorksheetReference(
                worksheet.to_string(),
            ));
        }
        self.cross_sheet.property(worksheet, field)
    }
}

/// Result of a successful evaluation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluated {
    pub value: Decimal,
    pub warnings: Vec<EvalWarning>,
}

/// Evaluate a formula expression
pub fn evaluate<C: EvaluationContext + ?Sized>(
    expr: &Expr,
    ctx: &C,
    options: &EvaluationOptions,
) -> Result<Evaluated, EvalErrorKind> {
    let mut evaluator = Evaluator::new(ctx, *options);
    let value = evaluator.evaluate(expr)?;
    Ok(Evaluated {
        value,
        warnings: evaluator.into_warnings(),
    })
}

/// Tree-walking evaluator collecting non-fatal warnings
pub struct Evaluator<'a, C: EvaluationContext + ?Sized> {
    ctx: &'a C,
    options: EvaluationOptions,
    warnings: Vec<EvalWarning>,
}

impl<'a, C: EvaluationContext + ?Sized> Evaluator<'a, C> {
    /// Create a new evaluator
    pub fn new(ctx: &'a C, options: EvaluationOptions) -> Self {
        Self {
            ctx,
            options,
            warnings: Vec::new(),
        }
    }

    /// Warnings recorded so far
    pub fn warnings(&self) -> &[EvalWarning] {
        &self.warnings
    }

    /// Consume the evaluator, returning its warnings
    pub fn into_warnings(self) -> Vec<EvalWarning> {
        self.warnings
    }

    /// Evaluate an expression
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Decimal, EvalErrorKind> {
        match expr {
            // === Literals ===
            Expr::Number(n) => Ok(*n),
            Expr::Boolean(b) => Ok(from_bool(*b)),

            // === References ===
            Expr::ColumnRef(key) => self.column(key),

            // === Operators ===
            Expr::Binary { op, left, right } => self.evaluate_binary_op(*op, left, right),

            Expr::Unary { op, operand } => {
                let value = self.evaluate(operand)?;
                Ok(match op {
                    UnaryOperator::Negate => -value,
                    UnaryOperator::Not => from_bool(value.is_zero()),
                })
            }

            // === Functions ===
            Expr::Function { func, args } => self.evaluate_function(*func, args),

            Expr::Aggregate { func, column } => self.ctx.aggregate(*func, column),

            Expr::CrossSheetAggregate {
                worksheet,
                func,
                column,
            } => self.ctx.cross_sheet_aggregate(worksheet, *func, column),

            Expr::CrossSheetProperty { worksheet, field } => {
                self.ctx.cross_sheet_property(worksheet, *field)
            }
        }
    }

    fn column(&mut self, key: &str) -> Result<Decimal, EvalErrorKind> {
        let ctx = self.ctx;
        let value = ctx
            .column_value(key)
            .ok_or_else(|| EvalErrorKind::UnknownColumn(key.to_string()))?;

        match value {
            ColumnValue::Computed(n) => Ok(n),
            ColumnValue::Raw(raw) => {
                if let Some(n) = raw.to_decimal() {
                    return Ok(n);
                }
                match raw {
                    RawValue::Empty => Ok(Decimal::ZERO),
                    RawValue::Boolean(b) => Ok(from_bool(*b)),
                    other => self.non_numeric(key, other.type_name()),
                }
            }
        }
    }

    fn non_numeric(
        &mut self,
        column: &str,
        value_type: &'static str,
    ) -> Result<Decimal, EvalErrorKind> {
        match self.options.non_numeric {
            CoercionPolicy::Zero => {
                self.warnings.push(EvalWarning::NonNumericValue {
                    column: column.to_string(),
                    value_type,
                });
                Ok(Decimal::ZERO)
            }
            CoercionPolicy::Error => Err(EvalErrorKind::NonNumeric {
                column: column.to_string(),
                value_type,
            }),
        }
    }

    fn division_by_zero(&mut self) -> Result<Decimal, EvalErrorKind> {
        match self.options.division_by_zero {
            DivisionByZeroPolicy::Zero => {
                self.warnings.push(EvalWarning::DivisionByZero);
                Ok(Decimal::ZERO)
            }
            DivisionByZeroPolicy::Error => Err(EvalErrorKind::DivisionByZero),
        }
    }

    /// Evaluate a binary operation
    fn evaluate_binary_op(
        &mut self,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<Decimal, EvalErrorKind> {
        // Logical operators short-circuit
        match op {
            BinaryOperator::And => {
                let result = self.is_true(left)? && self.is_true(right)?;
                return Ok(from_bool(result));
            }
            BinaryOperator::Or => {
                let result = self.is_true(left)? || self.is_true(right)?;
                return Ok(from_bool(result));
            }
            _ => {}
        }

        let l = self.evaluate(left)?;
        let r = self.evaluate(right)?;

        let result = match op {
            BinaryOperator::Add => l.checked_add(r).ok_or(EvalErrorKind::Overflow)?,
            BinaryOperator::Subtract => l.checked_sub(r).ok_or(EvalErrorKind::Overflow)?,
            BinaryOperator::Multiply => l.checked_mul(r).ok_or(EvalErrorKind::Overflow)?,
            BinaryOperator::Divide => {
                if r.is_zero() {
                    return self.division_by_zero();
                }
                l.checked_div(r).ok_or(EvalErrorKind::Overflow)?
            }
            BinaryOperator::Modulo => {
                if r.is_zero() {
                    return self.division_by_zero();
                }
                l.checked_rem(r).ok_or(EvalErrorKind::Overflow)?
            }
            BinaryOperator::Equal => from_bool(l == r),
            BinaryOperator::NotEqual => from_bool(l != r),
            BinaryOperator::LessThan => from_bool(l < r),
            BinaryOperator::LessEqual => from_bool(l <= r),
            BinaryOperator::GreaterThan => from_bool(l > r),
            BinaryOperator::GreaterEqual => from_bool(l >= r),
            BinaryOperator::And => from_bool(!l.is_zero() && !r.is_zero()),
            BinaryOperator::Or => from_bool(!l.is_zero() || !r.is_zero()),
        };

        Ok(result)
    }

    fn evaluate_function(
        &mut self,
        func: ScalarFunction,
        args: &[Expr],
    ) -> Result<Decimal, EvalErrorKind> {
        match func {
            // Only the selected branch is evaluated
            ScalarFunction::If => {
                let branch = if self.arg_is_true(args, 0)? { 1 } else { 2 };
                self.arg(args, branch)
            }
            ScalarFunction::And => {
                for arg in args {
                    if !self.is_true(arg)? {
                        return Ok(Decimal::ZERO);
                    }
                }
                Ok(Decimal::ONE)
            }
            ScalarFunction::Or => {
                for arg in args {
                    if self.is_true(arg)? {
                        return Ok(Decimal::ONE);
                    }
                }
                Ok(Decimal::ZERO)
            }
            _ => {
                let values = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                func.apply(&values)
            }
        }
    }

    fn is_true(&mut self, expr: &Expr) -> Result<bool, EvalErrorKind> {
        Ok(!self.evaluate(expr)?.is_zero())
    }

    fn arg(&mut self, args: &[Expr], index: usize) -> Result<Decimal, EvalErrorKind> {
        match args.get(index) {
            Some(expr) => self.evaluate(expr),
            None => Ok(Decimal::ZERO),
        }
    }

    fn arg_is_true(&mut self, args: &[Expr], index: usize) -> Result<bool, EvalErrorKind> {
        Ok(!self.arg(args, index)?.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_formula;
    use fabcalc_core::{ColumnDef, ColumnType};
    use pretty_assertions::assert_eq;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sheet() -> Worksheet {
        let mut ws = Worksheet::new(1, 1, "Steel");
        for key in ["qty", "unit_cost", "zero", "notes", "empty", "rush"] {
            ws.add_column(ColumnDef::new(key, ColumnType::Number)).unwrap();
        }
        ws.add_column(ColumnDef::formula("subtotal", "qty * unit_cost"))
            .unwrap();

        let mut row = Row::new(1)
            .with_value("qty", 4)
            .with_value("unit_cost", "2.50")
            .with_value("zero", 0)
            .with_value("notes", "galvanized")
            .with_value("rush", true);
        row.computed.insert("subtotal".into(), dec("10"));
        ws.add_row(row);
        ws.add_row(Row::new(2).with_value("qty", 6));
        ws
    }

    fn eval_with(formula: &str, options: EvaluationOptions) -> Result<Evaluated, EvalErrorKind> {
        let ws = sheet();
        let ctx = RowContext::new(&ws, &ws.rows[0]);
        evaluate(&parse_formula(formula).unwrap(), &ctx, &options)
    }

    fn eval(formula: &str) -> Decimal {
        eval_with(formula, EvaluationOptions::default()).unwrap().value
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), dec("7"));
        assert_eq!(eval("(1 + 2) * 3"), dec("9"));
        assert_eq!(eval("qty * unit_cost"), dec("10"));
        assert_eq!(eval("-qty + 1"), dec("-3"));
        assert_eq!(eval("10 % 4"), dec("2"));
    }

    #[test]
    fn test_comparison_and_logic() {
        assert_eq!(eval("qty > 3"), Decimal::ONE);
        assert_eq!(eval("qty <> 4"), Decimal::ZERO);
        assert_eq!(eval("qty >= 4 AND unit_cost < 3"), Decimal::ONE);
        assert_eq!(eval("qty = 1 OR NOT zero"), Decimal::ONE);
        assert_eq!(eval("AND(qty, zero)"), Decimal::ZERO);
        assert_eq!(eval("OR(zero, FALSE, rush)"), Decimal::ONE);
    }

    #[test]
    fn test_scalar_functions() {
        assert_eq!(eval("ROUND(unit_cost / 3, 2)"), dec("0.83"));
        assert_eq!(eval("ABS(0 - qty)"), dec("4"));
        assert_eq!(eval("MIN(qty, unit_cost, 9)"), dec("2.5"));
        assert_eq!(eval("MAX(qty, unit_cost)"), dec("4"));
        assert_eq!(eval("IF(qty > 5, 1, 2)"), dec("2"));
    }

    #[test]
    fn test_if_is_lazy() {
        let result = eval_with("IF(qty > 1, qty, ghost)", EvaluationOptions::default()).unwrap();
        assert_eq!(result.value, dec("4"));

        let result = eval_with("IF(qty > 5, qty, ghost)", EvaluationOptions::default());
        assert_eq!(result, Err(EvalErrorKind::UnknownColumn("ghost".into())));
    }

    #[test]
    fn test_formula_column_reads_computed() {
        assert_eq!(eval("subtotal * 2"), dec("20"));
        assert_eq!(eval("SUBTOTAL"), dec("10"));
    }

    #[test]
    fn test_aggregates_from_context() {
        assert_eq!(eval("SUM(qty)"), dec("10"));
        assert_eq!(eval("qty / SUM(qty)"), dec("0.4"));
        assert_eq!(eval("Steel.COUNT(qty)"), dec("2"));
        assert_eq!(eval("MAX(qty)"), dec("6"));
    }

    #[test]
    fn test_cross_sheet_without_siblings() {
        let result = eval_with("Labor.SUM(hours)", EvaluationOptions::default());
        assert_eq!(result, Err(EvalErrorKind::UnknownWorksheet("Labor".into())));

        let result = eval_with("Steel.TotalCost", EvaluationOptions::default());
        assert_eq!(
            result,
            Err(EvalErrorKind::CircularWorksheetReference("Steel".into()))
        );
    }

    #[test]
    fn test_division_by_zero_policy() {
        let lenient = eval_with("qty / zero", EvaluationOptions::default()).unwrap();
        assert_eq!(lenient.value, Decimal::ZERO);
        assert_eq!(lenient.warnings, vec![EvalWarning::DivisionByZero]);

        let strict = EvaluationOptions {
            division_by_zero: DivisionByZeroPolicy::Error,
            ..Default::default()
        };
        assert_eq!(eval_with("qty % zero", strict), Err(EvalErrorKind::DivisionByZero));
    }

    #[test]
    fn test_non_numeric_policy() {
        let lenient = eval_with("qty + notes", EvaluationOptions::default()).unwrap();
        assert_eq!(lenient.value, dec("4"));
        assert_eq!(
            lenient.warnings,
            vec![EvalWarning::NonNumericValue {
                column: "notes".into(),
                value_type: "text",
            }]
        );

        assert_eq!(
            eval_with("qty + notes", EvaluationOptions::strict()),
            Err(EvalErrorKind::NonNumeric {
                column: "notes".into(),
                value_type: "text",
            })
        );
    }

    #[test]
    fn test_empty_and_boolean_values_coerce_silently() {
        let result = eval_with("qty + empty + rush", EvaluationOptions::strict()).unwrap();
        assert_eq!(result.value, dec("5"));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unknown_column() {
        assert_eq!(
            eval_with("qty * ghost", EvaluationOptions::default()),
            Err(EvalErrorKind::UnknownColumn("ghost".into()))
        );
        assert_eq!(
            eval_with("SUM(ghost)", EvaluationOptions::default()),
            Err(EvalErrorKind::UnknownColumn("ghost".into()))
        );
    }

    #[test]
    fn test_overflow() {
        assert_eq!(
            eval_with("79228162514264337593543950335 * 2", EvaluationOptions::default()),
            Err(EvalErrorKind::Overflow)
        );
    }
}
