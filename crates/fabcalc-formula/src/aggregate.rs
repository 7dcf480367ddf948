//! Aggregate evaluation over a worksheet column

use crate::error::EvalErrorKind;
use crate::functions::AggregateFunction;
use fabcalc_core::{ColumnDef, Row, Worksheet};
use rust_decimal::Decimal;

/// Value of a column in one row: the computed number for formula columns,
/// the raw value read as a number otherwise
pub fn column_number(column: &ColumnDef, row: &Row) -> Option<Decimal> {
    if column.is_formula() {
        row.computed_value(&column.key)
    } else {
        row.value(&column.key).to_decimal()
    }
}

/// Aggregate a column over a set of rows
///
/// Rows without a numeric value are skipped. Every function yields 0 when
/// there is nothing to aggregate.
pub fn aggregate<'a, I>(
    func: AggregateFunction,
    column: &ColumnDef,
    rows: I,
) -> Result<Decimal, EvalErrorKind>
where
    I: IntoIterator<Item = &'a Row>,
{
    let values = rows
        .into_iter()
        .filter(|row| row.is_active())
        .filter_map(|row| column_number(column, row));

    let mut sum = Decimal::ZERO;
    let mut count: i64 = 0;
    let mut min: Option<Decimal> = None;
    let mut max: Option<Decimal> = None;

    for value in values {
        sum = sum.checked_add(value).ok_or(EvalErrorKind::Overflow)?;
        count += 1;
        min = Some(min.map_or(value, |m| m.min(value)));
        max = Some(max.map_or(value, |m| m.max(value)));
    }

    let result = match func {
        AggregateFunction::Sum => sum,
        AggregateFunction::Count => Decimal::from(count),
        AggregateFunction::Avg if count == 0 => Decimal::ZERO,
        AggregateFunction::Avg => sum
            .checked_div(Decimal::from(count))
            .ok_or(EvalErrorKind::Overflow)?,
        AggregateFunction::Min => min.unwrap_or_default(),
        AggregateFunction::Max => max.unwrap_or_default(),
    };

    Ok(result)
}

/// Aggregate a column of a worksheet by key
pub fn aggregate_worksheet(
    worksheet: &Worksheet,
    func: AggregateFunction,
    column_key: &str,
) -> Result<Decimal, EvalErrorKind> {
    let column = worksheet
        .column(column_key)
        .ok_or_else(|| EvalErrorKind::UnknownColumn(column_key.to_string()))?;
    aggregate(func, column, &worksheet.rows)
}
