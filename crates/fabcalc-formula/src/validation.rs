//! Pre-save formula validation
//!
//! Validation parses the formula and checks it against the worksheet's column
//! set without evaluating anything.

use crate::ast::Expr;
use crate::dependency::{cycle_error, ColumnGraph, FormulaReferences};
use crate::error::{EvalErrorKind, FormulaError};
use crate::parser::{parse_formula, FormulaCache};
use fabcalc_core::{keys_match, ColumnDef, Worksheet};

/// Outcome of validating a formula
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormulaValidation {
    pub is_valid: bool,
    pub error_message: Option<String>,
    /// Byte offset of a parse error
    pub error_position: Option<usize>,
    /// Columns of the same worksheet the formula reads, using declared keys
    /// where they exist
    pub dependencies: Vec<String>,
    /// Sibling worksheets the formula reads
    pub worksheet_references: Vec<String>,
    pub has_circular_reference: bool,
}

impl FormulaValidation {
    fn invalid(message: String) -> Self {
        Self {
            is_valid: false,
            error_message: Some(message),
            ..Default::default()
        }
    }
}

/// Validate a formula against the columns of a worksheet
///
/// Checks syntax, that every referenced column exists, and that none of the
/// referenced formula columns already sit on a dependency cycle.
pub fn validate_formula(formula: &str, columns: &[ColumnDef]) -> FormulaValidation {
    validate(formula, columns, None, None)
}

/// Validate a formula as the new formula of `column_key`
///
/// The candidate replaces the column's current formula (or defines a new
/// column) before the cycle check, so a formula that would close a cycle is
/// reported with `has_circular_reference`.
pub fn validate_column_formula(
    column_key: &str,
    formula: &str,
    columns: &[ColumnDef],
) -> FormulaValidation {
    validate(formula, columns, Some(column_key), None)
}

/// Validate a formula inside a worksheet, optionally as the new formula of
/// `column_key`
///
/// References qualified with the worksheet's own name are local, as they are
/// when the formula is evaluated; reading the worksheet's own summary is
/// circular.
pub fn validate_worksheet_formula(
    worksheet: &Worksheet,
    column_key: Option<&str>,
    formula: &str,
) -> FormulaValidation {
    validate(formula, &worksheet.columns, column_key, Some(&worksheet.name))
}

fn validate(
    formula: &str,
    columns: &[ColumnDef],
    target: Option<&str>,
    own_worksheet: Option<&str>,
) -> FormulaValidation {
    let expr = match parse_formula(formula) {
        Ok(expr) => expr,
        Err(FormulaError::Parse { position, message }) => {
            return FormulaValidation {
                error_position: Some(position),
                ..FormulaValidation::invalid(message)
            };
        }
        Err(err) => return FormulaValidation::invalid(err.to_string()),
    };

    let refs = FormulaReferences::collect(&expr, own_worksheet);
    let is_target = |key: &str| target.map_or(false, |t| keys_match(t, key));

    let mut dependencies = Vec::new();
    let mut unknown = Vec::new();
    for reference in &refs.columns {
        match columns.iter().find(|c| c.matches_key(reference)) {
            Some(column) => dependencies.push(column.key.clone()),
            None if is_target(reference) => dependencies.push(reference.clone()),
            None => unknown.push(reference.clone()),
        }
    }
    dependencies.sort();
    dependencies.dedup();

    let mut result = FormulaValidation {
        is_valid: true,
        dependencies,
        worksheet_references: refs.worksheets.into_iter().collect(),
        ..Default::default()
    };

    if !unknown.is_empty() {
        result.is_valid = false;
        result.error_message = Some(format!("Unknown column: {}", unknown.join(", ")));
        return result;
    }

    if let Some(own) = own_worksheet.filter(|own| reads_own_summary(&expr, own)) {
        result.is_valid = false;
        result.has_circular_reference = true;
        result.error_message =
            Some(EvalErrorKind::CircularWorksheetReference(own.to_string()).to_string());
        return result;
    }

    // Candidate column plus the other columns whose formulas parse
    let mut cache = FormulaCache::new();
    let mut candidate = Vec::with_capacity(columns.len() + 1);
    let mut start = None;
    for column in columns {
        if is_target(&column.key) {
            start = Some(column.key.clone());
            candidate.push(column.clone().with_formula(formula));
        } else if column
            .formula_text()
            .map_or(true, |text| cache.get_or_parse(text).is_ok())
        {
            candidate.push(column.clone());
        }
    }
    let start = match (start, target) {
        (Some(key), _) => key,
        (None, Some(key)) => {
            candidate.push(ColumnDef::formula(key, formula));
            key.to_string()
        }
        // Free-standing formula: an empty key cannot collide with a column
        (None, None) => {
            candidate.push(ColumnDef::formula(String::new(), formula));
            String::new()
        }
    };

    let graph = match ColumnGraph::build(&candidate, own_worksheet, &mut cache) {
        Ok(graph) => graph,
        Err(err) => return FormulaValidation::invalid(err.to_string()),
    };

    if let Some(cycle) = graph.graph().find_cycle_from(&start) {
        result.is_valid = false;
        result.has_circular_reference = true;
        result.error_message = Some(cycle_error(cycle).to_string());
    }

    result
}

fn reads_own_summary(expr: &Expr, own: &str) -> bool {
    let mut found = false;
    expr.walk(&mut |node| {
        if let Expr::CrossSheetProperty { worksheet, .. } = node {
            found |= keys_match(worksheet, own);
        }
    });
    found
}
