//! Formula Abstract Syntax Tree types

use crate::functions::{AggregateFunction, ScalarFunction};
use fabcalc_core::SummaryField;
use rust_decimal::Decimal;

/// Formula expression AST
///
/// Trees are immutable once parsed and shared through the formula cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // === Literals ===
    /// Numeric literal
    Number(Decimal),
    /// TRUE / FALSE
    Boolean(bool),

    // === References ===
    /// Column of the current row
    ColumnRef(String),

    // === Operators ===
    /// Binary operation
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },

    // === Functions ===
    /// Scalar function call
    Function {
        func: ScalarFunction,
        args: Vec<Expr>,
    },
    /// Aggregate over a column of the current worksheet: `SUM(qty)`
    Aggregate {
        func: AggregateFunction,
        column: String,
    },
    /// Aggregate over a sibling worksheet: `Fabrication.SUM(total_cost)`
    CrossSheetAggregate {
        worksheet: String,
        func: AggregateFunction,
        column: String,
    },
    /// Summary field of a sibling worksheet: `Fabrication.TotalCost`
    CrossSheetProperty {
        worksheet: String,
        field: SummaryField,
    },
}

impl Expr {
    pub(crate) fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub(crate) fn unary(op: UnaryOperator, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Number of nodes on the longest path from this node to a leaf
    pub fn depth(&self) -> usize {
        match self {
            Expr::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            Expr::Unary { operand, .. } => 1 + operand.depth(),
            Expr::Function { args, .. } => 1 + args.iter().map(Expr::depth).max().unwrap_or(0),
            Expr::Number(_)
            | Expr::Boolean(_)
            | Expr::ColumnRef(_)
            | Expr::Aggregate { .. }
            | Expr::CrossSheetAggregate { .. }
            | Expr::CrossSheetProperty { .. } => 1,
        }
    }

    /// Visit this node and every descendant, parents first
    pub fn walk<'a, F: FnMut(&'a Expr)>(&'a self, f: &mut F) {
        f(self);
        match self {
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            Expr::Number(_)
            | Expr::Boolean(_)
            | Expr::ColumnRef(_)
            | Expr::Aggregate { .. }
            | Expr::CrossSheetAggregate { .. }
            | Expr::CrossSheetProperty { .. } => {}
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Logical
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
}
