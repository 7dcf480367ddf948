//! Built-in formula functions
//!
//! The function set is closed: every name the parser accepts maps to a
//! variant of [`ScalarFunction`] or [`AggregateFunction`], and the evaluator
//! matches on those variants exhaustively.

use crate::error::EvalErrorKind;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;

/// Largest scale a `Decimal` can carry
const MAX_SCALE: i64 = 28;

/// Scalar (per-row) functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarFunction {
    Round,
    Abs,
    Min,
    Max,
    If,
    And,
    Or,
    Not,
}

/// Aggregate functions over a worksheet column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// Scalar function definition
pub struct FunctionDef {
    /// Function name (uppercase)
    pub name: &'static str,
    pub function: ScalarFunction,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
}

impl FunctionDef {
    /// Check an argument count against the definition
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }

    /// Human readable arity, used in parse errors
    pub fn arity(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{}", max),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

/// Every scalar function the parser recognizes
pub const SCALAR_FUNCTIONS: &[FunctionDef] = &[
    FunctionDef {
        name: "ROUND",
        function: ScalarFunction::Round,
        min_args: 1,
        max_args: Some(2),
    },
    FunctionDef {
        name: "ABS",
        function: ScalarFunction::Abs,
        min_args: 1,
        max_args: Some(1),
    },
    // MIN/MAX with a single column argument parse as aggregates
    FunctionDef {
        name: "MIN",
        function: ScalarFunction::Min,
        min_args: 2,
        max_args: None,
    },
    FunctionDef {
        name: "MAX",
        function: ScalarFunction::Max,
        min_args: 2,
        max_args: None,
    },
    FunctionDef {
        name: "IF",
        function: ScalarFunction::If,
        min_args: 3,
        max_args: Some(3),
    },
    FunctionDef {
        name: "AND",
        function: ScalarFunction::And,
        min_args: 1,
        max_args: None,
    },
    FunctionDef {
        name: "OR",
        function: ScalarFunction::Or,
        min_args: 1,
        max_args: None,
    },
    FunctionDef {
        name: "NOT",
        function: ScalarFunction::Not,
        min_args: 1,
        max_args: Some(1),
    },
];

/// Look up a scalar function by name (case-insensitive)
pub fn lookup_scalar(name: &str) -> Option<&'static FunctionDef> {
    SCALAR_FUNCTIONS
        .iter()
        .find(|def| def.name.eq_ignore_ascii_case(name))
}

impl ScalarFunction {
    /// Uppercase function name
    pub fn name(self) -> &'static str {
        match self {
            ScalarFunction::Round => "ROUND",
            ScalarFunction::Abs => "ABS",
            ScalarFunction::Min => "MIN",
            ScalarFunction::Max => "MAX",
            ScalarFunction::If => "IF",
            ScalarFunction::And => "AND",
            ScalarFunction::Or => "OR",
            ScalarFunction::Not => "NOT",
        }
    }

    /// Functions whose arguments are evaluated on demand by the evaluator
    pub fn is_lazy(self) -> bool {
        matches!(
            self,
            ScalarFunction::If | ScalarFunction::And | ScalarFunction::Or
        )
    }

    /// Apply an eagerly evaluated function to its argument values
    ///
    /// Lazy functions are folded by the evaluator and never reach here.
    pub fn apply(self, args: &[Decimal]) -> Result<Decimal, EvalErrorKind> {
        match self {
            ScalarFunction::Round => fn_round(args),
            ScalarFunction::Abs => Ok(first(args).abs()),
            ScalarFunction::Min => Ok(args.iter().copied().min().unwrap_or_default()),
            ScalarFunction::Max => Ok(args.iter().copied().max().unwrap_or_default()),
            ScalarFunction::Not => Ok(from_bool(first(args).is_zero())),
            ScalarFunction::If | ScalarFunction::And | ScalarFunction::Or => {
                Ok(first(args))
            }
        }
    }
}

impl fmt::Display for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl AggregateFunction {
    /// Look up an aggregate by name (case-insensitive). `AVERAGE` is accepted
    /// for `AVG`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SUM" => Some(AggregateFunction::Sum),
            "AVG" | "AVERAGE" => Some(AggregateFunction::Avg),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            "COUNT" => Some(AggregateFunction::Count),
            _ => None,
        }
    }

    /// Uppercase function name
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Count => "COUNT",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn first(args: &[Decimal]) -> Decimal {
    args.first().copied().unwrap_or_default()
}

pub(crate) fn from_bool(b: bool) -> Decimal {
    if b {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

/// ROUND(x[, digits]); negative digits round left of the decimal point
fn fn_round(args: &[Decimal]) -> Result<Decimal, EvalErrorKind> {
    let digits = args
        .get(1)
        .map(|d| d.trunc().to_i64().unwrap_or(0))
        .unwrap_or(0);
    round_half_away(first(args), digits).ok_or(EvalErrorKind::Overflow)
}

/// Round half away from zero to `digits` places
///
/// Returns `None` when a negative `digits` rounds past the decimal range.
pub fn round_half_away(value: Decimal, digits: i64) -> Option<Decimal> {
    if digits >= 0 {
        let dp = digits.min(MAX_SCALE) as u32;
        return Some(value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero));
    }

    let exponent = digits.checked_neg().map_or(MAX_SCALE, |d| d.min(MAX_SCALE)) as u32;
    let factor = Decimal::from_i128_with_scale(10i128.checked_pow(exponent)?, 0);
    let scaled = value.checked_div(factor)?;
    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(factor)
}
