//! Raw (user-entered) row values

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// A value as entered into a worksheet row
///
/// Formula columns never store a `RawValue`; their results live in the row's
/// `computed` map instead.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum RawValue {
    /// No value entered
    #[default]
    Empty,

    /// Boolean value
    Boolean(bool),

    /// Numeric value
    Number(Decimal),

    /// Calendar date
    Date(NaiveDate),

    /// Free text
    Text(String),
}

impl RawValue {
    /// Check if the value is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, RawValue::Empty)
    }

    /// Interpret the value as a decimal.
    ///
    /// Numbers pass through and text is parsed when it holds a number
    /// (`" 12.50 "`). Empty, boolean, date and non-numeric text return `None`;
    /// callers decide how to coerce those.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Text(s) => parse_decimal(s),
            RawValue::Empty | RawValue::Boolean(_) | RawValue::Date(_) => None,
        }
    }

    /// Short name of the value's type, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Empty => "empty",
            RawValue::Boolean(_) => "boolean",
            RawValue::Number(_) => "number",
            RawValue::Date(_) => "date",
            RawValue::Text(_) => "text",
        }
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Empty => Ok(()),
            RawValue::Boolean(true) => write!(f, "TRUE"),
            RawValue::Boolean(false) => write!(f, "FALSE"),
            RawValue::Number(n) => write!(f, "{}", n.normalize()),
            RawValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            RawValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<Decimal> for RawValue {
    fn from(n: Decimal) -> Self {
        RawValue::Number(n)
    }
}

impl From<i64> for RawValue {
    fn from(n: i64) -> Self {
        RawValue::Number(Decimal::from(n))
    }
}

impl From<i32> for RawValue {
    fn from(n: i32) -> Self {
        RawValue::Number(Decimal::from(n))
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Boolean(b)
    }
}

impl From<NaiveDate> for RawValue {
    fn from(d: NaiveDate) -> Self {
        RawValue::Date(d)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_number_to_decimal() {
        assert_eq!(RawValue::from(dec("10.5")).to_decimal(), Some(dec("10.5")));
        assert_eq!(RawValue::from(3).to_decimal(), Some(dec("3")));
    }

    #[test]
    fn test_numeric_text_parses() {
        assert_eq!(RawValue::from(" 12.50 ").to_decimal(), Some(dec("12.50")));
        assert_eq!(RawValue::from("1e3").to_decimal(), Some(dec("1000")));
    }

    #[test]
    fn test_non_numeric_values() {
        assert_eq!(RawValue::from("bolt").to_decimal(), None);
        assert_eq!(RawValue::from(true).to_decimal(), None);
        assert_eq!(RawValue::Empty.to_decimal(), None);
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(RawValue::from(date).to_decimal(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(RawValue::from(dec("4.500")).to_string(), "4.5");
        assert_eq!(RawValue::from(false).to_string(), "FALSE");
        assert_eq!(RawValue::Empty.to_string(), "");
    }

    #[test]
    fn test_from_option() {
        assert_eq!(RawValue::from(None::<i64>), RawValue::Empty);
        assert_eq!(RawValue::from(Some("x")), RawValue::Text("x".into()));
    }
}
