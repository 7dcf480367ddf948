//! Column definitions

use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// Decimal places used when a column does not configure its own
pub const DEFAULT_DECIMAL_PLACES: u32 = 2;

/// How a column's values are displayed and edited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ColumnType {
    #[default]
    Number,
    Currency,
    Text,
    Boolean,
    Date,
    Computed,
}

impl ColumnType {
    /// Whether values of this type take part in column totals
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Number | ColumnType::Currency | ColumnType::Computed
        )
    }

    /// Lowercase name, as stored by the editing surface
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Number => "number",
            ColumnType::Currency => "currency",
            ColumnType::Text => "text",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Computed => "computed",
        }
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "number" | "decimal" | "integer" => Ok(ColumnType::Number),
            "currency" => Ok(ColumnType::Currency),
            "text" | "string" => Ok(ColumnType::Text),
            "boolean" | "bool" | "checkbox" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "computed" | "formula" => Ok(ColumnType::Computed),
            _ => Err(Error::InvalidColumnType(s.to_string())),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worksheet column
///
/// A column is a *formula column* iff `formula` is set. Formulas reference
/// other columns of the same worksheet by [`key`](ColumnDef::key).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColumnDef {
    /// Stable identifier, unique within the worksheet
    pub key: String,
    /// Display/editing type
    #[cfg_attr(feature = "serde", serde(default))]
    pub display_type: ColumnType,
    /// Formula text for derived columns
    #[cfg_attr(feature = "serde", serde(default))]
    pub formula: Option<String>,
    /// Places results are rounded to when stored
    #[cfg_attr(feature = "serde", serde(default = "default_decimal_places"))]
    pub decimal_places: u32,
}

#[cfg(feature = "serde")]
fn default_decimal_places() -> u32 {
    DEFAULT_DECIMAL_PLACES
}

impl ColumnDef {
    /// Create an input column
    pub fn new<S: Into<String>>(key: S, display_type: ColumnType) -> Self {
        Self {
            key: key.into(),
            display_type,
            formula: None,
            decimal_places: DEFAULT_DECIMAL_PLACES,
        }
    }

    /// Create a formula column with the `Computed` display type
    pub fn formula<K: Into<String>, F: Into<String>>(key: K, formula: F) -> Self {
        Self {
            key: key.into(),
            display_type: ColumnType::Computed,
            formula: Some(formula.into()),
            decimal_places: DEFAULT_DECIMAL_PLACES,
        }
    }

    /// Set or replace the formula
    pub fn with_formula<F: Into<String>>(mut self, formula: F) -> Self {
        self.formula = Some(formula.into());
        self
    }

    /// Set decimal places
    pub fn with_decimal_places(mut self, places: u32) -> Self {
        self.decimal_places = places;
        self
    }

    /// Set display type
    pub fn with_display_type(mut self, display_type: ColumnType) -> Self {
        self.display_type = display_type;
        self
    }

    /// Check if this column derives its value from a formula
    pub fn is_formula(&self) -> bool {
        self.formula_text().is_some()
    }

    /// Formula text, ignoring blank formulas
    pub fn formula_text(&self) -> Option<&str> {
        self.formula
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    /// Check if the column takes part in column totals
    pub fn is_numeric(&self) -> bool {
        self.display_type.is_numeric() || self.is_formula()
    }

    /// Case-insensitive key comparison
    pub fn matches_key(&self, key: &str) -> bool {
        crate::keys_match(&self.key, key)
    }
}

/// Check that a column key is a usable formula identifier
pub(crate) fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
