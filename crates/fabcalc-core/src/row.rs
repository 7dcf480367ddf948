//! Worksheet rows

use crate::value::RawValue;
use crate::EntityId;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A worksheet row
///
/// `values` holds what the user entered; `computed` holds the last evaluated
/// number for each column and is only ever written by the calculation engine.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Row {
    pub id: EntityId,
    pub worksheet_id: EntityId,
    /// Raw values keyed by column key
    pub values: BTreeMap<String, RawValue>,
    /// Last evaluated numbers keyed by column key
    pub computed: BTreeMap<String, Decimal>,
    /// Mirrors the row's `total_cost` result when that column exists
    pub calculated_total: Option<Decimal>,
    /// Display-only grouping row; never calculated or aggregated
    pub is_group_header: bool,
    /// Soft-deleted
    pub is_deleted: bool,
}

impl Row {
    /// Create an empty row
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Create a group header row
    pub fn group_header(id: EntityId) -> Self {
        Self {
            id,
            is_group_header: true,
            ..Default::default()
        }
    }

    /// Set a raw value (builder form)
    pub fn with_value<K: Into<String>, V: Into<RawValue>>(mut self, key: K, value: V) -> Self {
        self.set_value(key, value);
        self
    }

    /// Set a raw value
    pub fn set_value<K: Into<String>, V: Into<RawValue>>(&mut self, key: K, value: V) {
        self.values.insert(key.into(), value.into());
    }

    /// Get a raw value, matching the key case-insensitively
    pub fn value(&self, key: &str) -> &RawValue {
        static EMPTY: RawValue = RawValue::Empty;

        if let Some(v) = self.values.get(key) {
            return v;
        }
        self.values
            .iter()
            .find(|(k, _)| crate::keys_match(k, key))
            .map(|(_, v)| v)
            .unwrap_or(&EMPTY)
    }

    /// Get the last computed number for a column
    pub fn computed_value(&self, key: &str) -> Option<Decimal> {
        if let Some(v) = self.computed.get(key) {
            return Some(*v);
        }
        self.computed
            .iter()
            .find(|(k, _)| crate::keys_match(k, key))
            .map(|(_, v)| *v)
    }

    /// Check if the row takes part in calculation and aggregation
    pub fn is_active(&self) -> bool {
        !self.is_group_header && !self.is_deleted
    }
}
