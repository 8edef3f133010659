//! Result rows returned by a record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single column value as delivered by the store.
///
/// Stores report what the database holds; they make no attempt to coerce
/// values into the engine's attribute types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreValue {
    /// SQL NULL.
    Null,
    /// Any integral column.
    Int(i64),
    /// Any floating point or decimal column.
    Float(f64),
    /// Character data.
    Text(String),
    /// Date/time column, normalized to UTC.
    Timestamp(DateTime<Utc>),
}

impl StoreValue {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, StoreValue::Null)
    }

    /// Returns the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StoreValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns a short name for the value's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreValue::Null => "null",
            StoreValue::Int(_) => "int",
            StoreValue::Float(_) => "float",
            StoreValue::Text(_) => "text",
            StoreValue::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Null => write!(f, "NULL"),
            StoreValue::Int(v) => write!(f, "{v}"),
            StoreValue::Float(v) => write!(f, "{v}"),
            StoreValue::Text(v) => write!(f, "'{v}'"),
            StoreValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<i64> for StoreValue {
    fn from(v: i64) -> Self {
        StoreValue::Int(v)
    }
}

impl From<f64> for StoreValue {
    fn from(v: f64) -> Self {
        StoreValue::Float(v)
    }
}

impl From<&str> for StoreValue {
    fn from(v: &str) -> Self {
        StoreValue::Text(v.to_string())
    }
}

impl From<String> for StoreValue {
    fn from(v: String) -> Self {
        StoreValue::Text(v)
    }
}

impl From<DateTime<Utc>> for StoreValue {
    fn from(v: DateTime<Utc>) -> Self {
        StoreValue::Timestamp(v)
    }
}

impl<T: Into<StoreValue>> From<Option<T>> for StoreValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(StoreValue::Null, Into::into)
    }
}

/// One result row: ordered, named columns.
///
/// Column lookup is case-insensitive, matching how SQL engines resolve
/// unquoted identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, StoreValue)>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column, replacing an existing column of the same name.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<StoreValue>) -> Self {
        self.push(name, value);
        self
    }

    /// Appends a column, replacing an existing column of the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<StoreValue>) {
        let name = name.into();
        let value = value.into();
        match self
            .columns
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Returns the value of the named column.
    pub fn get(&self, name: &str) -> Option<&StoreValue> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Returns the columns in result-set order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &StoreValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
