//! Typed property values.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Data type of a registered property.
///
/// Every type except `Link` is also a storage category: a resource loads
/// all of its properties of one category with a single backend scan the
/// first time any of them is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropDataType {
    Int,
    String,
    LongString,
    Date,
    Double,
    Blob,
    Bool,
    StringList,
    Link,
}

impl PropDataType {
    pub const ALL: [PropDataType; 9] = [
        PropDataType::Int,
        PropDataType::String,
        PropDataType::LongString,
        PropDataType::Date,
        PropDataType::Double,
        PropDataType::Blob,
        PropDataType::Bool,
        PropDataType::StringList,
        PropDataType::Link,
    ];

    /// Bit of this category in a resource's loaded-categories mask.
    pub fn category_bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn name(self) -> &'static str {
        match self {
            PropDataType::Int => "INT",
            PropDataType::String => "STRING",
            PropDataType::LongString => "LONG_STRING",
            PropDataType::Date => "DATE",
            PropDataType::Double => "DOUBLE",
            PropDataType::Blob => "BLOB",
            PropDataType::Bool => "BOOL",
            PropDataType::StringList => "STRING_LIST",
            PropDataType::Link => "LINK",
        }
    }
}

impl fmt::Display for PropDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A property value. Links are not values; they live in link slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropValue {
    Int(i64),
    String(String),
    LongString(Arc<str>),
    Date(NaiveDateTime),
    Double(f64),
    Blob(Arc<[u8]>),
    Bool(bool),
    StringList(Vec<String>),
}

// ============================================================================
// Type checking
// ============================================================================

impl PropValue {
    pub fn data_type(&self) -> PropDataType {
        match self {
            PropValue::Int(_) => PropDataType::Int,
            PropValue::String(_) => PropDataType::String,
            PropValue::LongString(_) => PropDataType::LongString,
            PropValue::Date(_) => PropDataType::Date,
            PropValue::Double(_) => PropDataType::Double,
            PropValue::Blob(_) => PropDataType::Blob,
            PropValue::Bool(_) => PropDataType::Bool,
            PropValue::StringList(_) => PropDataType::StringList,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            PropValue::Double(d) => Some(*d),
            PropValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Short and long strings both read as `&str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            PropValue::LongString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            PropValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            PropValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            PropValue::StringList(l) => Some(l),
            _ => None,
        }
    }

    /// The minimum date is the "no value" marker: writing it deletes the property.
    pub fn is_min_date(&self) -> bool {
        matches!(self, PropValue::Date(d) if *d == NaiveDateTime::MIN)
    }

    /// Approximate heap footprint, used for cache budgeting.
    pub fn heap_size(&self) -> usize {
        match self {
            PropValue::String(s) => s.len(),
            PropValue::LongString(s) => s.len(),
            PropValue::Blob(b) => b.len(),
            PropValue::StringList(l) => l.iter().map(String::len).sum(),
            _ => 0,
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for PropValue { fn from(v: bool) -> Self { PropValue::Bool(v) } }
impl From<i32> for PropValue { fn from(v: i32) -> Self { PropValue::Int(v as i64) } }
impl From<i64> for PropValue { fn from(v: i64) -> Self { PropValue::Int(v) } }
impl From<f64> for PropValue { fn from(v: f64) -> Self { PropValue::Double(v) } }
impl From<String> for PropValue { fn from(v: String) -> Self { PropValue::String(v) } }
impl From<&str> for PropValue { fn from(v: &str) -> Self { PropValue::String(v.to_owned()) } }
impl From<NaiveDateTime> for PropValue { fn from(v: NaiveDateTime) -> Self { PropValue::Date(v) } }
impl From<Vec<u8>> for PropValue { fn from(v: Vec<u8>) -> Self { PropValue::Blob(v.into()) } }
impl From<Vec<String>> for PropValue { fn from(v: Vec<String>) -> Self { PropValue::StringList(v) } }

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Int(i) => write!(f, "{i}"),
            PropValue::String(s) => f.write_str(s),
            PropValue::LongString(s) => f.write_str(s),
            PropValue::Date(d) => write!(f, "{d}"),
            PropValue::Double(v) => write!(f, "{v}"),
            PropValue::Blob(b) => write!(f, "<blob[{}]>", b.len()),
            PropValue::Bool(b) => write!(f, "{b}"),
            PropValue::StringList(l) => f.write_str(&l.join(", ")),
        }
    }
}

// ============================================================================
// Comparison
// ============================================================================

impl PropValue {
    /// Compare two values of compatible types. Returns None across
    /// incompatible types; numeric types compare with each other.
    pub fn compare(&self, other: &PropValue) -> Option<Ordering> {
        match (self, other) {
            (PropValue::Int(a), PropValue::Int(b)) => Some(a.cmp(b)),
            (PropValue::Double(a), PropValue::Double(b)) => a.partial_cmp(b),
            (PropValue::Int(a), PropValue::Double(b)) => (*a as f64).partial_cmp(b),
            (PropValue::Double(a), PropValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (PropValue::Date(a), PropValue::Date(b)) => Some(a.cmp(b)),
            (PropValue::Bool(a), PropValue::Bool(b)) => Some(a.cmp(b)),
            (PropValue::StringList(a), PropValue::StringList(b)) => Some(a.cmp(b)),
            (PropValue::Blob(a), PropValue::Blob(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_str(), b.as_str()) {
                (Some(a), Some(b)) => Some(a.cmp(b)),
                _ => None,
            },
        }
    }

    /// Total order used for sorting: compatible values by `compare`,
    /// everything else by data type rank. NaN sorts as equal.
    pub fn sort_cmp(&self, other: &PropValue) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| (self.data_type() as u8).cmp(&(other.data_type() as u8)))
    }
}
