//! Typed resolution of the opaque strings stored in history attributes.

use std::fmt;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

pub mod handlers;
pub mod registry;
pub mod type_names;

pub use registry::ValueTypeRegistry;
pub use type_names::simple_type_name;

/// A stored value after its type name has been resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Locale(String),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Date(d) => write!(f, "{}", d),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::Locale(tag) => f.write_str(tag),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Strategy for one type identifier.
pub trait ValueHandler: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<String>;
    fn deserialize(&self, raw: &str) -> Result<Value>;
    fn format(&self, value: &Value) -> String;
}

/// What a type identifier denotes. Computed once per type name and cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeClass {
    BaseType,
    Enum,
    /// Enum whose constants carry translatable labels.
    I18nEnum,
    Entity,
    Binary,
    Unknown,
}

/// Parses a delimited list of entity ids. Malformed elements are logged and
/// dropped; the rest of the list is kept.
pub fn parse_id_list(raw: &str, separator: char) -> Vec<i64> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                log::warn!("Dropping malformed id '{}' from list '{}'", s, raw);
                None
            }
        })
        .collect()
}
