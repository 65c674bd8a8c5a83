//! Typed error conditions of the history engine.
//!
//! Public functions return `anyhow::Result`; these variants travel inside
//! the `anyhow::Error` and can be recovered with `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// A value handler, enum type, adapter or hook was registered twice for
    /// the same key. This is a startup configuration error.
    #[error("duplicate registration for '{0}'")]
    DuplicateRegistration(String),

    /// The conversion pipeline was driven out of order.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An entity type name does not resolve to a known type.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A stored string could not be parsed as the requested value type.
    #[error("invalid {type_name} value: '{raw}'")]
    InvalidValue { type_name: String, raw: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HistoryError {
    pub fn invalid_value(type_name: &str, raw: &str) -> Self {
        HistoryError::InvalidValue {
            type_name: type_name.to_string(),
            raw: raw.to_string(),
        }
    }
}
