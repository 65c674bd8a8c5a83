use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::legacy::TypeNameNormalizer;

/// Settings shared by the value registry, the legacy converter and the
/// loader. Every field has a default so a partial JSON document is enough.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Separator between serialized elements of a collection-valued change.
    pub list_separator: char,
    /// chrono format used to display dates.
    pub date_format: String,
    /// chrono format used to display timestamps.
    pub timestamp_format: String,
    pub true_label: String,
    pub false_label: String,
    /// Shown instead of binary payloads, which are never interpreted.
    pub binary_placeholder: String,
    /// Obsolete value type names mapped to their current equivalents, on
    /// top of the built-in rename table.
    pub type_renames: BTreeMap<String, String>,
    /// Maximum number of ids bound into a single `IN (...)` query.
    pub query_batch_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            list_separator: ',',
            date_format: "%Y-%m-%d".to_string(),
            timestamp_format: "%Y-%m-%d %H:%M".to_string(),
            true_label: "yes".to_string(),
            false_label: "no".to_string(),
            binary_placeholder: "[binary data]".to_string(),
            type_renames: BTreeMap::new(),
            query_batch_size: 500,
        }
    }
}

impl HistoryConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: HistoryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("CONFIG LOAD: path='{}'", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.list_separator.is_alphanumeric() || self.list_separator.is_whitespace() {
            return Err(HistoryError::InvalidConfig(format!(
                "list_separator '{}' must be a punctuation character",
                self.list_separator
            ))
            .into());
        }
        if self.query_batch_size == 0 {
            return Err(HistoryError::InvalidConfig(
                "query_batch_size must be greater than zero".to_string(),
            )
            .into());
        }
        check_format("date_format", &self.date_format)?;
        check_format("timestamp_format", &self.timestamp_format)?;
        if let Some(name) = TypeNameNormalizer::new(&self.type_renames).rename_cycle() {
            return Err(HistoryError::InvalidConfig(format!("type_renames loop through '{}'", name)).into());
        }
        Ok(())
    }
}

fn check_format(field: &str, format: &str) -> Result<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(HistoryError::InvalidConfig(format!("{} '{}' is not a valid chrono format", field, format)).into());
    }
    Ok(())
}
