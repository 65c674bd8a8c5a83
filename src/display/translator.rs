use std::collections::HashMap;

use anyhow::Result;

use crate::db::Operation;
use crate::values::simple_type_name;

/// Label lookup. Only `translate` is required; the label helpers build the
/// keys and fall back to untranslated text.
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str) -> Option<String>;

    /// Key `history.operation.{Operation}`, default e.g. `updated`.
    fn operation_label(&self, operation: Operation) -> String {
        self.translate(&format!("history.operation.{}", operation.as_str()))
            .unwrap_or_else(|| operation.default_label().to_string())
    }

    /// Key `{SimpleType}.{property}`, default the property name.
    fn property_label(&self, entity_type_name: &str, property_name: &str) -> String {
        self.translate(&format!("{}.{}", simple_type_name(entity_type_name), property_name))
            .unwrap_or_else(|| property_name.to_string())
    }

    /// Key `{SimpleEnum}.{CONSTANT}`, default the constant.
    fn enum_label(&self, enum_type_name: &str, constant: &str) -> String {
        self.translate(&format!("{}.{}", simple_type_name(enum_type_name), constant))
            .unwrap_or_else(|| constant.to_string())
    }
}

pub struct NoTranslation;

impl Translator for NoTranslation {
    fn translate(&self, _key: &str) -> Option<String> {
        None
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapTranslator {
    labels: HashMap<String, String>,
}

impl MapTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, label: &str) -> Self {
        self.insert(key, label);
        self
    }

    pub fn insert(&mut self, key: &str, label: &str) {
        self.labels.insert(key.to_string(), label.to_string());
    }

    /// A flat JSON object of key -> label.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let labels: HashMap<String, String> = serde_json::from_str(json)?;
        Ok(Self { labels })
    }
}

impl Translator for MapTranslator {
    fn translate(&self, key: &str) -> Option<String> {
        self.labels.get(key).cloned()
    }
}
