use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use super::handlers::{
    BooleanHandler, DateHandler, DecimalHandler, IntegerHandler, LocaleHandler, TextHandler,
    TimestampHandler,
};
use super::type_names::{self, simple_type_name};
use super::{parse_id_list, TypeClass, Value, ValueHandler};
use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::load::EntityMetadata;

/// Maps type identifiers to value handlers and classifies arbitrary type
/// identifiers.
///
/// Handlers and enum types are registered once at startup through `&mut
/// self`; after that the registry is shared by reference. Classification
/// results are memoized behind a mutex since concurrent renders may meet an
/// unseen type name at the same time. Cache writes are idempotent.
pub struct ValueTypeRegistry {
    handlers: HashMap<String, Arc<dyn ValueHandler>>,
    enums: HashMap<String, bool>,
    fallback: TextHandler,
    metadata: Arc<dyn EntityMetadata>,
    separator: char,
    binary_placeholder: String,
    classes: Mutex<HashMap<String, TypeClass>>,
    unknown_types: Mutex<HashSet<String>>,
}

impl ValueTypeRegistry {
    /// An empty registry. Every type name resolves to the opaque string
    /// handler until something is registered.
    pub fn new(config: &HistoryConfig, metadata: Arc<dyn EntityMetadata>) -> Self {
        Self {
            handlers: HashMap::new(),
            enums: HashMap::new(),
            fallback: TextHandler,
            metadata,
            separator: config.list_separator,
            binary_placeholder: config.binary_placeholder.clone(),
            classes: Mutex::new(HashMap::new()),
            unknown_types: Mutex::new(HashSet::new()),
        }
    }

    /// A registry with handlers for the base types: boolean, integer,
    /// big-decimal, date, timestamp, locale and string.
    pub fn with_defaults(config: &HistoryConfig, metadata: Arc<dyn EntityMetadata>) -> Result<Self> {
        let mut registry = Self::new(config, metadata);
        registry.register_aliases(type_names::BOOLEAN_ALIASES, Arc::new(BooleanHandler::new(config)))?;
        registry.register_aliases(type_names::INTEGER_ALIASES, Arc::new(IntegerHandler))?;
        registry.register_aliases(type_names::DECIMAL_ALIASES, Arc::new(DecimalHandler))?;
        registry.register_aliases(type_names::DATE_ALIASES, Arc::new(DateHandler::new(config)))?;
        registry.register_aliases(
            type_names::TIMESTAMP_ALIASES,
            Arc::new(TimestampHandler::new(config)),
        )?;
        registry.register_aliases(type_names::LOCALE_ALIASES, Arc::new(LocaleHandler))?;
        registry.register_aliases(type_names::STRING_ALIASES, Arc::new(TextHandler))?;
        Ok(registry)
    }

    /// Registers a handler under an exact type name. Registering the same
    /// name twice is a configuration error.
    pub fn register(&mut self, type_name: &str, handler: Arc<dyn ValueHandler>) -> Result<()> {
        if self.handlers.contains_key(type_name) || self.enums.contains_key(type_name) {
            return Err(HistoryError::DuplicateRegistration(type_name.to_string()).into());
        }
        log::debug!("Registering value handler for '{}'", type_name);
        self.handlers.insert(type_name.to_string(), handler);
        self.clear_classifications();
        Ok(())
    }

    pub fn register_aliases(&mut self, type_names: &[&str], handler: Arc<dyn ValueHandler>) -> Result<()> {
        for type_name in type_names {
            self.register(type_name, handler.clone())?;
        }
        Ok(())
    }

    /// Marks a type name as an enum. Constants of `localized` enums are
    /// rendered through the translator.
    pub fn register_enum(&mut self, type_name: &str, localized: bool) -> Result<()> {
        if self.handlers.contains_key(type_name) || self.enums.contains_key(type_name) {
            return Err(HistoryError::DuplicateRegistration(type_name.to_string()).into());
        }
        self.enums.insert(type_name.to_string(), localized);
        self.clear_classifications();
        Ok(())
    }

    /// The handler for `type_name`, or the opaque string handler.
    pub fn resolve(&self, type_name: &str) -> &dyn ValueHandler {
        match self.handlers.get(type_name) {
            Some(handler) => handler.as_ref(),
            None => &self.fallback,
        }
    }

    pub fn serialize(&self, type_name: &str, value: &Value) -> Result<String> {
        self.resolve(type_name).serialize(value)
    }

    pub fn deserialize(&self, type_name: &str, raw: &str) -> Result<Value> {
        self.resolve(type_name).deserialize(raw)
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn metadata(&self) -> &dyn EntityMetadata {
        self.metadata.as_ref()
    }

    pub fn classify(&self, type_name: &str) -> TypeClass {
        if let Ok(classes) = self.classes.lock() {
            if let Some(class) = classes.get(type_name) {
                return *class;
            }
        }
        if let Ok(unknown) = self.unknown_types.lock() {
            if unknown.contains(type_name) {
                return TypeClass::Unknown;
            }
        }

        let class = self.compute_class(type_name);
        if class == TypeClass::Unknown {
            log::debug!("Value type '{}' is unknown", type_name);
            if let Ok(mut unknown) = self.unknown_types.lock() {
                unknown.insert(type_name.to_string());
            }
        } else if let Ok(mut classes) = self.classes.lock() {
            classes.insert(type_name.to_string(), class);
        }
        class
    }

    fn compute_class(&self, type_name: &str) -> TypeClass {
        if self.handlers.contains_key(type_name) {
            TypeClass::BaseType
        } else if let Some(localized) = self.enums.get(type_name) {
            if *localized {
                TypeClass::I18nEnum
            } else {
                TypeClass::Enum
            }
        } else if type_names::BINARY.contains(&type_name) {
            TypeClass::Binary
        } else if self.metadata.entity_type(type_name).is_some() {
            TypeClass::Entity
        } else {
            TypeClass::Unknown
        }
    }

    fn clear_classifications(&mut self) {
        if let Ok(classes) = self.classes.get_mut() {
            classes.clear();
        }
        if let Ok(unknown) = self.unknown_types.get_mut() {
            unknown.clear();
        }
    }

    /// Renders a stored string for display without any request context.
    ///
    /// Entities render as `Simple#id` (one per element of the id list),
    /// enums as their constant, binary payloads as the configured
    /// placeholder. Unknown types and unparsable base values come back
    /// unchanged.
    pub fn format_raw(&self, type_name: Option<&str>, raw: &str) -> String {
        let Some(type_name) = type_name else {
            return raw.to_string();
        };
        match self.classify(type_name) {
            TypeClass::BaseType => {
                let handler = self.resolve(type_name);
                match handler.deserialize(raw) {
                    Ok(value) => handler.format(&value),
                    Err(e) => {
                        log::debug!("Formatting '{}' as raw text: {}", raw, e);
                        raw.to_string()
                    }
                }
            }
            TypeClass::Enum | TypeClass::I18nEnum => raw.trim().to_string(),
            TypeClass::Entity => {
                let simple = simple_type_name(type_name);
                parse_id_list(raw, self.separator)
                    .iter()
                    .map(|id| format!("{}#{}", simple, id))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
            TypeClass::Binary => self.binary_placeholder.clone(),
            TypeClass::Unknown => raw.to_string(),
        }
    }
}
