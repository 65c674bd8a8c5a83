use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use super::translator::Translator;
use super::types::{DisplayAttribute, DisplayRecord};
use crate::db::{AttributeDiff, EntityKey, HistoryRecord};
use crate::error::HistoryError;
use crate::load::{EntityMetadata, LoadContext};
use crate::values::{parse_id_list, simple_type_name, TypeClass, ValueTypeRegistry};

/// Everything an adapter may consult while converting one record.
pub struct ConversionContext<'a> {
    pub load: &'a LoadContext,
    pub values: &'a ValueTypeRegistry,
    pub translator: &'a dyn Translator,
}

impl<'a> ConversionContext<'a> {
    pub fn metadata(&self) -> &dyn EntityMetadata {
        self.values.metadata()
    }

    /// Renders a stored value. Entity references use the names collected
    /// by the loader; localized enum constants go through the translator.
    pub fn format_value(&self, type_name: Option<&str>, raw: Option<&str>) -> Option<String> {
        let raw = raw?;
        let Some(type_name) = type_name else {
            return Some(raw.to_string());
        };
        let formatted = match self.values.classify(type_name) {
            TypeClass::Entity => parse_id_list(raw, self.values.separator())
                .into_iter()
                .map(|id| self.load.display_name_or_placeholder(type_name, id))
                .collect::<Vec<_>>()
                .join(", "),
            TypeClass::I18nEnum => self.translator.enum_label(type_name, raw.trim()),
            _ => self.values.format_raw(Some(type_name), raw),
        };
        Some(formatted)
    }

    /// Prefix of an embedded entity, e.g. `position#2`.
    pub fn display_prefix(&self, key: &EntityKey) -> Option<String> {
        self.load.display_prefix(key, self.metadata())
    }

    /// Name of the pseudo attribute shown for an insert without attributes.
    pub fn insert_marker_name(&self, key: &EntityKey) -> String {
        self.display_prefix(key)
            .or_else(|| {
                self.metadata()
                    .entity_type(&key.type_name)
                    .and_then(|t| t.property_prefix.clone())
            })
            .unwrap_or_else(|| simple_type_name(&key.type_name).to_string())
    }
}

/// Per-entity-type conversion of stored records into view models. Every
/// method has a default; adapters override what they need.
pub trait HistoryAdapter: Send + Sync {
    fn convert_record(&self, record: &HistoryRecord, ctx: &ConversionContext<'_>) -> Result<DisplayRecord> {
        Ok(default_display_record(record, ctx))
    }

    /// `None` hides the attribute.
    fn convert_attribute(
        &self,
        record: &HistoryRecord,
        attr: &AttributeDiff,
        ctx: &ConversionContext<'_>,
    ) -> Result<Option<DisplayAttribute>> {
        Ok(Some(default_display_attribute(record, attr, ctx)))
    }

    fn customize_display_record(
        &self,
        _display: &mut DisplayRecord,
        _record: &HistoryRecord,
        _ctx: &ConversionContext<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Hooks of the component that owns an entity type, run after the
/// adapter for the same item.
pub trait OwnerHooks: Send + Sync {
    fn customize_attribute(
        &self,
        _display: &mut DisplayAttribute,
        _attr: &AttributeDiff,
        _ctx: &ConversionContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn customize_record(
        &self,
        _display: &mut DisplayRecord,
        _record: &HistoryRecord,
        _ctx: &ConversionContext<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

pub struct DefaultAdapter;

impl HistoryAdapter for DefaultAdapter {}

pub fn default_display_record(record: &HistoryRecord, ctx: &ConversionContext<'_>) -> DisplayRecord {
    DisplayRecord {
        record_id: record.id,
        entity: record.entity_key(),
        entity_display_name: ctx
            .load
            .display_name_or_placeholder(&record.entity_type_name, record.entity_id),
        operation: record.operation,
        operation_label: ctx.translator.operation_label(record.operation),
        modified_by: record.modified_by,
        modified_at: record.modified_at,
        user_comment: record.user_comment.clone(),
        attributes: Vec::new(),
    }
}

pub fn default_display_attribute(
    record: &HistoryRecord,
    attr: &AttributeDiff,
    ctx: &ConversionContext<'_>,
) -> DisplayAttribute {
    let label = ctx
        .translator
        .property_label(&record.entity_type_name, &attr.property_name);
    let display_property_name = match ctx.display_prefix(&record.entity_key()) {
        Some(prefix) if label.trim().is_empty() => prefix,
        Some(prefix) => format!("{}:{}", prefix, label),
        None => label,
    };
    let operation = attr.op_type.as_operation().unwrap_or(record.operation);
    let type_name = attr.value_type_name.as_deref();

    DisplayAttribute {
        attribute_id: attr.id,
        record_id: record.id,
        property_name: attr.property_name.clone(),
        display_property_name,
        op_type: attr.op_type,
        operation_label: ctx.translator.operation_label(operation),
        old_value: ctx.format_value(type_name, attr.old_value.as_deref()),
        new_value: ctx.format_value(type_name, attr.new_value.as_deref()),
        value_type_name: attr.value_type_name.clone(),
    }
}

/// Adapters and owner hooks keyed by entity type name. Types without an
/// adapter use `DefaultAdapter`.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn HistoryAdapter>>,
    hooks: HashMap<String, Arc<dyn OwnerHooks>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_adapter(&mut self, type_name: &str, adapter: Arc<dyn HistoryAdapter>) -> Result<()> {
        if self.adapters.contains_key(type_name) {
            return Err(HistoryError::DuplicateRegistration(type_name.to_string()).into());
        }
        log::debug!("Registering history adapter for '{}'", type_name);
        self.adapters.insert(type_name.to_string(), adapter);
        Ok(())
    }

    pub fn register_hooks(&mut self, type_name: &str, hooks: Arc<dyn OwnerHooks>) -> Result<()> {
        if self.hooks.contains_key(type_name) {
            return Err(HistoryError::DuplicateRegistration(type_name.to_string()).into());
        }
        self.hooks.insert(type_name.to_string(), hooks);
        Ok(())
    }

    pub fn adapter_for(&self, type_name: &str) -> &dyn HistoryAdapter {
        match self.adapters.get(type_name) {
            Some(adapter) => adapter.as_ref(),
            None => &DefaultAdapter,
        }
    }

    pub fn hooks_for(&self, type_name: &str) -> Option<&dyn OwnerHooks> {
        self.hooks.get(type_name).map(|h| h.as_ref())
    }
}
