use std::cmp::Reverse;

use anyhow::Result;

use super::adapter::{AdapterRegistry, ConversionContext};
use super::merge::merge_into;
use super::translator::Translator;
use super::types::{DisplayAttribute, DisplayRecord, FlatDisplay};
use crate::db::{HistoryRecord, OpType, Operation};
use crate::error::HistoryError;
use crate::load::LoadContext;
use crate::values::ValueTypeRegistry;

/// Turns loaded records into display records.
///
/// Per record the steps run in this order: adapter `convert_record`; for
/// each attribute adapter `convert_attribute` then owner
/// `customize_attribute`; the insert marker for an insert without
/// attributes; adapter `customize_display_record`; owner
/// `customize_record`.
pub struct DisplayPipeline<'a> {
    adapters: &'a AdapterRegistry,
    values: &'a ValueTypeRegistry,
    translator: &'a dyn Translator,
}

impl<'a> DisplayPipeline<'a> {
    pub fn new(adapters: &'a AdapterRegistry, values: &'a ValueTypeRegistry, translator: &'a dyn Translator) -> Self {
        Self {
            adapters,
            values,
            translator,
        }
    }

    fn context<'c>(&'c self, load: &'c LoadContext) -> ConversionContext<'c> {
        ConversionContext {
            load,
            values: self.values,
            translator: self.translator,
        }
    }

    pub fn convert_record(&self, record: &HistoryRecord, load: &LoadContext) -> Result<DisplayRecord> {
        let ctx = self.context(load);
        let adapter = self.adapters.adapter_for(&record.entity_type_name);
        let hooks = self.adapters.hooks_for(&record.entity_type_name);

        let mut display = adapter.convert_record(record, &ctx)?;
        for attr in &record.attributes {
            if attr.parent_id != record.id {
                return Err(HistoryError::IllegalState(format!(
                    "attribute {:?} '{}' belongs to record {}, not to record {}",
                    attr.id, attr.property_name, attr.parent_id, record.id
                ))
                .into());
            }
            let Some(mut converted) = adapter.convert_attribute(record, attr, &ctx)? else {
                continue;
            };
            if let Some(hooks) = hooks {
                hooks.customize_attribute(&mut converted, attr, &ctx)?;
            }
            display.attributes.push(converted);
        }

        if record.operation == Operation::Insert && record.attributes.is_empty() {
            display.attributes.push(insert_marker(record, &ctx));
        }

        adapter.customize_display_record(&mut display, record, &ctx)?;
        if let Some(hooks) = hooks {
            hooks.customize_record(&mut display, record, &ctx)?;
        }
        Ok(display)
    }

    /// All records of `load`, newest first. Records written in the same
    /// millisecond are ordered by descending id.
    pub fn render(&self, load: &LoadContext) -> Result<Vec<DisplayRecord>> {
        let mut records: Vec<&HistoryRecord> = load.records().collect();
        records.sort_by_key(|r| Reverse((r.modified_at, r.id)));
        log::debug!("rendering {} history records", records.len());
        records
            .into_iter()
            .map(|record| self.convert_record(record, load))
            .collect()
    }

    /// `render` as one row per (record, attribute), without duplicates.
    pub fn render_flat(&self, load: &LoadContext) -> Result<Vec<FlatDisplay>> {
        let mut rows = Vec::new();
        for display in self.render(load)? {
            merge_into(&mut rows, display.flatten());
        }
        Ok(rows)
    }
}

/// Stands in for the attributes of an insert that captured none, so the
/// creation still shows up as a row.
fn insert_marker(record: &HistoryRecord, ctx: &ConversionContext<'_>) -> DisplayAttribute {
    let label = ctx.translator.operation_label(Operation::Insert);
    let name = ctx.insert_marker_name(&record.entity_key());
    DisplayAttribute {
        attribute_id: None,
        record_id: record.id,
        property_name: name.clone(),
        display_property_name: name,
        op_type: OpType::Insert,
        operation_label: label.clone(),
        old_value: None,
        new_value: Some(label),
        value_type_name: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::config::HistoryConfig;
    use crate::db::{AttributeDiff, EntityKey};
    use crate::display::{HistoryAdapter, MapTranslator, NoTranslation, OwnerHooks};
    use crate::load::{EntityType, ParentLink, StaticMetadata};

    const EMPLOYEE: &str = "com.acme.erp.Employee";
    const ORDER: &str = "com.acme.erp.Order";
    const POSITION: &str = "com.acme.erp.Position";

    fn values() -> Result<ValueTypeRegistry> {
        let metadata = StaticMetadata::new()
            .with_type(EntityType::new(EMPLOYEE))
            .with_type(EntityType::new(ORDER).with_relation("positions", POSITION))
            .with_type(EntityType::new(POSITION).with_prefix("position"));
        let mut values = ValueTypeRegistry::with_defaults(&HistoryConfig::default(), Arc::new(metadata))?;
        values.register_enum("com.acme.erp.EmployeeStatus", false)?;
        values.register_enum("com.acme.erp.OrderState", true)?;
        Ok(values)
    }

    fn record(id: i64, type_name: &str, entity_id: i64, operation: Operation, millis: i64) -> HistoryRecord {
        HistoryRecord {
            id,
            entity_type_name: type_name.to_string(),
            entity_id,
            operation,
            modified_by: 1,
            modified_at: Utc.timestamp_millis_opt(millis).unwrap(),
            user_comment: None,
            attributes: Vec::new(),
        }
    }

    fn attr(id: i64, parent_id: i64, name: &str, old: Option<&str>, new: Option<&str>, type_name: &str) -> AttributeDiff {
        AttributeDiff {
            id: Some(id),
            parent_id,
            property_name: name.to_string(),
            op_type: OpType::Undefined,
            old_value: old.map(str::to_string),
            new_value: new.map(str::to_string),
            value_type_name: Some(type_name.to_string()),
        }
    }

    #[test]
    fn enum_update_renders_plain_constants() -> Result<()> {
        let values = values()?;
        let adapters = AdapterRegistry::new();
        let pipeline = DisplayPipeline::new(&adapters, &values, &NoTranslation);
        let mut update = record(1, EMPLOYEE, 3, Operation::Update, 1_000);
        update.attributes.push(attr(10, 1, "status", Some("ACTIVE"), Some("INACTIVE"), "com.acme.erp.EmployeeStatus"));
        let mut load = LoadContext::for_root(EMPLOYEE, 3);
        load.merge_records(vec![update]);

        let rendered = pipeline.render(&load)?;
        assert_eq!(rendered.len(), 1);
        let status = &rendered[0].attributes[0];
        assert_eq!(status.operation_label, "updated");
        assert_eq!(status.old_value.as_deref(), Some("ACTIVE"));
        assert_eq!(status.new_value.as_deref(), Some("INACTIVE"));
        assert_eq!(status.display_property_name, "status");
        Ok(())
    }

    #[test]
    fn empty_insert_gets_one_marker_attribute() -> Result<()> {
        let values = values()?;
        let adapters = AdapterRegistry::new();
        let translator = MapTranslator::new().with("history.operation.Insert", "created");
        let pipeline = DisplayPipeline::new(&adapters, &values, &translator);
        let mut load = LoadContext::for_root(POSITION, 42);
        load.merge_records(vec![record(1, POSITION, 42, Operation::Insert, 1_000)]);

        let rendered = pipeline.render(&load)?;
        let attributes = &rendered[0].attributes;
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].display_property_name, "position");
        assert_eq!(attributes[0].new_value.as_deref(), Some("created"));
        assert_eq!(attributes[0].attribute_id, None);
        Ok(())
    }

    #[test]
    fn marker_uses_embedded_prefix_or_simple_name() -> Result<()> {
        let values = values()?;
        let adapters = AdapterRegistry::new();
        let pipeline = DisplayPipeline::new(&adapters, &values, &NoTranslation);
        let mut load = LoadContext::for_root(ORDER, 1);
        load.set_parent(
            EntityKey::new(POSITION, 42),
            ParentLink { parent: EntityKey::new(ORDER, 1), relation: "positions".to_string(), index: 2 },
        );
        load.merge_records(vec![
            record(1, ORDER, 1, Operation::Insert, 1_000),
            record(2, POSITION, 42, Operation::Insert, 2_000),
        ]);

        let rendered = pipeline.render(&load)?;
        assert_eq!(rendered[0].attributes[0].display_property_name, "position#2");
        assert_eq!(rendered[1].attributes[0].display_property_name, "Order");
        assert_eq!(rendered[1].attributes[0].new_value.as_deref(), Some("inserted"));
        Ok(())
    }

    #[test]
    fn embedded_attributes_are_prefixed() -> Result<()> {
        let values = values()?;
        let adapters = AdapterRegistry::new();
        let translator = MapTranslator::new().with("Position.quantity", "Quantity");
        let pipeline = DisplayPipeline::new(&adapters, &values, &translator);
        let mut load = LoadContext::for_root(ORDER, 1);
        load.set_parent(
            EntityKey::new(POSITION, 43),
            ParentLink { parent: EntityKey::new(ORDER, 1), relation: "positions".to_string(), index: 2 },
        );
        let mut update = record(5, POSITION, 43, Operation::Update, 1_000);
        update.attributes.push(attr(50, 5, "quantity", Some("1"), Some("3"), "int"));
        update.attributes.push(attr(51, 5, " ", None, Some("x"), "java.lang.String"));
        load.merge_records(vec![update]);

        let rendered = pipeline.render(&load)?;
        assert_eq!(rendered[0].attributes[0].display_property_name, "position#2:Quantity");
        assert_eq!(rendered[0].attributes[1].display_property_name, "position#2");
        Ok(())
    }

    #[test]
    fn entity_references_use_loaded_names() -> Result<()> {
        let values = values()?;
        let adapters = AdapterRegistry::new();
        let pipeline = DisplayPipeline::new(&adapters, &values, &NoTranslation);
        let mut load = LoadContext::for_root(ORDER, 1);
        load.set_display_name(EntityKey::new(POSITION, 42), "Screws".to_string());
        let mut update = record(1, ORDER, 1, Operation::Update, 1_000);
        update.attributes.push(attr(10, 1, "positions", Some("44"), Some("42,43"), POSITION));
        update.attributes.push(attr(11, 1, "state", Some("OPEN"), Some("SHIPPED"), "com.acme.erp.OrderState"));
        load.merge_records(vec![update]);

        let translator = MapTranslator::new().with("OrderState.SHIPPED", "shipped");
        let pipeline_i18n = DisplayPipeline::new(&adapters, &values, &translator);
        let rendered = pipeline.render(&load)?;
        let positions = &rendered[0].attributes[0];
        assert_eq!(positions.old_value.as_deref(), Some("Position#44"));
        assert_eq!(positions.new_value.as_deref(), Some("Screws, Position#43"));
        let state = &pipeline_i18n.render(&load)?[0].attributes[1];
        assert_eq!(state.old_value.as_deref(), Some("OPEN"));
        assert_eq!(state.new_value.as_deref(), Some("shipped"));
        assert_eq!(rendered[0].entity_display_name, "Order#1");
        Ok(())
    }

    #[test]
    fn newest_records_first() -> Result<()> {
        let values = values()?;
        let adapters = AdapterRegistry::new();
        let pipeline = DisplayPipeline::new(&adapters, &values, &NoTranslation);
        let mut load = LoadContext::for_root(ORDER, 1);
        load.merge_records(vec![
            record(1, ORDER, 1, Operation::Insert, 1_000),
            record(2, ORDER, 1, Operation::Update, 3_000),
            record(3, ORDER, 1, Operation::Update, 2_000),
            record(4, ORDER, 1, Operation::Update, 3_000),
        ]);
        let ids: Vec<_> = pipeline.render(&load)?.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
        Ok(())
    }

    #[test]
    fn foreign_attribute_is_illegal_state() -> Result<()> {
        let values = values()?;
        let adapters = AdapterRegistry::new();
        let pipeline = DisplayPipeline::new(&adapters, &values, &NoTranslation);
        let mut update = record(1, ORDER, 1, Operation::Update, 1_000);
        update.attributes.push(attr(10, 2, "note", None, Some("x"), "java.lang.String"));
        let load = LoadContext::for_root(ORDER, 1);
        let err = pipeline.convert_record(&update, &load).unwrap_err();
        assert!(matches!(err.downcast_ref::<HistoryError>(), Some(HistoryError::IllegalState(_))));
        Ok(())
    }

    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn push(&self, step: &str) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(format!("{}:{}", self.name, step));
            }
        }
    }

    impl HistoryAdapter for Recorder {
        fn convert_record(&self, record: &HistoryRecord, ctx: &ConversionContext<'_>) -> Result<DisplayRecord> {
            self.push("record");
            Ok(crate::display::default_display_record(record, ctx))
        }

        fn convert_attribute(
            &self,
            record: &HistoryRecord,
            attr: &AttributeDiff,
            ctx: &ConversionContext<'_>,
        ) -> Result<Option<DisplayAttribute>> {
            self.push(&attr.property_name);
            if attr.property_name == "secret" {
                return Ok(None);
            }
            Ok(Some(crate::display::default_display_attribute(record, attr, ctx)))
        }

        fn customize_display_record(
            &self,
            _display: &mut DisplayRecord,
            _record: &HistoryRecord,
            _ctx: &ConversionContext<'_>,
        ) -> Result<()> {
            self.push("customize");
            Ok(())
        }
    }

    impl OwnerHooks for Recorder {
        fn customize_attribute(
            &self,
            display: &mut DisplayAttribute,
            attr: &AttributeDiff,
            _ctx: &ConversionContext<'_>,
        ) -> Result<()> {
            self.push(&attr.property_name);
            display.display_property_name = display.display_property_name.to_uppercase();
            Ok(())
        }

        fn customize_record(
            &self,
            display: &mut DisplayRecord,
            _record: &HistoryRecord,
            _ctx: &ConversionContext<'_>,
        ) -> Result<()> {
            self.push("record");
            display.user_comment = Some("checked".to_string());
            Ok(())
        }
    }

    #[test]
    fn hooks_run_in_order() -> Result<()> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut adapters = AdapterRegistry::new();
        adapters.register_adapter(EMPLOYEE, Arc::new(Recorder { name: "adapter", calls: calls.clone() }))?;
        adapters.register_hooks(EMPLOYEE, Arc::new(Recorder { name: "owner", calls: calls.clone() }))?;
        let values = values()?;
        let pipeline = DisplayPipeline::new(&adapters, &values, &NoTranslation);

        let mut update = record(1, EMPLOYEE, 3, Operation::Update, 1_000);
        update.attributes.push(attr(10, 1, "name", Some("A"), Some("B"), "java.lang.String"));
        update.attributes.push(attr(11, 1, "secret", None, Some("x"), "java.lang.String"));
        let display = pipeline.convert_record(&update, &LoadContext::for_root(EMPLOYEE, 3))?;

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["adapter:record", "adapter:name", "owner:name", "adapter:secret", "adapter:customize", "owner:record"]
        );
        assert_eq!(display.attributes.len(), 1);
        assert_eq!(display.attributes[0].display_property_name, "NAME");
        assert_eq!(display.user_comment.as_deref(), Some("checked"));
        Ok(())
    }

    #[test]
    fn duplicate_adapter_registration_fails() -> Result<()> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut adapters = AdapterRegistry::new();
        adapters.register_adapter(EMPLOYEE, Arc::new(Recorder { name: "a", calls: calls.clone() }))?;
        assert!(adapters
            .register_adapter(EMPLOYEE, Arc::new(Recorder { name: "b", calls }))
            .is_err());
        Ok(())
    }

    #[test]
    fn flat_rows_are_deduplicated() -> Result<()> {
        let values = values()?;
        let adapters = AdapterRegistry::new();
        let pipeline = DisplayPipeline::new(&adapters, &values, &NoTranslation);
        let mut update = record(2, ORDER, 1, Operation::Update, 2_000);
        update.attributes.push(attr(20, 2, "note", None, Some("x"), "java.lang.String"));
        update.attributes.push(attr(21, 2, "due", None, Some("2024-02-01"), "java.sql.Date"));
        let mut load = LoadContext::for_root(ORDER, 1);
        load.merge_records(vec![record(1, ORDER, 1, Operation::Update, 1_000), update]);

        let rows = pipeline.render_flat(&load)?;
        let keys: Vec<_> = rows.iter().map(FlatDisplay::dedup_key).collect();
        assert_eq!(keys, vec![(2, Some(20)), (2, Some(21)), (1, None)]);
        Ok(())
    }
}
