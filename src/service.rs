use anyhow::Result;

use crate::config::HistoryConfig;
use crate::display::{AdapterRegistry, DisplayPipeline, DisplayRecord, FlatDisplay, Translator};
use crate::legacy::LegacyConverter;
use crate::load::{AccessPolicy, AllowAll, EntityStore, HistoryLoader, HistoryRepository, LoadContext};
use crate::values::ValueTypeRegistry;

/// Entry point for rendering the history of one entity.
///
/// All collaborators are built once at startup and borrowed here; each call
/// gets its own `LoadContext`.
pub struct HistoryService<'a> {
    repository: &'a dyn HistoryRepository,
    store: &'a dyn EntityStore,
    values: &'a ValueTypeRegistry,
    adapters: &'a AdapterRegistry,
    translator: &'a dyn Translator,
    policy: &'a dyn AccessPolicy,
    converter: LegacyConverter,
}

impl<'a> HistoryService<'a> {
    pub fn new(
        config: &HistoryConfig,
        repository: &'a dyn HistoryRepository,
        store: &'a dyn EntityStore,
        values: &'a ValueTypeRegistry,
        adapters: &'a AdapterRegistry,
        translator: &'a dyn Translator,
    ) -> Self {
        Self {
            repository,
            store,
            values,
            adapters,
            translator,
            policy: &AllowAll,
            converter: LegacyConverter::new(config),
        }
    }

    pub fn with_policy(mut self, policy: &'a dyn AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Loads the entity's history together with its embedded objects.
    pub fn load(&self, entity_type_name: &str, entity_id: i64) -> Result<LoadContext> {
        let loader = HistoryLoader::new(
            self.repository,
            self.values.metadata(),
            self.store,
            &self.converter,
            self.values.separator(),
        );
        loader.load(entity_type_name, entity_id)
    }

    /// Rendered history, newest first. Empty when the policy denies access.
    pub fn history_for(&self, entity_type_name: &str, entity_id: i64) -> Result<Vec<DisplayRecord>> {
        if !self.policy.can_view(entity_type_name, entity_id) {
            log::debug!("History of {} {} not visible to caller", entity_type_name, entity_id);
            return Ok(Vec::new());
        }
        let load = self.load(entity_type_name, entity_id)?;
        self.pipeline().render(&load)
    }

    pub fn flat_history_for(&self, entity_type_name: &str, entity_id: i64) -> Result<Vec<FlatDisplay>> {
        if !self.policy.can_view(entity_type_name, entity_id) {
            log::debug!("History of {} {} not visible to caller", entity_type_name, entity_id);
            return Ok(Vec::new());
        }
        let load = self.load(entity_type_name, entity_id)?;
        self.pipeline().render_flat(&load)
    }

    fn pipeline(&self) -> DisplayPipeline<'_> {
        DisplayPipeline::new(self.adapters, self.values, self.translator)
    }
}
