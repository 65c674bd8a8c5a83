use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::db::{EntityKey, HistoryRecord};
use crate::values::simple_type_name;

use super::EntityMetadata;

/// Where an embedded entity hangs below its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentLink {
    pub parent: EntityKey,
    /// Relation property on the parent, e.g. `positions`.
    pub relation: String,
    /// 1-based position among the parent's members of that relation.
    pub index: usize,
}

/// Request-scoped accumulator filled by the loader and read by the display
/// pipeline. Never shared between requests.
#[derive(Clone, Debug, Default)]
pub struct LoadContext {
    root: Option<EntityKey>,
    records: BTreeMap<i64, HistoryRecord>,
    loaded: HashMap<String, BTreeSet<i64>>,
    names: HashMap<EntityKey, String>,
    parents: HashMap<EntityKey, ParentLink>,
}

impl LoadContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_root(type_name: &str, id: i64) -> Self {
        Self {
            root: Some(EntityKey::new(type_name, id)),
            ..Default::default()
        }
    }

    pub fn root(&self) -> Option<&EntityKey> {
        self.root.as_ref()
    }

    /// Adds records whose id is not present yet. Returns how many were
    /// added.
    pub fn merge_records<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = HistoryRecord>,
    {
        let mut added = 0;
        for record in records {
            if self.records.contains_key(&record.id) {
                continue;
            }
            self.records.insert(record.id, record);
            added += 1;
        }
        added
    }

    /// Records ordered by id.
    pub fn records(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.values()
    }

    pub fn record(&self, id: i64) -> Option<&HistoryRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Marks `ids` of `type_name` as loaded and returns the ones that were
    /// not loaded before.
    pub fn claim_ids(&mut self, type_name: &str, ids: &BTreeSet<i64>) -> BTreeSet<i64> {
        let loaded = self.loaded.entry(type_name.to_string()).or_default();
        ids.iter().copied().filter(|id| loaded.insert(*id)).collect()
    }

    pub fn is_loaded(&self, type_name: &str, id: i64) -> bool {
        self.loaded.get(type_name).is_some_and(|ids| ids.contains(&id))
    }

    pub fn loaded_types(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }

    pub fn set_display_name(&mut self, key: EntityKey, name: String) {
        self.names.insert(key, name);
    }

    pub fn has_display_name(&self, type_name: &str, id: i64) -> bool {
        self.names.contains_key(&EntityKey::new(type_name, id))
    }

    pub fn display_name(&self, type_name: &str, id: i64) -> Option<&str> {
        self.names
            .get(&EntityKey::new(type_name, id))
            .map(String::as_str)
    }

    /// The loaded display name, or `Simple#id`.
    pub fn display_name_or_placeholder(&self, type_name: &str, id: i64) -> String {
        match self.display_name(type_name, id) {
            Some(name) => name.to_string(),
            None => placeholder_name(type_name, id),
        }
    }

    /// Records the first parent an embedded entity was discovered under;
    /// later discoveries keep the first link.
    pub fn set_parent(&mut self, child: EntityKey, link: ParentLink) {
        if Some(&child) == self.root.as_ref() {
            return;
        }
        self.parents.entry(child).or_insert(link);
    }

    pub fn parent(&self, key: &EntityKey) -> Option<&ParentLink> {
        self.parents.get(key)
    }

    /// Prefix for display property names of an embedded entity, e.g.
    /// `position#2` or `position#2.delivery#1`. `None` for the root and
    /// for entities without a parent link.
    pub fn display_prefix(&self, key: &EntityKey, metadata: &dyn EntityMetadata) -> Option<String> {
        let mut segments = Vec::new();
        let mut visited = HashSet::new();
        let mut current = key.clone();
        while let Some(link) = self.parents.get(&current) {
            if !visited.insert(current.clone()) {
                break;
            }
            let prefix = metadata
                .entity_type(&current.type_name)
                .and_then(|t| t.property_prefix.clone())
                .unwrap_or_else(|| link.relation.clone());
            segments.push(format!("{}#{}", prefix, link.index));
            current = link.parent.clone();
        }
        if segments.is_empty() {
            return None;
        }
        segments.reverse();
        Some(segments.join("."))
    }
}

pub fn placeholder_name(type_name: &str, id: i64) -> String {
    format!("{}#{}", simple_type_name(type_name), id)
}
