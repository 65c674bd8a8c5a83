use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::db::HistoryRecord;
use crate::error::HistoryError;

/// Source of stored history records.
pub trait HistoryRepository {
    /// All records of the entities `ids` of type `entity_type_name`, in one
    /// round trip per call.
    fn find_records(&self, entity_type_name: &str, ids: &BTreeSet<i64>) -> Result<Vec<HistoryRecord>>;
}

/// Current state of an entity as far as the history engine cares.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct EntitySnapshot {
    pub id: i64,
    pub display_name: Option<String>,
    /// Live members of one-to-many collections, by relation property.
    pub collections: BTreeMap<String, Vec<i64>>,
}

impl EntitySnapshot {
    pub fn new(id: i64, display_name: &str) -> Self {
        Self {
            id,
            display_name: Some(display_name.to_string()),
            collections: BTreeMap::new(),
        }
    }

    pub fn with_collection(mut self, property: &str, ids: &[i64]) -> Self {
        self.collections.insert(property.to_string(), ids.to_vec());
        self
    }
}

/// Batch access to current entity state.
pub trait EntityStore {
    /// Entities of `type_name` with the given ids. Missing ids are simply
    /// absent from the result. A type name that does not resolve yields
    /// `HistoryError::UnknownEntityType`.
    fn find_by_ids(&self, type_name: &str, ids: &BTreeSet<i64>) -> Result<Vec<EntitySnapshot>>;
}

/// Caller-side access check. A denied request renders an empty history.
pub trait AccessPolicy {
    fn can_view(&self, entity_type_name: &str, entity_id: i64) -> bool;
}

pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn can_view(&self, _entity_type_name: &str, _entity_id: i64) -> bool {
        true
    }
}

/// Entity store held in memory. Only types added with `register_type` or
/// `put` resolve.
#[derive(Default)]
pub struct MemoryEntityStore {
    entities: RwLock<HashMap<String, BTreeMap<i64, EntitySnapshot>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_type(&self, type_name: &str) -> Result<()> {
        let mut entities = self
            .entities
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
        entities.entry(type_name.to_string()).or_default();
        Ok(())
    }

    pub fn put(&self, type_name: &str, snapshot: EntitySnapshot) -> Result<()> {
        let mut entities = self
            .entities
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
        entities
            .entry(type_name.to_string())
            .or_default()
            .insert(snapshot.id, snapshot);
        Ok(())
    }

    pub fn remove(&self, type_name: &str, id: i64) -> Result<Option<EntitySnapshot>> {
        let mut entities = self
            .entities
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
        Ok(entities.get_mut(type_name).and_then(|m| m.remove(&id)))
    }
}

impl EntityStore for MemoryEntityStore {
    fn find_by_ids(&self, type_name: &str, ids: &BTreeSet<i64>) -> Result<Vec<EntitySnapshot>> {
        let entities = self
            .entities
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;
        let by_id = entities
            .get(type_name)
            .ok_or_else(|| HistoryError::UnknownEntityType(type_name.to_string()))?;
        Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
    }
}
