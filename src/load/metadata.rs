use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A declared one-to-many relation of an entity type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub property: String,
    pub target_type: String,
}

/// What the history engine needs to know about a tracked entity type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct EntityType {
    pub type_name: String,
    /// Display prefix for members of this type inside a parent's history,
    /// e.g. `position` for order positions.
    pub property_prefix: Option<String>,
    pub relations: Vec<Relation>,
}

impl EntityType {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.property_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_relation(mut self, property: &str, target_type: &str) -> Self {
        self.relations.push(Relation {
            property: property.to_string(),
            target_type: target_type.to_string(),
        });
        self
    }

    pub fn relation(&self, property: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.property == property)
    }
}

/// Entity metadata provider. Returns `None` for type names that do not
/// resolve to a tracked entity type.
pub trait EntityMetadata: Send + Sync {
    fn entity_type(&self, type_name: &str) -> Option<&EntityType>;
}

/// Metadata built up front, e.g. from configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticMetadata {
    types: HashMap<String, EntityType>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, entity_type: EntityType) -> Self {
        self.add(entity_type);
        self
    }

    pub fn add(&mut self, entity_type: EntityType) {
        self.types.insert(entity_type.type_name.clone(), entity_type);
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let types: Vec<EntityType> = serde_json::from_str(json)?;
        let mut metadata = Self::new();
        for entity_type in types {
            metadata.add(entity_type);
        }
        Ok(metadata)
    }
}

impl EntityMetadata for StaticMetadata {
    fn entity_type(&self, type_name: &str) -> Option<&EntityType> {
        self.types.get(type_name)
    }
}
