use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of mutation a history record captured.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    MarkDeleted,
    UnmarkDeleted,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "Insert",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
            Operation::MarkDeleted => "MarkDeleted",
            Operation::UnmarkDeleted => "UnmarkDeleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Insert" => Some(Operation::Insert),
            "Update" => Some(Operation::Update),
            "Delete" => Some(Operation::Delete),
            "MarkDeleted" => Some(Operation::MarkDeleted),
            "UnmarkDeleted" => Some(Operation::UnmarkDeleted),
            _ => None,
        }
    }

    /// Label used when no translation is configured.
    pub fn default_label(&self) -> &'static str {
        match self {
            Operation::Insert => "inserted",
            Operation::Update => "updated",
            Operation::Delete => "deleted",
            Operation::MarkDeleted => "marked deleted",
            Operation::UnmarkDeleted => "unmarked deleted",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-attribute operation. Older data often carries `Undefined`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum OpType {
    #[default]
    Undefined,
    Insert,
    Update,
    Delete,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Undefined => "Undefined",
            OpType::Insert => "Insert",
            OpType::Update => "Update",
            OpType::Delete => "Delete",
        }
    }

    /// Unrecognized names map to `Undefined`.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "Insert" => OpType::Insert,
            "Update" => OpType::Update,
            "Delete" => OpType::Delete,
            _ => OpType::Undefined,
        }
    }

    pub fn as_operation(&self) -> Option<Operation> {
        match self {
            OpType::Undefined => None,
            OpType::Insert => Some(Operation::Insert),
            OpType::Update => Some(Operation::Update),
            OpType::Delete => Some(Operation::Delete),
        }
    }
}

/// One captured mutation event of a tracked entity. Immutable once stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub entity_type_name: String,
    pub entity_id: i64,
    pub operation: Operation,
    pub modified_by: i64,
    pub modified_at: DateTime<Utc>,
    pub user_comment: Option<String>,
    pub attributes: Vec<AttributeDiff>,
}

impl HistoryRecord {
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(&self.entity_type_name, self.entity_id)
    }
}

/// One changed property within a record. `old_value` and `new_value` are
/// opaque until `value_type_name` is resolved through the value registry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct AttributeDiff {
    pub id: Option<i64>,
    pub parent_id: i64,
    pub property_name: String,
    pub op_type: OpType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub value_type_name: Option<String>,
}

/// Identifies a tracked entity across all of its records.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub type_name: String,
    pub id: i64,
}

impl EntityKey {
    pub fn new(type_name: &str, id: i64) -> Self {
        Self {
            type_name: type_name.to_string(),
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id)
    }
}

/// Write-side shape of a record; ids are assigned by storage.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewRecord {
    pub entity_type_name: String,
    pub entity_id: i64,
    pub operation: Operation,
    pub modified_by: i64,
    pub modified_at: DateTime<Utc>,
    pub user_comment: Option<String>,
    pub attributes: Vec<NewAttribute>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct NewAttribute {
    pub property_name: String,
    pub op_type: OpType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub value_type_name: Option<String>,
}

impl NewAttribute {
    pub fn new(property_name: &str, value_type_name: &str) -> Self {
        Self {
            property_name: property_name.to_string(),
            value_type_name: Some(value_type_name.to_string()),
            ..Default::default()
        }
    }

    pub fn op(mut self, op_type: OpType) -> Self {
        self.op_type = op_type;
        self
    }

    pub fn old(mut self, value: &str) -> Self {
        self.old_value = Some(value.to_string());
        self
    }

    pub fn new_value(mut self, value: &str) -> Self {
        self.new_value = Some(value.to_string());
        self
    }
}
