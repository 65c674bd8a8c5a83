use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{EntityKey, OpType, Operation};

/// One attribute of a rendered record. `attribute_id` mirrors the source
/// attribute and is `None` for synthesized attributes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DisplayAttribute {
    pub attribute_id: Option<i64>,
    pub record_id: i64,
    pub property_name: String,
    /// Translated property label, prefixed for embedded objects, e.g.
    /// `position#2:quantity`.
    pub display_property_name: String,
    pub op_type: OpType,
    pub operation_label: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub value_type_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DisplayRecord {
    pub record_id: i64,
    pub entity: EntityKey,
    pub entity_display_name: String,
    pub operation: Operation,
    pub operation_label: String,
    pub modified_by: i64,
    pub modified_at: DateTime<Utc>,
    pub user_comment: Option<String>,
    pub attributes: Vec<DisplayAttribute>,
}

impl DisplayRecord {
    /// One row per attribute; a record without attributes still yields one
    /// row.
    pub fn flatten(&self) -> Vec<FlatDisplay> {
        if self.attributes.is_empty() {
            return vec![self.flat_row(None)];
        }
        self.attributes
            .iter()
            .map(|attr| self.flat_row(Some(attr)))
            .collect()
    }

    fn flat_row(&self, attr: Option<&DisplayAttribute>) -> FlatDisplay {
        FlatDisplay {
            record_id: self.record_id,
            attribute_id: attr.and_then(|a| a.attribute_id),
            entity: self.entity.clone(),
            entity_display_name: self.entity_display_name.clone(),
            operation_label: attr
                .map(|a| a.operation_label.clone())
                .unwrap_or_else(|| self.operation_label.clone()),
            modified_by: self.modified_by,
            modified_at: self.modified_at,
            user_comment: self.user_comment.clone(),
            display_property_name: attr.map(|a| a.display_property_name.clone()),
            old_value: attr.and_then(|a| a.old_value.clone()),
            new_value: attr.and_then(|a| a.new_value.clone()),
        }
    }
}

/// Single-row rendering of one (record, attribute) pair.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlatDisplay {
    pub record_id: i64,
    pub attribute_id: Option<i64>,
    pub entity: EntityKey,
    pub entity_display_name: String,
    pub operation_label: String,
    pub modified_by: i64,
    pub modified_at: DateTime<Utc>,
    pub user_comment: Option<String>,
    pub display_property_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl FlatDisplay {
    pub fn dedup_key(&self) -> (i64, Option<i64>) {
        (self.record_id, self.attribute_id)
    }
}
