//! Attribute-level diffs between two snapshots of an entity.
//!
//! Snapshots are `serde_json` objects with a numeric `id`. Scalars are
//! stored in their base type's string form; one-to-many relations declared
//! in the entity metadata are stored as id lists, removed ids in
//! `old_value` and added ids in `new_value`.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::db::{NewAttribute, NewRecord, OpType, Operation};
use crate::load::EntityMetadata;
use crate::values::type_names;

const ID: &str = "id";
const DELETED: &str = "deleted";

/// Who made a change and when, plus what is needed to encode it.
pub struct CaptureContext<'a> {
    pub metadata: &'a dyn EntityMetadata,
    pub separator: char,
    pub modified_by: i64,
    pub modified_at: DateTime<Utc>,
    pub user_comment: Option<String>,
}

/// Diffs `old` against `new`. `None` for `old` is an insert, `None` for
/// `new` a delete. A flip of the `deleted` flag is a MarkDeleted or
/// UnmarkDeleted record. Returns `None` when an update changed nothing.
pub fn diff_snapshots(
    entity_type_name: &str,
    old: Option<&Value>,
    new: Option<&Value>,
    ctx: &CaptureContext<'_>,
) -> Result<Option<NewRecord>> {
    let Some(snapshot) = new.or(old) else {
        return Ok(None);
    };
    let entity_id = snapshot
        .get(ID)
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow::anyhow!("Snapshot of {} has no numeric id", entity_type_name))?;
    let entity_type = ctx.metadata.entity_type(entity_type_name);

    let empty = serde_json::Map::new();
    let old_obj = old.and_then(Value::as_object).unwrap_or(&empty);
    let new_obj = new.and_then(Value::as_object).unwrap_or(&empty);

    let operation = match (old, new) {
        (None, _) => Operation::Insert,
        (_, None) => Operation::Delete,
        _ => match (is_deleted(old_obj), is_deleted(new_obj)) {
            (false, true) => Operation::MarkDeleted,
            (true, false) => Operation::UnmarkDeleted,
            _ => Operation::Update,
        },
    };
    let op_type = match operation {
        Operation::Insert => OpType::Insert,
        Operation::Delete => OpType::Delete,
        _ => OpType::Update,
    };

    let mut keys: BTreeSet<&String> = old_obj.keys().collect();
    keys.extend(new_obj.keys());

    let mut attributes = Vec::new();
    for key in keys {
        if key == ID || key == DELETED {
            continue;
        }
        let old_val = old_obj.get(key).filter(|v| !v.is_null());
        let new_val = new_obj.get(key).filter(|v| !v.is_null());
        if old_val == new_val {
            continue;
        }

        let relation = entity_type.and_then(|t| t.relation(key));
        let attribute = match relation {
            Some(relation) => {
                let before = member_ids(old_val);
                let after = member_ids(new_val);
                let removed: Vec<i64> = before.difference(&after).copied().collect();
                let added: Vec<i64> = after.difference(&before).copied().collect();
                if removed.is_empty() && added.is_empty() {
                    continue;
                }
                NewAttribute {
                    property_name: key.clone(),
                    op_type,
                    old_value: join_ids(&removed, ctx.separator),
                    new_value: join_ids(&added, ctx.separator),
                    value_type_name: Some(relation.target_type.clone()),
                }
            }
            None => NewAttribute {
                property_name: key.clone(),
                op_type,
                old_value: old_val.map(scalar_string),
                new_value: new_val.map(scalar_string),
                value_type_name: scalar_type(new_val.or(old_val)),
            },
        };
        attributes.push(attribute);
    }

    if operation == Operation::Update && attributes.is_empty() {
        log::debug!("No changes on {} {}, nothing captured", entity_type_name, entity_id);
        return Ok(None);
    }

    Ok(Some(NewRecord {
        entity_type_name: entity_type_name.to_string(),
        entity_id,
        operation,
        modified_by: ctx.modified_by,
        modified_at: ctx.modified_at,
        user_comment: ctx.user_comment.clone(),
        attributes,
    }))
}

fn is_deleted(obj: &serde_json::Map<String, Value>) -> bool {
    obj.get(DELETED).and_then(Value::as_bool).unwrap_or(false)
}

/// Ids of a relation value: an array of ids or of objects carrying `id`.
fn member_ids(value: Option<&Value>) -> BTreeSet<i64> {
    let Some(Value::Array(items)) = value else {
        return BTreeSet::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(obj) => obj.get(ID).and_then(Value::as_i64),
            other => other.as_i64(),
        })
        .collect()
}

fn join_ids(ids: &[i64], separator: char) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    Some(
        ids.iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(&separator.to_string()),
    )
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scalar_type(value: Option<&Value>) -> Option<String> {
    let type_name = match value? {
        Value::Bool(_) => type_names::BOOLEAN,
        Value::Number(n) if n.is_i64() || n.is_u64() => type_names::LONG,
        Value::Number(_) => type_names::BIG_DECIMAL,
        Value::String(_) => type_names::STRING,
        _ => return None,
    };
    Some(type_name.to_string())
}
