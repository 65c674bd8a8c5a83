use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;

use super::core::Db;
use super::types::{AttributeDiff, HistoryRecord, NewRecord, OpType, Operation};
use crate::capture::{diff_snapshots, CaptureContext};
use crate::load::HistoryRepository;

#[derive(Deserialize)]
struct RecordRow {
    id: i64,
    entity_type_name: String,
    entity_id: i64,
    operation: String,
    modified_by: i64,
    modified_at: i64,
    user_comment: Option<String>,
}

#[derive(Deserialize)]
struct AttributeRow {
    id: i64,
    parent_record_id: i64,
    property_name: String,
    op_type: String,
    old_value: Option<String>,
    new_value: Option<String>,
    value_type_name: Option<String>,
}

impl From<AttributeRow> for AttributeDiff {
    fn from(row: AttributeRow) -> Self {
        AttributeDiff {
            id: Some(row.id),
            parent_id: row.parent_record_id,
            property_name: row.property_name,
            op_type: OpType::parse(&row.op_type),
            old_value: row.old_value,
            new_value: row.new_value,
            value_type_name: row.value_type_name,
        }
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Db {
    /// Appends a record and its attributes in one transaction and returns
    /// the stored record with the ids storage assigned.
    pub fn append_record(&self, record: &NewRecord) -> Result<HistoryRecord> {
        self.transaction(|txn| {
            log::debug!(
                "SQL EXECUTE: INSERT INTO history_record (entity_type_name, entity_id, operation, modified_by, modified_at, user_comment) VALUES (?, ?, ?, ?, ?, ?)"
            );
            txn.execute(
                "INSERT INTO history_record (entity_type_name, entity_id, operation, modified_by, modified_at, user_comment) VALUES (?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    record.entity_type_name,
                    record.entity_id,
                    record.operation.as_str(),
                    record.modified_by,
                    record.modified_at.timestamp_millis(),
                    record.user_comment,
                ],
            )?;
            let record_id = txn.last_insert_rowid();

            let mut attributes = Vec::with_capacity(record.attributes.len());
            for attr in &record.attributes {
                txn.execute(
                    "INSERT INTO history_attribute (parent_record_id, property_name, op_type, old_value, new_value, value_type_name) VALUES (?, ?, ?, ?, ?, ?)",
                    rusqlite::params![
                        record_id,
                        attr.property_name,
                        attr.op_type.as_str(),
                        attr.old_value,
                        attr.new_value,
                        attr.value_type_name,
                    ],
                )?;
                attributes.push(AttributeDiff {
                    id: Some(txn.last_insert_rowid()),
                    parent_id: record_id,
                    property_name: attr.property_name.clone(),
                    op_type: attr.op_type,
                    old_value: attr.old_value.clone(),
                    new_value: attr.new_value.clone(),
                    value_type_name: attr.value_type_name.clone(),
                });
            }
            log::debug!(
                "SQL EXECUTE RESULT: record {} with {} attributes",
                record_id,
                attributes.len()
            );

            Ok(HistoryRecord {
                id: record_id,
                entity_type_name: record.entity_type_name.clone(),
                entity_id: record.entity_id,
                operation: record.operation,
                modified_by: record.modified_by,
                modified_at: millis_to_datetime(record.modified_at.timestamp_millis()),
                user_comment: record.user_comment.clone(),
                attributes,
            })
        })
    }

    /// All records of the given entities, each with its attributes in
    /// storage order. Records are ordered by id.
    pub fn find_records(&self, entity_type_name: &str, ids: &BTreeSet<i64>) -> Result<Vec<HistoryRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = ids.iter().copied().collect();

        self.read(|txn| {
            let mut rows = Vec::new();
            for chunk in ids.chunks(self.batch_size()) {
                let sql = format!(
                    "SELECT id, entity_type_name, entity_id, operation, modified_by, modified_at, user_comment
                     FROM history_record
                     WHERE entity_type_name = ? AND entity_id IN ({})
                     ORDER BY id ASC",
                    placeholders(chunk.len())
                );
                log::debug!("SQL QUERY: {} ({} ids)", sql, chunk.len());
                let mut params = vec![SqlValue::Text(entity_type_name.to_string())];
                params.extend(chunk.iter().map(|id| SqlValue::Integer(*id)));

                let mut stmt = txn.prepare(&sql)?;
                let chunk_rows = serde_rusqlite::from_rows::<RecordRow>(
                    stmt.query(rusqlite::params_from_iter(params.iter()))?,
                )
                .collect::<Result<Vec<_>, _>>()?;
                rows.extend(chunk_rows);
            }

            let record_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let mut attributes: BTreeMap<i64, Vec<AttributeDiff>> = BTreeMap::new();
            for chunk in record_ids.chunks(self.batch_size()) {
                let sql = format!(
                    "SELECT id, parent_record_id, property_name, op_type, old_value, new_value, value_type_name
                     FROM history_attribute
                     WHERE parent_record_id IN ({})
                     ORDER BY parent_record_id ASC, id ASC",
                    placeholders(chunk.len())
                );
                let mut stmt = txn.prepare(&sql)?;
                let attr_rows = serde_rusqlite::from_rows::<AttributeRow>(
                    stmt.query(rusqlite::params_from_iter(chunk.iter()))?,
                );
                for row in attr_rows {
                    let attr = AttributeDiff::from(row?);
                    attributes.entry(attr.parent_id).or_default().push(attr);
                }
            }

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let Some(operation) = Operation::parse(&row.operation) else {
                    log::warn!(
                        "Skipping history record {}: unknown operation '{}'",
                        row.id,
                        row.operation
                    );
                    continue;
                };
                records.push(HistoryRecord {
                    id: row.id,
                    entity_type_name: row.entity_type_name,
                    entity_id: row.entity_id,
                    operation,
                    modified_by: row.modified_by,
                    modified_at: millis_to_datetime(row.modified_at),
                    user_comment: row.user_comment,
                    attributes: attributes.remove(&row.id).unwrap_or_default(),
                });
            }
            log::debug!(
                "SQL QUERY RESULT: {} records for {} ({} ids)",
                records.len(),
                entity_type_name,
                ids.len()
            );
            Ok(records)
        })
    }

    pub fn find_records_for_entity(&self, entity_type_name: &str, entity_id: i64) -> Result<Vec<HistoryRecord>> {
        self.find_records(entity_type_name, &BTreeSet::from([entity_id]))
    }

    /// Diffs two snapshots of an entity and appends the resulting record.
    /// `None` when the snapshots do not differ.
    pub fn capture(
        &self,
        entity_type_name: &str,
        old: Option<&serde_json::Value>,
        new: Option<&serde_json::Value>,
        ctx: &CaptureContext<'_>,
    ) -> Result<Option<HistoryRecord>> {
        match diff_snapshots(entity_type_name, old, new, ctx)? {
            Some(record) => Ok(Some(self.append_record(&record)?)),
            None => Ok(None),
        }
    }
}

impl HistoryRepository for Db {
    fn find_records(&self, entity_type_name: &str, ids: &BTreeSet<i64>) -> Result<Vec<HistoryRecord>> {
        Db::find_records(self, entity_type_name, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::NewAttribute;

    fn at(millis: i64) -> DateTime<Utc> {
        millis_to_datetime(millis)
    }

    fn order_update(entity_id: i64, millis: i64) -> NewRecord {
        NewRecord {
            entity_type_name: "com.acme.erp.Order".to_string(),
            entity_id,
            operation: Operation::Update,
            modified_by: 7,
            modified_at: at(millis),
            user_comment: Some("price correction".to_string()),
            attributes: vec![
                NewAttribute::new("amount", "java.math.BigDecimal")
                    .op(OpType::Update)
                    .old("10.00")
                    .new_value("12.50"),
                NewAttribute::new("note", "java.lang.String").op(OpType::Insert).new_value("rush"),
            ],
        }
    }

    #[test]
    fn append_assigns_ids() -> Result<()> {
        let db = Db::open_memory()?;
        let first = db.append_record(&order_update(1, 1_000))?;
        let second = db.append_record(&order_update(1, 2_000))?;
        assert!(second.id > first.id);
        assert_eq!(first.attributes.len(), 2);
        for attr in &first.attributes {
            assert_eq!(attr.parent_id, first.id);
            assert!(attr.id.is_some());
        }
        Ok(())
    }

    #[test]
    fn find_records_round_trips_rows() -> Result<()> {
        let db = Db::open_memory()?;
        let stored = db.append_record(&order_update(1, 1_700_000_000_123))?;
        let found = db.find_records_for_entity("com.acme.erp.Order", 1)?;
        assert_eq!(found, vec![stored]);
        assert_eq!(found[0].modified_at.timestamp_millis(), 1_700_000_000_123);
        Ok(())
    }

    #[test]
    fn find_records_filters_by_type_and_ids() -> Result<()> {
        let db = Db::open_memory()?;
        db.append_record(&order_update(1, 1_000))?;
        db.append_record(&order_update(2, 2_000))?;
        db.append_record(&order_update(3, 3_000))?;
        let mut other = order_update(1, 4_000);
        other.entity_type_name = "com.acme.erp.Invoice".to_string();
        db.append_record(&other)?;

        let found = db.find_records("com.acme.erp.Order", &BTreeSet::from([1, 3]))?;
        let ids: Vec<i64> = found.iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec![1, 3]);
        Ok(())
    }

    #[test]
    fn find_records_chunks_large_id_sets() -> Result<()> {
        let db = Db::open_memory()?.with_batch_size(2);
        for id in 1..=5 {
            db.append_record(&order_update(id, id * 1_000))?;
        }
        let found = db.find_records("com.acme.erp.Order", &(1..=5).collect())?;
        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|r| r.attributes.len() == 2));
        Ok(())
    }

    #[test]
    fn record_without_attributes() -> Result<()> {
        let db = Db::open_memory()?;
        let mut record = order_update(9, 1_000);
        record.operation = Operation::Insert;
        record.attributes.clear();
        db.append_record(&record)?;
        let found = db.find_records_for_entity("com.acme.erp.Order", 9)?;
        assert_eq!(found.len(), 1);
        assert!(found[0].attributes.is_empty());
        Ok(())
    }

    #[test]
    fn capture_appends_only_real_changes() -> Result<()> {
        let db = Db::open_memory()?;
        let metadata = crate::load::StaticMetadata::new();
        let ctx = CaptureContext {
            metadata: &metadata,
            separator: ',',
            modified_by: 3,
            modified_at: at(1_000),
            user_comment: None,
        };
        let v1 = serde_json::json!({ "id": 5, "note": "rush" });
        let v2 = serde_json::json!({ "id": 5, "note": "standard" });
        assert!(db.capture("com.acme.erp.Order", None, Some(&v1), &ctx)?.is_some());
        assert!(db.capture("com.acme.erp.Order", Some(&v1), Some(&v1), &ctx)?.is_none());
        let update = db.capture("com.acme.erp.Order", Some(&v1), Some(&v2), &ctx)?;
        assert_eq!(update.map(|r| r.operation), Some(Operation::Update));
        assert_eq!(db.find_records_for_entity("com.acme.erp.Order", 5)?.len(), 2);
        Ok(())
    }

    #[test]
    fn unknown_operation_rows_are_skipped() -> Result<()> {
        let db = Db::open_memory()?;
        db.append_record(&order_update(1, 1_000))?;
        db.transaction(|txn| {
            txn.execute(
                "INSERT INTO history_record (entity_type_name, entity_id, operation, modified_by, modified_at) VALUES ('com.acme.erp.Order', 1, 'Merge', 1, 5000)",
                [],
            )?;
            Ok(())
        })?;
        let found = db.find_records_for_entity("com.acme.erp.Order", 1)?;
        assert_eq!(found.len(), 1);
        Ok(())
    }
}
