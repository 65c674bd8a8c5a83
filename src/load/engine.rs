use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use super::context::{LoadContext, ParentLink};
use super::{EntityMetadata, EntityStore, EntityType, HistoryRepository};
use crate::db::{EntityKey, HistoryRecord};
use crate::error::HistoryError;
use crate::legacy::LegacyConverter;
use crate::values::parse_id_list;

/// type name -> ids, one traversal level.
type Buckets = BTreeMap<String, BTreeSet<i64>>;

/// Members of one parent's relation, in discovery order.
#[derive(Default)]
struct Members {
    live: Vec<i64>,
    diffed: BTreeSet<i64>,
}

impl Members {
    /// Live collection order first, then ids only seen in diffs, ascending.
    fn ordered(&self) -> Vec<i64> {
        let mut ordered: Vec<i64> = Vec::with_capacity(self.live.len() + self.diffed.len());
        for id in &self.live {
            if !ordered.contains(id) {
                ordered.push(*id);
            }
        }
        for id in &self.diffed {
            if !ordered.contains(id) {
                ordered.push(*id);
            }
        }
        ordered
    }
}

fn is_unknown_type(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<HistoryError>(),
        Some(HistoryError::UnknownEntityType(_))
    )
}

/// Loads the history of an entity together with the history of the
/// embedded objects it references, level by level.
///
/// Every level issues at most one history query and one entity query per
/// type. The queue converges because ids are claimed per type in the
/// `LoadContext` and only unclaimed ids are queued again.
pub struct HistoryLoader<'a> {
    repository: &'a dyn HistoryRepository,
    metadata: &'a dyn EntityMetadata,
    store: &'a dyn EntityStore,
    converter: &'a LegacyConverter,
    separator: char,
}

impl<'a> HistoryLoader<'a> {
    pub fn new(
        repository: &'a dyn HistoryRepository,
        metadata: &'a dyn EntityMetadata,
        store: &'a dyn EntityStore,
        converter: &'a LegacyConverter,
        separator: char,
    ) -> Self {
        Self {
            repository,
            metadata,
            store,
            converter,
            separator,
        }
    }

    pub fn load(&self, type_name: &str, id: i64) -> Result<LoadContext> {
        let mut ctx = LoadContext::for_root(type_name, id);
        self.load_into(&mut ctx, type_name, &BTreeSet::from([id]))?;
        Ok(ctx)
    }

    /// Loads `ids` of `type_name` and everything they reference into an
    /// existing context. Records and entities already in `ctx` are skipped.
    pub fn load_into(&self, ctx: &mut LoadContext, type_name: &str, ids: &BTreeSet<i64>) -> Result<()> {
        let mut level: Buckets = BTreeMap::from([(type_name.to_string(), ids.clone())]);
        let mut depth = 0usize;

        while !level.is_empty() {
            log::debug!(
                "history traversal level {}: {} types, {} ids",
                depth,
                level.len(),
                level.values().map(BTreeSet::len).sum::<usize>()
            );
            let mut next: Buckets = BTreeMap::new();
            for (bucket_type, bucket_ids) in &level {
                let result = self.load_bucket(ctx, bucket_type, bucket_ids, depth == 0, &mut next);
                match result {
                    Ok(()) => {}
                    Err(e) if depth > 0 && is_unknown_type(&e) => {
                        log::warn!("Skipping history of {} {:?}: {}", bucket_type, bucket_ids, e);
                    }
                    Err(e) => return Err(e),
                }
            }
            level = next;
            depth += 1;
        }

        self.resolve_reference_names(ctx)
    }

    fn load_bucket(
        &self,
        ctx: &mut LoadContext,
        type_name: &str,
        ids: &BTreeSet<i64>,
        is_root: bool,
        next: &mut Buckets,
    ) -> Result<()> {
        let new_ids = ctx.claim_ids(type_name, ids);
        if new_ids.is_empty() {
            return Ok(());
        }

        let entity_type = self.metadata.entity_type(type_name);
        if entity_type.is_none() {
            if !is_root {
                return Err(HistoryError::UnknownEntityType(type_name.to_string()).into());
            }
            log::warn!("No metadata for {}, loading its history without traversal", type_name);
        }

        let mut records = self.repository.find_records(type_name, &new_ids)?;
        for record in &mut records {
            self.converter.convert_record(record);
        }

        let mut members: BTreeMap<(i64, String), Members> = BTreeMap::new();
        if let Some(entity_type) = entity_type {
            self.collect_diffed_members(entity_type, &records, &mut members);
        }
        let added = ctx.merge_records(records);
        log::debug!("loaded {} new records of {} ({} ids)", added, type_name, new_ids.len());

        match self.store.find_by_ids(type_name, &new_ids) {
            Ok(snapshots) => {
                let mut missing = new_ids.clone();
                for snapshot in snapshots {
                    missing.remove(&snapshot.id);
                    if let Some(name) = snapshot.display_name {
                        ctx.set_display_name(EntityKey::new(type_name, snapshot.id), name);
                    }
                    if let Some(entity_type) = entity_type {
                        for relation in &entity_type.relations {
                            if let Some(live) = snapshot.collections.get(&relation.property) {
                                members
                                    .entry((snapshot.id, relation.property.clone()))
                                    .or_default()
                                    .live
                                    .extend(live.iter().copied());
                            }
                        }
                    }
                }
                for id in missing {
                    log::warn!("{} {} no longer exists, using placeholder name", type_name, id);
                }
            }
            Err(e) if is_unknown_type(&e) => {
                log::warn!("Cannot load current state of {}: {}", type_name, e);
            }
            Err(e) => return Err(e),
        }

        if let Some(entity_type) = entity_type {
            for ((parent_id, property), member) in members {
                let Some(relation) = entity_type.relation(&property) else {
                    continue;
                };
                let parent = EntityKey::new(type_name, parent_id);
                for (position, child_id) in member.ordered().into_iter().enumerate() {
                    ctx.set_parent(
                        EntityKey::new(&relation.target_type, child_id),
                        ParentLink {
                            parent: parent.clone(),
                            relation: property.clone(),
                            index: position + 1,
                        },
                    );
                    next.entry(relation.target_type.clone())
                        .or_default()
                        .insert(child_id);
                }
            }
        }
        Ok(())
    }

    /// Ids that appeared (`new_value`) and disappeared (`old_value`) in
    /// one-to-many relation diffs. Both matter: a removed member's own
    /// history must stay inspectable.
    fn collect_diffed_members(
        &self,
        entity_type: &EntityType,
        records: &[HistoryRecord],
        members: &mut BTreeMap<(i64, String), Members>,
    ) {
        for record in records {
            for attr in &record.attributes {
                let Some(relation) = entity_type.relation(&attr.property_name) else {
                    continue;
                };
                if attr.value_type_name.as_deref() != Some(relation.target_type.as_str()) {
                    continue;
                }
                let member = members
                    .entry((record.entity_id, relation.property.clone()))
                    .or_default();
                for raw in [&attr.old_value, &attr.new_value].into_iter().flatten() {
                    member.diffed.extend(parse_id_list(raw, self.separator));
                }
            }
        }
    }

    /// Fetches display names for entity references (e.g. many-to-one
    /// links) whose history was not loaded. One store call per type.
    fn resolve_reference_names(&self, ctx: &mut LoadContext) -> Result<()> {
        let mut wanted: Buckets = BTreeMap::new();
        for record in ctx.records() {
            for attr in &record.attributes {
                let Some(type_name) = attr.value_type_name.as_deref() else {
                    continue;
                };
                if self.metadata.entity_type(type_name).is_none() {
                    continue;
                }
                for raw in [&attr.old_value, &attr.new_value].into_iter().flatten() {
                    for id in parse_id_list(raw, self.separator) {
                        if !ctx.has_display_name(type_name, id) && !ctx.is_loaded(type_name, id) {
                            wanted.entry(type_name.to_string()).or_default().insert(id);
                        }
                    }
                }
            }
        }

        for (type_name, ids) in wanted {
            match self.store.find_by_ids(&type_name, &ids) {
                Ok(snapshots) => {
                    for snapshot in snapshots {
                        if let Some(name) = snapshot.display_name {
                            ctx.set_display_name(EntityKey::new(&type_name, snapshot.id), name);
                        }
                    }
                }
                Err(e) if is_unknown_type(&e) => {
                    log::warn!("Cannot resolve names of {}: {}", type_name, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::config::HistoryConfig;
    use crate::db::{AttributeDiff, OpType, Operation};
    use crate::load::{EntitySnapshot, MemoryEntityStore, StaticMetadata};

    const ORDER: &str = "com.acme.erp.Order";
    const POSITION: &str = "com.acme.erp.Position";
    const CUSTOMER: &str = "com.acme.erp.Customer";

    /// Records handed out from memory; counts queries per type.
    #[derive(Default)]
    struct FakeRepository {
        records: Vec<HistoryRecord>,
        queries: RefCell<Vec<(String, BTreeSet<i64>)>>,
    }

    impl HistoryRepository for FakeRepository {
        fn find_records(&self, entity_type_name: &str, ids: &BTreeSet<i64>) -> Result<Vec<HistoryRecord>> {
            self.queries
                .borrow_mut()
                .push((entity_type_name.to_string(), ids.clone()));
            Ok(self
                .records
                .iter()
                .filter(|r| r.entity_type_name == entity_type_name && ids.contains(&r.entity_id))
                .cloned()
                .collect())
        }
    }

    struct CountingStore {
        inner: MemoryEntityStore,
        calls: RefCell<Vec<(String, BTreeSet<i64>)>>,
    }

    impl EntityStore for CountingStore {
        fn find_by_ids(&self, type_name: &str, ids: &BTreeSet<i64>) -> Result<Vec<EntitySnapshot>> {
            self.calls.borrow_mut().push((type_name.to_string(), ids.clone()));
            self.inner.find_by_ids(type_name, ids)
        }
    }

    fn record(id: i64, type_name: &str, entity_id: i64, attributes: Vec<AttributeDiff>) -> HistoryRecord {
        HistoryRecord {
            id,
            entity_type_name: type_name.to_string(),
            entity_id,
            operation: Operation::Update,
            modified_by: 1,
            modified_at: Utc.timestamp_millis_opt(id * 1_000).unwrap(),
            user_comment: None,
            attributes: attributes
                .into_iter()
                .map(|mut a| {
                    a.parent_id = id;
                    a
                })
                .collect(),
        }
    }

    fn positions_diff(old: Option<&str>, new: Option<&str>) -> AttributeDiff {
        AttributeDiff {
            id: Some(1),
            parent_id: 0,
            property_name: "positions".to_string(),
            op_type: OpType::Update,
            old_value: old.map(str::to_string),
            new_value: new.map(str::to_string),
            value_type_name: Some(POSITION.to_string()),
        }
    }

    fn metadata() -> StaticMetadata {
        StaticMetadata::new()
            .with_type(EntityType::new(ORDER).with_relation("positions", POSITION))
            .with_type(EntityType::new(POSITION).with_prefix("position"))
            .with_type(EntityType::new(CUSTOMER))
    }

    fn store() -> Result<CountingStore> {
        let inner = MemoryEntityStore::new();
        inner.put(ORDER, EntitySnapshot::new(1, "Order 1").with_collection("positions", &[42, 43]))?;
        inner.put(ORDER, EntitySnapshot::new(2, "Order 2"))?;
        inner.put(POSITION, EntitySnapshot::new(42, "Screws"))?;
        inner.put(POSITION, EntitySnapshot::new(43, "Nails"))?;
        inner.register_type(CUSTOMER)?;
        Ok(CountingStore {
            inner,
            calls: RefCell::new(Vec::new()),
        })
    }

    fn converter() -> LegacyConverter {
        LegacyConverter::new(&HistoryConfig::default())
    }

    #[test]
    fn diffed_ids_are_batch_loaded_once_per_type() -> Result<()> {
        let repository = FakeRepository {
            records: vec![
                record(1, ORDER, 1, vec![positions_diff(Some("44"), Some("42,43"))]),
                record(2, ORDER, 1, vec![positions_diff(None, Some("43"))]),
                record(3, POSITION, 42, vec![]),
                record(4, POSITION, 44, vec![]),
            ],
            ..Default::default()
        };
        let metadata = metadata();
        let store = store()?;
        let converter = converter();
        let loader = HistoryLoader::new(&repository, &metadata, &store, &converter, ',');

        let ctx = loader.load(ORDER, 1)?;

        let position_queries: Vec<_> = repository
            .queries
            .borrow()
            .iter()
            .filter(|(t, _)| t == POSITION)
            .cloned()
            .collect();
        assert_eq!(position_queries, vec![(POSITION.to_string(), BTreeSet::from([42, 43, 44]))]);
        let position_loads: Vec<_> = store
            .calls
            .borrow()
            .iter()
            .filter(|(t, _)| t == POSITION)
            .cloned()
            .collect();
        assert_eq!(position_loads, vec![(POSITION.to_string(), BTreeSet::from([42, 43, 44]))]);
        assert_eq!(ctx.len(), 4);
        Ok(())
    }

    #[test]
    fn removed_member_gets_index_after_live_members() -> Result<()> {
        let repository = FakeRepository {
            records: vec![record(1, ORDER, 1, vec![positions_diff(Some("44"), Some("42,43"))])],
            ..Default::default()
        };
        let metadata = metadata();
        let store = store()?;
        let converter = converter();
        let loader = HistoryLoader::new(&repository, &metadata, &store, &converter, ',');

        let ctx = loader.load(ORDER, 1)?;
        let index = |id| ctx.parent(&EntityKey::new(POSITION, id)).map(|l| l.index);
        assert_eq!(index(42), Some(1));
        assert_eq!(index(43), Some(2));
        assert_eq!(index(44), Some(3));
        assert_eq!(ctx.display_name_or_placeholder(POSITION, 43), "Nails");
        assert_eq!(ctx.display_name_or_placeholder(POSITION, 44), "Position#44");
        Ok(())
    }

    #[test]
    fn live_members_without_diffs_are_discovered() -> Result<()> {
        let repository = FakeRepository {
            records: vec![record(1, ORDER, 1, vec![]), record(2, POSITION, 43, vec![])],
            ..Default::default()
        };
        let metadata = metadata();
        let store = store()?;
        let converter = converter();
        let loader = HistoryLoader::new(&repository, &metadata, &store, &converter, ',');

        let ctx = loader.load(ORDER, 1)?;
        assert!(ctx.record(2).is_some());
        assert!(ctx.is_loaded(POSITION, 42));
        Ok(())
    }

    #[test]
    fn loading_twice_into_same_context_is_idempotent() -> Result<()> {
        let repository = FakeRepository {
            records: vec![
                record(1, ORDER, 1, vec![positions_diff(None, Some("42"))]),
                record(2, ORDER, 2, vec![]),
                record(3, POSITION, 42, vec![]),
            ],
            ..Default::default()
        };
        let metadata = metadata();
        let store = store()?;
        let converter = converter();
        let loader = HistoryLoader::new(&repository, &metadata, &store, &converter, ',');

        let mut ctx = loader.load(ORDER, 1)?;
        let before = ctx.len();
        loader.load_into(&mut ctx, ORDER, &BTreeSet::from([1]))?;
        assert_eq!(ctx.len(), before);
        loader.load_into(&mut ctx, ORDER, &BTreeSet::from([1, 2]))?;
        assert_eq!(ctx.len(), before + 1);
        Ok(())
    }

    #[test]
    fn unresolvable_bucket_is_skipped() -> Result<()> {
        let metadata = StaticMetadata::new()
            .with_type(EntityType::new(ORDER).with_relation("attachments", "com.acme.plugin.Attachment"));
        let mut diff = positions_diff(None, Some("9"));
        diff.property_name = "attachments".to_string();
        diff.value_type_name = Some("com.acme.plugin.Attachment".to_string());
        let repository = FakeRepository {
            records: vec![record(1, ORDER, 1, vec![diff])],
            ..Default::default()
        };
        let store = store()?;
        let converter = converter();
        let loader = HistoryLoader::new(&repository, &metadata, &store, &converter, ',');

        let ctx = loader.load(ORDER, 1)?;
        assert_eq!(ctx.len(), 1);
        assert!(repository
            .queries
            .borrow()
            .iter()
            .all(|(t, _)| t != "com.acme.plugin.Attachment"));
        Ok(())
    }

    #[test]
    fn malformed_ids_are_dropped() -> Result<()> {
        let repository = FakeRepository {
            records: vec![record(1, ORDER, 2, vec![positions_diff(Some("4x4"), Some("43"))])],
            ..Default::default()
        };
        let metadata = metadata();
        let store = store()?;
        let converter = converter();
        let loader = HistoryLoader::new(&repository, &metadata, &store, &converter, ',');

        let ctx = loader.load(ORDER, 2)?;
        assert!(ctx.is_loaded(POSITION, 43));
        assert_eq!(ctx.loaded_types().count(), 2);
        Ok(())
    }

    #[test]
    fn reference_names_are_resolved_without_history() -> Result<()> {
        let customer_ref = AttributeDiff {
            id: Some(5),
            parent_id: 0,
            property_name: "customer".to_string(),
            op_type: OpType::Update,
            old_value: Some("7".to_string()),
            new_value: Some("8".to_string()),
            value_type_name: Some(CUSTOMER.to_string()),
        };
        let repository = FakeRepository {
            records: vec![record(1, ORDER, 2, vec![customer_ref])],
            ..Default::default()
        };
        let metadata = metadata();
        let store = store()?;
        store.inner.put(CUSTOMER, EntitySnapshot::new(8, "Globex"))?;
        let converter = converter();
        let loader = HistoryLoader::new(&repository, &metadata, &store, &converter, ',');

        let ctx = loader.load(ORDER, 2)?;
        assert_eq!(ctx.display_name(CUSTOMER, 8), Some("Globex"));
        assert_eq!(ctx.display_name_or_placeholder(CUSTOMER, 7), "Customer#7");
        assert!(!ctx.is_loaded(CUSTOMER, 8));
        assert!(repository.queries.borrow().iter().all(|(t, _)| t != CUSTOMER));
        Ok(())
    }

    #[test]
    fn self_referencing_graph_terminates() -> Result<()> {
        let metadata = StaticMetadata::new()
            .with_type(EntityType::new(ORDER).with_relation("children", ORDER));
        let mut diff = positions_diff(None, Some("1,2"));
        diff.property_name = "children".to_string();
        diff.value_type_name = Some(ORDER.to_string());
        let mut back = diff.clone();
        back.new_value = Some("1".to_string());
        let repository = FakeRepository {
            records: vec![record(1, ORDER, 1, vec![diff]), record(2, ORDER, 2, vec![back])],
            ..Default::default()
        };
        let store = store()?;
        let converter = converter();
        let loader = HistoryLoader::new(&repository, &metadata, &store, &converter, ',');

        let ctx = loader.load(ORDER, 1)?;
        assert_eq!(ctx.len(), 2);
        assert_eq!(repository.queries.borrow().len(), 2);
        Ok(())
    }
}
