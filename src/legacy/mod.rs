//! Migration of the legacy three-row attribute encoding.
//!
//! Older releases stored one property change as up to three attribute
//! rows: `salary:ov` (old value), `salary:nv` (new value and type) and
//! `salary:op` (operation name). `LegacyConverter` folds them into one
//! canonical `salary` attribute on load. Stored rows are never rewritten.

use chrono::DateTime;

use crate::config::HistoryConfig;
use crate::db::{AttributeDiff, HistoryRecord, OpType};

pub mod type_names;

pub use type_names::TypeNameNormalizer;

const OLD_VALUE: &str = ":ov";
const NEW_VALUE: &str = ":nv";
const OPERATION: &str = ":op";

const TIMEABLE_PREFIX: &str = "timeableAttributes.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Suffix {
    OldValue,
    NewValue,
    Operation,
}

fn suffix(property_name: &str) -> Option<Suffix> {
    if property_name.ends_with(OLD_VALUE) {
        Some(Suffix::OldValue)
    } else if property_name.ends_with(NEW_VALUE) {
        Some(Suffix::NewValue)
    } else if property_name.ends_with(OPERATION) {
        Some(Suffix::Operation)
    } else {
        None
    }
}

pub fn is_legacy_attribute(attr: &AttributeDiff) -> bool {
    suffix(&attr.property_name).is_some()
}

/// Property name without the legacy suffix.
///
/// Timeable attributes embed their validity start as epoch millis:
/// `timeableAttributes.timeofvisit.1325376000000.arrive:nv` becomes
/// `arrive.2012-01-01`. A segment that is not a timestamp is kept as is.
pub fn plain_name(attr: &AttributeDiff) -> String {
    let name = attr.property_name.as_str();
    let name = match suffix(name) {
        Some(_) => &name[..name.len() - 3],
        None => name,
    };

    let Some(rest) = name.strip_prefix(TIMEABLE_PREFIX) else {
        return name.to_string();
    };
    let mut segments = rest.splitn(3, '.');
    let (Some(_group), Some(valid_from), Some(property)) = (segments.next(), segments.next(), segments.next())
    else {
        return name.to_string();
    };
    let valid_from = valid_from
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|ts| ts.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| valid_from.to_string());
    format!("{}.{}", property, valid_from)
}

/// Folds legacy attribute rows into canonical attributes and normalizes
/// value type names. Running it on canonical data changes nothing.
#[derive(Clone, Debug)]
pub struct LegacyConverter {
    normalizer: TypeNameNormalizer,
}

impl LegacyConverter {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            normalizer: TypeNameNormalizer::new(&config.type_renames),
        }
    }

    pub fn convert_record(&self, record: &mut HistoryRecord) {
        let attributes = std::mem::take(&mut record.attributes);
        record.attributes = self.convert(attributes);
    }

    pub fn convert(&self, attributes: Vec<AttributeDiff>) -> Vec<AttributeDiff> {
        let mut converted = if attributes.iter().any(is_legacy_attribute) {
            merge_legacy(attributes)
        } else {
            attributes
        };
        for attr in &mut converted {
            if let Some(type_name) = attr.value_type_name.as_mut() {
                *type_name = self.normalizer.normalize(type_name);
            }
        }
        converted
    }
}

fn merge_legacy(attributes: Vec<AttributeDiff>) -> Vec<AttributeDiff> {
    let mut keyed: Vec<(String, AttributeDiff)> = attributes
        .into_iter()
        .map(|attr| (plain_name(&attr), attr))
        .collect();
    keyed.sort_by(|(a_plain, a), (b_plain, b)| {
        a_plain
            .cmp(b_plain)
            .then_with(|| a.property_name.cmp(&b.property_name))
    });

    let mut merged: Vec<AttributeDiff> = Vec::with_capacity(keyed.len());
    let mut current: Option<usize> = None;
    for (plain, attr) in keyed {
        // A canonical row sorts before legacy rows of the same property
        // and takes their payload.
        let Some(kind) = suffix(&attr.property_name) else {
            merged.push(attr);
            current = Some(merged.len() - 1);
            continue;
        };

        let target = match current {
            Some(i) if merged[i].property_name == plain => i,
            _ => {
                merged.push(AttributeDiff {
                    property_name: plain.clone(),
                    op_type: OpType::Undefined,
                    old_value: None,
                    new_value: None,
                    ..attr.clone()
                });
                merged.len() - 1
            }
        };
        merge_payload(&mut merged[target], kind, &plain, attr);
        current = Some(target);
    }
    merged
}

fn merge_payload(canonical: &mut AttributeDiff, kind: Suffix, plain: &str, legacy: AttributeDiff) {
    let payload = legacy.new_value.or(legacy.old_value);
    // startTime payloads were written with a mismatched type and are unusable.
    let skip_values = plain.contains("startTime");
    match kind {
        Suffix::OldValue if !skip_values => canonical.old_value = payload,
        Suffix::NewValue if !skip_values => {
            canonical.new_value = payload;
            canonical.value_type_name = legacy.value_type_name;
        }
        Suffix::Operation => canonical.op_type = OpType::parse(payload.as_deref().unwrap_or_default()),
        _ => {}
    }
}
