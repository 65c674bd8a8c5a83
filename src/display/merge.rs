use std::collections::HashSet;

use super::types::FlatDisplay;

/// Appends the candidates that do not share (record id, attribute id) with
/// a row already in `target`. Rows without an attribute id match each
/// other. Returns the number of rows added.
pub fn merge_into<I>(target: &mut Vec<FlatDisplay>, candidates: I) -> usize
where
    I: IntoIterator<Item = FlatDisplay>,
{
    let mut seen: HashSet<(i64, Option<i64>)> = target.iter().map(FlatDisplay::dedup_key).collect();
    let before = target.len();
    for candidate in candidates {
        if seen.insert(candidate.dedup_key()) {
            target.push(candidate);
        }
    }
    target.len() - before
}
