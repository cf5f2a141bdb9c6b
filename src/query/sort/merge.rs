use std::cmp::Ordering;

use crate::backend::{EntityIter, ValueGetter};
use crate::types::{EntityId, Result};

use super::comparator::{compare_sort_keys, Keyed};

/// Merges iterators that are each sorted by `key` into one sorted list.
///
/// Heads are compared linearly; fan-in is the number of entity types in a hierarchy, so a
/// heap would not pay off. Ties go to the earliest source, which keeps the merge stable.
pub fn merge_sorted(
    sources: Vec<EntityIter>,
    key: &ValueGetter,
    ascending: bool,
) -> Result<Vec<EntityId>> {
    let mut iters = sources;
    let mut heads: Vec<Option<Keyed>> = Vec::with_capacity(iters.len());
    for iter in iters.iter_mut() {
        heads.push(next_keyed(iter, key)?);
    }
    let mut out = Vec::new();
    loop {
        let mut best: Option<usize> = None;
        for (idx, head) in heads.iter().enumerate() {
            let Some(candidate) = head else { continue };
            let better = match best.and_then(|b| heads[b].as_ref()) {
                None => true,
                Some(current) => {
                    compare_sort_keys(&candidate.key, &current.key, ascending) == Ordering::Less
                }
            };
            if better {
                best = Some(idx);
            }
        }
        let Some(idx) = best else { break };
        if let Some(head) = heads[idx].take() {
            out.push(head.id);
        }
        heads[idx] = next_keyed(&mut iters[idx], key)?;
    }
    Ok(out)
}

fn next_keyed(iter: &mut EntityIter, key: &ValueGetter) -> Result<Option<Keyed>> {
    match iter.next() {
        None => Ok(None),
        Some(id) => {
            let id = id?;
            Ok(Some(Keyed { key: key(id)?, id }))
        }
    }
}
