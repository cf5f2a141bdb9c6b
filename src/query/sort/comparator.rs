use std::cmp::Ordering;

use crate::query::value::Value;
use crate::types::EntityId;

/// Entity paired with its sort key.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyed {
    /// Sort key; `None` is `NULL`.
    pub key: Option<Value>,
    /// Entity the key belongs to.
    pub id: EntityId,
}

/// Orders two sort keys.
///
/// `NULL` compares greater than every value, so it ends up last when ascending and first
/// when descending. Strings compare case-insensitively.
pub fn compare_sort_keys(a: &Option<Value>, b: &Option<Value>, ascending: bool) -> Ordering {
    let ord = match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.sort_cmp(b),
    };
    if ascending {
        ord
    } else {
        ord.reverse()
    }
}
