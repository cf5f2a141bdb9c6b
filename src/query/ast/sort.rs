//! Sort orders carried by [`Node::Sort`](super::Node::Sort).

use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::ValueGetter;
use crate::query::engine::QueryEngine;
use crate::query::seq::EntitySeq;
use crate::query::value::Value;
use crate::types::{EntityId, Result};

static NEXT_GETTER_ID: AtomicU64 = AtomicU64::new(1);

/// Key and direction of one sort step.
#[derive(Clone)]
pub enum SortOrder {
    /// Sort by a property of the entity.
    Property {
        /// Property name.
        name: String,
        /// Direction.
        ascending: bool,
    },
    /// Sort by a property of the entity reached through a link.
    LinkProperty {
        /// Entity type of the link targets.
        enum_type: String,
        /// Property of the link target.
        prop: String,
        /// Link name.
        link: String,
        /// Direction.
        ascending: bool,
    },
    /// Sort by a caller-supplied key.
    ///
    /// The key function is opaque, so trees holding this order are never cached.
    Getter {
        /// Process-unique identity of the getter.
        id: u64,
        /// Human-readable label for diagnostics.
        label: String,
        /// Key function.
        key: ValueGetter,
        /// Direction.
        ascending: bool,
    },
}

impl SortOrder {
    /// Sort by a caller-supplied key; every call yields a distinct order.
    pub fn getter<F>(label: impl Into<String>, key: F, ascending: bool) -> Self
    where
        F: Fn(EntityId) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        SortOrder::Getter {
            id: NEXT_GETTER_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            key: Arc::new(key),
            ascending,
        }
    }

    /// Requested direction.
    pub fn ascending(&self) -> bool {
        match self {
            SortOrder::Property { ascending, .. }
            | SortOrder::LinkProperty { ascending, .. }
            | SortOrder::Getter { ascending, .. } => *ascending,
        }
    }

    /// Whether a tree sorted this way can be memoized by handle.
    pub fn can_be_cached(&self) -> bool {
        !matches!(self, SortOrder::Getter { .. })
    }

    /// Sorts `source`, or the whole extent of `entity_type` (subtypes included) when
    /// `source` is `None`.
    pub fn apply(
        &self,
        entity_type: &str,
        engine: &QueryEngine,
        source: Option<&EntitySeq>,
    ) -> Result<EntitySeq> {
        let sorter = engine.sort_engine();
        match self {
            SortOrder::Property { name, ascending } => {
                sorter.sort_by_property(entity_type, name, source, *ascending)
            }
            SortOrder::LinkProperty {
                enum_type,
                prop,
                link,
                ascending,
            } => {
                let source = match source {
                    Some(seq) => seq.clone(),
                    None => engine.all(entity_type)?,
                };
                sorter.sort_by_link_property(enum_type, prop, entity_type, link, &source, *ascending)
            }
            SortOrder::Getter { key, ascending, .. } => {
                let source = match source {
                    Some(seq) => seq.clone(),
                    None => engine.all(entity_type)?,
                };
                sorter.sort_by_getter(&source, key, *ascending)
            }
        }
    }

    pub(crate) fn write_handle(&self, out: &mut String) {
        let dir = if self.ascending() { "asc" } else { "desc" };
        let _ = match self {
            SortOrder::Property { name, .. } => write!(out, "p:{dir}:{}:{name}", name.len()),
            SortOrder::LinkProperty {
                enum_type,
                prop,
                link,
                ..
            } => write!(
                out,
                "l:{dir}:{}:{enum_type}{}:{prop}{}:{link}",
                enum_type.len(),
                prop.len(),
                link.len()
            ),
            SortOrder::Getter { id, .. } => write!(out, "g:{dir}:{id}"),
        };
    }
}

impl PartialEq for SortOrder {
    fn eq(&self, other: &SortOrder) -> bool {
        match (self, other) {
            (
                SortOrder::Property { name, ascending },
                SortOrder::Property {
                    name: other_name,
                    ascending: other_ascending,
                },
            ) => name == other_name && ascending == other_ascending,
            (
                SortOrder::LinkProperty {
                    enum_type,
                    prop,
                    link,
                    ascending,
                },
                SortOrder::LinkProperty {
                    enum_type: other_enum,
                    prop: other_prop,
                    link: other_link,
                    ascending: other_ascending,
                },
            ) => {
                enum_type == other_enum
                    && prop == other_prop
                    && link == other_link
                    && ascending == other_ascending
            }
            (SortOrder::Getter { id, .. }, SortOrder::Getter { id: other, .. }) => id == other,
            _ => false,
        }
    }
}

impl fmt::Debug for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Getter {
                id,
                label,
                ascending,
                ..
            } => f
                .debug_struct("Getter")
                .field("id", id)
                .field("label", label)
                .field("ascending", ascending)
                .finish(),
            other => {
                let mut out = String::new();
                other.write_handle(&mut out);
                f.write_str(&out)
            }
        }
    }
}
