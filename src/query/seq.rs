//! Entity sequences flowing between the engine, the sort engine, and callers.

use std::fmt;
use std::sync::Arc;

use crate::backend::{BackendSeq, EntityIter, SharedIdsIter};
use crate::query::ast::Node;
use crate::query::tree_keeping::TreeKeepingSeq;
use crate::types::{EntityId, Result};

/// Lazy, restartable sequence of entities.
#[derive(Clone)]
pub enum EntitySeq {
    /// Statically known empty sequence.
    Empty,
    /// Sequence owned by the backend.
    Backend(BackendSeq),
    /// Snapshot produced by an in-memory operation.
    Materialized(Arc<[EntityId]>),
    /// Deferred query tree, optimized and evaluated on iteration.
    Tree(Arc<TreeKeepingSeq>),
    /// Sequence restricted to a statically known entity type.
    Typed(Arc<StaticTypedSeq>),
}

/// Sequence whose entities are known to belong to one entity type hierarchy.
#[derive(Clone, Debug)]
pub struct StaticTypedSeq {
    /// Static entity type.
    pub entity_type: String,
    /// Wrapped sequence.
    pub inner: EntitySeq,
}

impl EntitySeq {
    /// Wraps materialized identifiers.
    pub fn from_ids(ids: Vec<EntityId>) -> Self {
        if ids.is_empty() {
            EntitySeq::Empty
        } else {
            EntitySeq::Materialized(ids.into())
        }
    }

    /// Wraps a sequence with a static entity type.
    pub fn typed(entity_type: impl Into<String>, inner: EntitySeq) -> Self {
        EntitySeq::Typed(Arc::new(StaticTypedSeq {
            entity_type: entity_type.into(),
            inner,
        }))
    }

    /// Identity comparison: true only for the very same underlying sequence.
    pub fn same_as(&self, other: &EntitySeq) -> bool {
        match (self, other) {
            (EntitySeq::Empty, EntitySeq::Empty) => true,
            (EntitySeq::Backend(a), EntitySeq::Backend(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (EntitySeq::Materialized(a), EntitySeq::Materialized(b)) => Arc::ptr_eq(a, b),
            (EntitySeq::Tree(a), EntitySeq::Tree(b)) => Arc::ptr_eq(a, b),
            (EntitySeq::Typed(a), EntitySeq::Typed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// True only for [`EntitySeq::Empty`]; never evaluates anything.
    pub fn is_known_empty(&self) -> bool {
        matches!(self, EntitySeq::Empty)
    }

    /// Backend-native form, if this sequence is one.
    pub fn as_backend(&self) -> Option<&BackendSeq> {
        match self {
            EntitySeq::Backend(seq) => Some(seq),
            _ => None,
        }
    }

    /// Tree-keeping form, if this sequence is one.
    pub fn as_tree(&self) -> Option<&Arc<TreeKeepingSeq>> {
        match self {
            EntitySeq::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    /// Entity type known without evaluating the sequence.
    pub fn static_type(&self) -> Option<&str> {
        match self {
            EntitySeq::Tree(tree) => Some(tree.entity_type()),
            EntitySeq::Typed(typed) => Some(&typed.entity_type),
            _ => None,
        }
    }

    /// Whether this is an unconditional "get all" query with no instance.
    pub fn is_get_all_tree(&self) -> bool {
        match self {
            EntitySeq::Tree(tree) => {
                tree.instance().is_none() && matches!(tree.source_tree(), Node::GetAll)
            }
            _ => false,
        }
    }

    /// Whether iteration yields ascending entity ids.
    pub fn is_sorted_by_id(&self) -> bool {
        match self {
            EntitySeq::Empty => true,
            EntitySeq::Backend(seq) => seq.is_sorted_by_id(),
            EntitySeq::Materialized(_) | EntitySeq::Tree(_) => false,
            EntitySeq::Typed(typed) => typed.inner.is_sorted_by_id(),
        }
    }

    /// Evaluates deferred trees and strips static typing, yielding an
    /// `Empty`, `Backend`, or `Materialized` sequence.
    pub fn resolve(&self) -> Result<EntitySeq> {
        match self {
            EntitySeq::Tree(tree) => tree.instantiate()?.resolve(),
            EntitySeq::Typed(typed) => typed.inner.resolve(),
            other => Ok(other.clone()),
        }
    }

    /// Starts a fresh iteration.
    pub fn iter(&self) -> Result<EntityIter> {
        match self {
            EntitySeq::Empty => Ok(Box::new(std::iter::empty())),
            EntitySeq::Backend(seq) => seq.iter(),
            EntitySeq::Materialized(ids) => Ok(Box::new(SharedIdsIter::new(Arc::clone(ids)))),
            EntitySeq::Tree(_) | EntitySeq::Typed(_) => self.resolve()?.iter(),
        }
    }

    /// Collects the sequence.
    pub fn to_vec(&self) -> Result<Vec<EntityId>> {
        match self {
            EntitySeq::Empty => Ok(Vec::new()),
            EntitySeq::Materialized(ids) => Ok(ids.to_vec()),
            _ => self.iter()?.collect(),
        }
    }

    /// Exact size.
    pub fn size(&self) -> Result<u64> {
        match self {
            EntitySeq::Empty => Ok(0),
            EntitySeq::Backend(seq) => seq.size(),
            EntitySeq::Materialized(ids) => Ok(ids.len() as u64),
            EntitySeq::Tree(_) | EntitySeq::Typed(_) => self.resolve()?.size(),
        }
    }

    /// Cheap size estimate without evaluating deferred trees.
    pub fn rough_size(&self) -> u64 {
        match self {
            EntitySeq::Empty => 0,
            EntitySeq::Backend(seq) => seq.rough_size(),
            EntitySeq::Materialized(ids) => ids.len() as u64,
            EntitySeq::Tree(_) => u64::MAX,
            EntitySeq::Typed(typed) => typed.inner.rough_size(),
        }
    }

    /// Emptiness check using the backend fast path where available.
    pub fn is_empty(&self) -> Result<bool> {
        match self {
            EntitySeq::Empty => Ok(true),
            EntitySeq::Backend(seq) => seq.is_empty(),
            EntitySeq::Materialized(ids) => Ok(ids.is_empty()),
            EntitySeq::Tree(_) | EntitySeq::Typed(_) => self.resolve()?.is_empty(),
        }
    }
}

impl fmt::Debug for EntitySeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntitySeq::Empty => write!(f, "Empty"),
            EntitySeq::Backend(seq) => f.debug_tuple("Backend").field(seq).finish(),
            EntitySeq::Materialized(ids) => write!(f, "Materialized({} ids)", ids.len()),
            EntitySeq::Tree(tree) => f.debug_tuple("Tree").field(tree).finish(),
            EntitySeq::Typed(typed) => f.debug_tuple("Typed").field(typed).finish(),
        }
    }
}

impl From<BackendSeq> for EntitySeq {
    fn from(seq: BackendSeq) -> Self {
        EntitySeq::Backend(seq)
    }
}
