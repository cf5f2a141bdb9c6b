use smallvec::SmallVec;

use crate::query::ast::SortOrder;
use crate::query::engine::QueryEngine;
use crate::query::seq::EntitySeq;
use crate::types::Result;

/// Most sorts hoisted out of one tree; further sorts stay in place.
pub const MAX_SORTS: usize = 4;

/// Sort orders detached from a tree during optimization.
///
/// The most recently hoisted order comes first. Hoisting walks from the root down, so the
/// list runs from the innermost hoisted sort to the outermost, which is also the order
/// the sorts must be applied in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sorts {
    orders: SmallVec<[SortOrder; MAX_SORTS]>,
}

impl Sorts {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no more sorts can be hoisted.
    pub fn is_full(&self) -> bool {
        self.orders.len() >= MAX_SORTS
    }

    /// Whether nothing was hoisted.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Number of hoisted sorts.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Pushes an order to the front; returns it back when the list is full.
    pub fn push(&mut self, order: SortOrder) -> Option<SortOrder> {
        if self.is_full() {
            return Some(order);
        }
        self.orders.insert(0, order);
        None
    }

    /// Hoisted orders in application order.
    pub fn iter(&self) -> impl Iterator<Item = &SortOrder> {
        self.orders.iter()
    }

    /// Whether every hoisted order is cacheable.
    pub fn can_be_cached(&self) -> bool {
        self.orders.iter().all(SortOrder::can_be_cached)
    }

    /// Applies every order in list order. With no `seq` the first order sorts the whole
    /// extent of `entity_type`, which an empty list returns unsorted.
    pub fn apply(
        &self,
        entity_type: &str,
        engine: &QueryEngine,
        seq: Option<EntitySeq>,
    ) -> Result<EntitySeq> {
        let mut seq = seq;
        for order in &self.orders {
            seq = Some(order.apply(entity_type, engine, seq.as_ref())?);
        }
        match seq {
            Some(seq) => Ok(seq),
            None => engine.all(entity_type),
        }
    }
}
