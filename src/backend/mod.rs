//! Capability surface the query layer consumes from a storage backend.
//!
//! The backend owns every entity sequence it hands out; the query layer only composes
//! new sequences from existing ones. All calls are synchronous from the caller's point
//! of view.

use std::fmt;
use std::sync::Arc;

use crate::query::value::Value;
use crate::types::{EntityId, Result};

/// In-memory reference backend used by tests and benchmarks.
pub mod memory;

/// Owned iterator over entity identifiers.
pub type EntityIter = Box<dyn Iterator<Item = Result<EntityId>> + Send>;

/// Shared, restartable backend-native sequence.
pub type BackendSeq = Arc<dyn BackendSequence>;

/// Property lookup used to drive k-way merges and in-memory sorts.
pub type ValueGetter = Arc<dyn Fn(EntityId) -> Result<Option<Value>> + Send + Sync>;

/// Lazy, restartable sequence of entities produced by a backend.
pub trait BackendSequence: Send + Sync + fmt::Debug {
    /// Starts a fresh iteration over the sequence.
    fn iter(&self) -> Result<EntityIter>;

    /// Exact number of entities; may require a full scan.
    fn size(&self) -> Result<u64> {
        let mut count = 0u64;
        for item in self.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Cheap size estimate; never triggers a scan.
    fn rough_size(&self) -> u64;

    /// Fast emptiness check.
    fn is_empty(&self) -> Result<bool> {
        match self.iter()?.next() {
            None => Ok(true),
            Some(item) => item.map(|_| false),
        }
    }

    /// Whether the sequence yields entities in ascending [`EntityId`] order.
    fn is_sorted_by_id(&self) -> bool {
        false
    }
}

/// Inputs for the backend's indirect "sort links" capability.
#[derive(Debug)]
pub struct LinkSortRequest<'a> {
    /// Entities to reorder.
    pub source: &'a BackendSeq,
    /// Distinct link targets already sorted in the requested direction.
    pub sorted_targets: &'a BackendSeq,
    /// Link followed from a source entity to its targets.
    pub link: &'a str,
    /// Whether the link can point at more than one target.
    pub multiple: bool,
    /// Link on the target side that leads back to the source, when the schema has one.
    pub opposite_link: Option<&'a str>,
    /// Requested direction; decides whether unlinked entities go first or last.
    pub ascending: bool,
}

/// Storage engine capabilities consumed by the query layer.
///
/// Filtering methods return only entities whose concrete type is exactly
/// `entity_type`; the query layer performs the subtype fan-out itself.
pub trait Backend: Send + Sync {
    /// All entities of a type.
    fn all(&self, entity_type: &str) -> Result<BackendSeq>;

    /// Entities whose property equals `value`.
    fn property_equal(&self, entity_type: &str, prop: &str, value: &Value) -> Result<BackendSeq>;

    /// Entities whose string property starts with `prefix`.
    fn property_starts_with(
        &self,
        entity_type: &str,
        prop: &str,
        prefix: &str,
    ) -> Result<BackendSeq>;

    /// Entities whose property lies in the inclusive range `[min, max]`.
    fn property_range(
        &self,
        entity_type: &str,
        prop: &str,
        min: &Value,
        max: &Value,
    ) -> Result<BackendSeq>;

    /// Entities with the property set.
    fn property_not_null(&self, entity_type: &str, prop: &str) -> Result<BackendSeq>;

    /// Entities with the blob set.
    fn blob_not_null(&self, entity_type: &str, blob: &str) -> Result<BackendSeq>;

    /// Entities whose link points at `target`.
    fn link_equal(&self, entity_type: &str, link: &str, target: EntityId) -> Result<BackendSeq>;

    /// Entities with at least one target on the link.
    fn link_not_null(&self, entity_type: &str, link: &str) -> Result<BackendSeq>;

    /// Targets reachable from `entity` through `link`, of any type.
    fn links_of(&self, entity: EntityId, link: &str) -> Result<BackendSeq>;

    /// Entities of `source` linked through `link` to any entity of `targets`.
    ///
    /// Returns `Ok(None)` when the backend has no native shortcut.
    fn find_links(
        &self,
        _source: &BackendSeq,
        _targets: &BackendSeq,
        _link: &str,
    ) -> Result<Option<BackendSeq>> {
        Ok(None)
    }

    /// Native intersection, preserving the order of `left`.
    fn intersect(&self, left: &BackendSeq, right: &BackendSeq) -> Result<BackendSeq>;

    /// Native union without duplicates.
    fn union(&self, left: &BackendSeq, right: &BackendSeq) -> Result<BackendSeq>;

    /// Native set difference, preserving the order of `left`.
    fn minus(&self, left: &BackendSeq, right: &BackendSeq) -> Result<BackendSeq>;

    /// Native ordered concatenation, duplicates kept.
    fn concat(&self, left: &BackendSeq, right: &BackendSeq) -> Result<BackendSeq>;

    /// Entities of exactly `entity_type` (from `source` when supplied, otherwise the whole
    /// extent) sorted by a property; `NULL` sorts last ascending and first descending.
    fn sort_by_property(
        &self,
        entity_type: &str,
        prop: &str,
        source: Option<&BackendSeq>,
        ascending: bool,
    ) -> Result<BackendSeq>;

    /// Reorders `source` following an externally sorted list of link targets.
    ///
    /// Returns `Ok(None)` when the backend cannot serve the request, e.g. for the current
    /// association direction.
    fn sort_links(&self, _request: LinkSortRequest<'_>) -> Result<Option<BackendSeq>> {
        Ok(None)
    }

    /// K-way merge of sequences that are each sorted by `key` in the given direction.
    fn merge_sorted(
        &self,
        sorted: Vec<BackendSeq>,
        key: ValueGetter,
        ascending: bool,
    ) -> Result<BackendSeq>;

    /// Reads a property of an entity.
    fn property(&self, entity: EntityId, prop: &str) -> Result<Option<Value>>;

    /// First target of a link.
    fn link(&self, entity: EntityId, link: &str) -> Result<Option<EntityId>>;

    /// All targets of a link, in insertion order.
    fn links(&self, entity: EntityId, link: &str) -> Result<Vec<EntityId>>;
}

/// Iterator over a shared slice of identifiers.
pub(crate) struct SharedIdsIter {
    ids: Arc<[EntityId]>,
    pos: usize,
}

impl SharedIdsIter {
    pub(crate) fn new(ids: Arc<[EntityId]>) -> Self {
        Self { ids, pos: 0 }
    }
}

impl Iterator for SharedIdsIter {
    type Item = Result<EntityId>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = *self.ids.get(self.pos)?;
        self.pos += 1;
        Some(Ok(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ids.len() - self.pos;
        (remaining, Some(remaining))
    }
}
