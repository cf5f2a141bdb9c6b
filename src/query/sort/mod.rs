//! Sorting of entity sequences.
//!
//! Backends sort one concrete entity type at a time; [`SortEngine`] stitches the
//! per-type results of a hierarchy together with a k-way merge, drives the indirect
//! "sort by linked entity" path, and falls back to a stable in-memory sort whenever the
//! backend cannot help.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::backend::{Backend, BackendSeq, LinkSortRequest, ValueGetter};
use crate::query::config::SortConfig;
use crate::query::metadata::{Cardinality, MetadataProvider};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::seq::EntitySeq;
use crate::query::value::Value;
use crate::types::{EntityId, Result};

mod comparator;
mod in_memory;
pub mod merge;

pub use comparator::{compare_sort_keys, Keyed};
pub use in_memory::{HeapSort, InMemorySort, InMemorySortKind, MergeSort, StdStableSort};

/// Sorts sequences by property, by linked entity property, or by arbitrary key.
pub struct SortEngine {
    backend: Arc<dyn Backend>,
    metadata: Arc<dyn MetadataProvider>,
    config: SortConfig,
    strategy: Box<dyn InMemorySort>,
}

impl SortEngine {
    /// Creates a sort engine using the in-memory strategy selected by `config`.
    pub fn new(
        backend: Arc<dyn Backend>,
        metadata: Arc<dyn MetadataProvider>,
        config: SortConfig,
    ) -> Self {
        let strategy = config.in_memory.strategy();
        Self {
            backend,
            metadata,
            config,
            strategy,
        }
    }

    /// Thresholds in effect.
    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Sorts `source` by a property of `entity_type`, or the type's whole extent
    /// (subtypes included) when `source` is `None`.
    pub fn sort_by_property(
        &self,
        entity_type: &str,
        prop: &str,
        source: Option<&EntitySeq>,
        ascending: bool,
    ) -> Result<EntitySeq> {
        let Some(source) = source else {
            return Ok(EntitySeq::Backend(
                self.sort_hierarchy(entity_type, prop, None, ascending)?,
            ));
        };
        match source.resolve()? {
            EntitySeq::Empty => Ok(EntitySeq::Empty),
            EntitySeq::Backend(seq) => {
                let sorted = self.sort_hierarchy(entity_type, prop, Some(&seq), ascending)?;
                if sorted.size()? == seq.size()? {
                    return Ok(EntitySeq::Backend(sorted));
                }
                let source = seq.iter()?.collect::<Result<Vec<_>>>()?;
                let sorted = sorted.iter()?.collect::<Result<Vec<_>>>()?;
                Ok(EntitySeq::from_ids(with_uncovered(&source, sorted, ascending)))
            }
            other => {
                let ids = other.to_vec()?;
                if ids.len() <= self.config.max_in_memory {
                    let key = self.property_getter(prop);
                    return Ok(EntitySeq::from_ids(self.sort_in_memory(&ids, &key, ascending)?));
                }
                self.filter_sorted_extent(entity_type, prop, &ids, ascending)
            }
        }
    }

    /// Sorts `source` by `prop` of the entity behind `link`.
    ///
    /// Large backend sources whose link targets are few are reordered by the backend
    /// following the sorted list of targets; anything else is sorted in memory. A backend
    /// that cannot serve the indirect path is not an error.
    pub fn sort_by_link_property(
        &self,
        enum_type: &str,
        prop: &str,
        entity_type: &str,
        link: &str,
        source: &EntitySeq,
        ascending: bool,
    ) -> Result<EntitySeq> {
        let end = self.metadata.association(entity_type, link);
        let multiple = end
            .as_ref()
            .is_some_and(|end| end.cardinality == Cardinality::Multiple);
        let resolved = source.resolve()?;
        match &resolved {
            EntitySeq::Empty => return Ok(EntitySeq::Empty),
            EntitySeq::Backend(seq) if seq.rough_size() >= self.config.min_entries_for_link_sort => {
                let opposite = end.as_ref().and_then(|end| end.opposite_link.as_deref());
                if let Some(sorted) =
                    self.indirect_link_sort(enum_type, prop, seq, link, multiple, opposite, ascending)?
                {
                    return Ok(EntitySeq::Backend(sorted));
                }
            }
            _ => {}
        }
        let ids = resolved.to_vec()?;
        let key = self.link_property_getter(prop, link, ascending);
        Ok(EntitySeq::from_ids(self.sort_in_memory(&ids, &key, ascending)?))
    }

    /// Sorts `source` in memory by a caller-supplied key.
    pub fn sort_by_getter(
        &self,
        source: &EntitySeq,
        key: &ValueGetter,
        ascending: bool,
    ) -> Result<EntitySeq> {
        let resolved = source.resolve()?;
        if resolved.is_known_empty() {
            return Ok(EntitySeq::Empty);
        }
        let ids = resolved.to_vec()?;
        Ok(EntitySeq::from_ids(self.sort_in_memory(&ids, key, ascending)?))
    }

    /// Stable in-memory sort of `ids` by `key` with the configured strategy.
    pub fn sort_in_memory(
        &self,
        ids: &[EntityId],
        key: &ValueGetter,
        ascending: bool,
    ) -> Result<Vec<EntityId>> {
        let start = profile_timer();
        let keys = ids
            .iter()
            .map(|id| key(*id))
            .collect::<Result<Vec<Option<Value>>>>()?;
        let order = self.strategy.sort(ids.len(), &|a, b| {
            compare_sort_keys(&keys[a], &keys[b], ascending)
        });
        record_profile_timer(QueryProfileKind::InMemorySort, start);
        Ok(order.into_iter().map(|idx| ids[idx]).collect())
    }

    /// Key function reading `prop` of the entity itself.
    pub fn property_getter(&self, prop: &str) -> ValueGetter {
        let backend = Arc::clone(&self.backend);
        let prop = prop.to_owned();
        Arc::new(move |id| backend.property(id, &prop))
    }

    /// Key function reading `prop` through `link`.
    ///
    /// With several targets the key is the value that sorts first in the requested
    /// direction; targets without the property are ignored, so an entity whose targets
    /// all lack it sorts with the unlinked ones. The indirect path ranks the same way.
    pub fn link_property_getter(&self, prop: &str, link: &str, ascending: bool) -> ValueGetter {
        let backend = Arc::clone(&self.backend);
        let prop = prop.to_owned();
        let link = link.to_owned();
        Arc::new(move |id| -> Result<Option<Value>> {
            let mut best: Option<Value> = None;
            for target in backend.links(id, &link)? {
                let Some(value) = backend.property(target, &prop)? else {
                    continue;
                };
                let wanted = if ascending {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                if best
                    .as_ref()
                    .map_or(true, |current| value.sort_cmp(current) == wanted)
                {
                    best = Some(value);
                }
            }
            Ok(best)
        })
    }

    fn sort_hierarchy(
        &self,
        entity_type: &str,
        prop: &str,
        source: Option<&BackendSeq>,
        ascending: bool,
    ) -> Result<BackendSeq> {
        let own = self
            .backend
            .sort_by_property(entity_type, prop, source, ascending)?;
        let subtypes = self.metadata.direct_subtypes(entity_type);
        if subtypes.is_empty() {
            return Ok(own);
        }
        let mut sorted = Vec::with_capacity(subtypes.len() + 1);
        sorted.push(own);
        for subtype in &subtypes {
            sorted.push(self.sort_hierarchy(subtype, prop, source, ascending)?);
        }
        let start = profile_timer();
        let merged = self
            .backend
            .merge_sorted(sorted, self.property_getter(prop), ascending);
        record_profile_timer(QueryProfileKind::Merge, start);
        merged
    }

    fn filter_sorted_extent(
        &self,
        entity_type: &str,
        prop: &str,
        ids: &[EntityId],
        ascending: bool,
    ) -> Result<EntitySeq> {
        debug!(
            entity_type,
            prop,
            size = ids.len(),
            max_in_memory = self.config.max_in_memory,
            "query.sort.extent_filter"
        );
        let mut wanted: FxHashMap<EntityId, usize> = FxHashMap::default();
        for id in ids {
            *wanted.entry(*id).or_insert(0) += 1;
        }
        let extent = self.sort_hierarchy(entity_type, prop, None, ascending)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in extent.iter()? {
            let id = id?;
            if let Some(count) = wanted.remove(&id) {
                out.extend(std::iter::repeat(id).take(count));
            }
        }
        Ok(EntitySeq::from_ids(with_uncovered(ids, out, ascending)))
    }

    /// Entities of `entity_type` and its subtypes that have `prop`.
    fn keyed_extent(&self, entity_type: &str, prop: &str) -> Result<BackendSeq> {
        let mut keyed = self.backend.property_not_null(entity_type, prop)?;
        for subtype in self.metadata.subtype_closure(entity_type) {
            let part = self.backend.property_not_null(&subtype, prop)?;
            keyed = self.backend.union(&keyed, &part)?;
        }
        Ok(keyed)
    }

    #[allow(clippy::too_many_arguments)]
    fn indirect_link_sort(
        &self,
        enum_type: &str,
        prop: &str,
        source: &BackendSeq,
        link: &str,
        multiple: bool,
        opposite_link: Option<&str>,
        ascending: bool,
    ) -> Result<Option<BackendSeq>> {
        // Targets without the property rank nowhere, like the in-memory key ignores them.
        let keyed = self.keyed_extent(enum_type, prop)?;
        let targets = self.sort_hierarchy(enum_type, prop, Some(&keyed), ascending)?;
        let enum_count = targets.rough_size();
        if enum_count > self.config.max_enum_count_for_link_sort {
            debug!(
                enum_type,
                enum_count,
                limit = self.config.max_enum_count_for_link_sort,
                "query.sort.link_sort_skipped"
            );
            return Ok(None);
        }
        let start = profile_timer();
        let sorted = self.backend.sort_links(LinkSortRequest {
            source,
            sorted_targets: &targets,
            link,
            multiple,
            opposite_link,
            ascending,
        })?;
        record_profile_timer(QueryProfileKind::LinkSort, start);
        if sorted.is_none() {
            debug!(enum_type, link, "query.sort.link_sort_unsupported");
        }
        Ok(sorted)
    }
}

/// Adds the entries of `source` that `sorted` misses (entities outside the sorted type
/// hierarchy) where null keys go, keeping their source order. Duplicates count.
fn with_uncovered(source: &[EntityId], mut sorted: Vec<EntityId>, ascending: bool) -> Vec<EntityId> {
    let mut covered: FxHashMap<EntityId, usize> = FxHashMap::default();
    for id in &sorted {
        *covered.entry(*id).or_insert(0) += 1;
    }
    let mut uncovered = Vec::new();
    for id in source {
        match covered.get_mut(id) {
            Some(count) if *count > 0 => *count -= 1,
            _ => uncovered.push(*id),
        }
    }
    if uncovered.is_empty() {
        return sorted;
    }
    debug!(uncovered = uncovered.len(), "query.sort.outside_hierarchy");
    if ascending {
        sorted.extend(uncovered);
        sorted
    } else {
        uncovered.extend(sorted);
        uncovered
    }
}

impl fmt::Debug for SortEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
