use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{
    Backend, BackendSeq, BackendSequence, EntityIter, LinkSortRequest, SharedIdsIter,
    ValueGetter,
};
use crate::query::sort::compare_sort_keys;
use crate::query::sort::merge::merge_sorted;
use crate::query::value::Value;
use crate::types::{EntityId, Result, SombraError, TypeId};

/// Snapshot of how often each backend capability was invoked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendCallCounts {
    /// Calls to [`Backend::all`].
    pub all: u64,
    /// Calls to [`Backend::property_equal`].
    pub property_equal: u64,
    /// Calls to the remaining property and link filters.
    pub filters: u64,
    /// Calls to [`Backend::intersect`].
    pub intersect: u64,
    /// Calls to [`Backend::union`].
    pub union: u64,
    /// Calls to [`Backend::minus`].
    pub minus: u64,
    /// Calls to [`Backend::concat`].
    pub concat: u64,
    /// Calls to [`Backend::sort_by_property`].
    pub sort_by_property: u64,
    /// Calls to [`Backend::sort_links`], served or not.
    pub sort_links: u64,
    /// Calls to [`Backend::find_links`], served or not.
    pub find_links: u64,
    /// Calls to [`Backend::merge_sorted`].
    pub merge_sorted: u64,
    /// Iterations started over sequences handed out by the backend.
    pub iterations: u64,
}

#[derive(Default)]
struct CallCounters {
    all: AtomicU64,
    property_equal: AtomicU64,
    filters: AtomicU64,
    intersect: AtomicU64,
    union: AtomicU64,
    minus: AtomicU64,
    concat: AtomicU64,
    sort_by_property: AtomicU64,
    sort_links: AtomicU64,
    find_links: AtomicU64,
    merge_sorted: AtomicU64,
    iterations: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default)]
struct EntityRecord {
    props: HashMap<String, Value>,
    blobs: HashMap<String, Vec<u8>>,
    links: HashMap<String, Vec<EntityId>>,
}

#[derive(Default)]
struct State {
    type_ids: HashMap<String, TypeId>,
    next_local: Vec<u64>,
    entities: BTreeMap<EntityId, EntityRecord>,
}

impl State {
    fn type_id(&self, entity_type: &str) -> Result<TypeId> {
        self.type_ids
            .get(entity_type)
            .copied()
            .ok_or_else(|| SombraError::UnknownType(entity_type.to_owned()))
    }

    fn register(&mut self, entity_type: &str) -> TypeId {
        if let Some(id) = self.type_ids.get(entity_type) {
            return *id;
        }
        let id = TypeId(self.next_local.len() as u32);
        self.type_ids.insert(entity_type.to_owned(), id);
        self.next_local.push(0);
        id
    }

    fn record(&self, entity: EntityId) -> Result<&EntityRecord> {
        self.entities.get(&entity).ok_or(SombraError::NotFound)
    }

    /// Entities of exactly `entity_type` matching `keep`, ascending by id.
    fn scan<F>(&self, entity_type: &str, keep: F) -> Result<Vec<EntityId>>
    where
        F: Fn(&EntityRecord) -> bool,
    {
        let ty = self.type_id(entity_type)?;
        Ok(self
            .entities
            .range(EntityId::new(ty, 0)..=EntityId::new(ty, u64::MAX))
            .filter(|entry| keep(entry.1))
            .map(|(id, _)| *id)
            .collect())
    }
}

/// Snapshot sequence handed out by [`MemoryBackend`].
pub struct MemorySeq {
    ids: Arc<[EntityId]>,
    sorted_by_id: bool,
    counters: Arc<CallCounters>,
}

impl MemorySeq {
    /// Identifiers in iteration order.
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }
}

impl BackendSequence for MemorySeq {
    fn iter(&self) -> Result<EntityIter> {
        bump(&self.counters.iterations);
        Ok(Box::new(SharedIdsIter::new(Arc::clone(&self.ids))))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.ids.len() as u64)
    }

    fn rough_size(&self) -> u64 {
        self.ids.len() as u64
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.ids.is_empty())
    }

    fn is_sorted_by_id(&self) -> bool {
        self.sorted_by_id
    }
}

impl fmt::Debug for MemorySeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySeq")
            .field("len", &self.ids.len())
            .field("sorted_by_id", &self.sorted_by_id)
            .finish()
    }
}

/// Backend keeping every entity in a map guarded by a read-write lock.
///
/// Type ids are assigned in registration order and local ids per type, so the whole
/// extent of a type is always ascending by [`EntityId`]. Sequences are snapshots taken
/// when the capability is called.
pub struct MemoryBackend {
    state: RwLock<State>,
    counters: Arc<CallCounters>,
    sort_links_supported: AtomicBool,
    find_links_supported: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend with every optional capability enabled.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            counters: Arc::new(CallCounters::default()),
            sort_links_supported: AtomicBool::new(true),
            find_links_supported: AtomicBool::new(true),
            failure: Mutex::new(None),
        }
    }

    /// Creates a backend with the given types registered in order.
    pub fn with_types<'a>(types: impl IntoIterator<Item = &'a str>) -> Self {
        let backend = Self::new();
        for ty in types {
            backend.register_type(ty);
        }
        backend
    }

    /// Registers an entity type, returning its id; registering twice is a no-op.
    pub fn register_type(&self, entity_type: &str) -> TypeId {
        self.state.write().register(entity_type)
    }

    /// Creates an entity of `entity_type`, registering the type if needed.
    pub fn create_entity(&self, entity_type: &str) -> EntityId {
        let mut state = self.state.write();
        let ty = state.register(entity_type);
        let slot = &mut state.next_local[ty.0 as usize];
        let id = EntityId::new(ty, *slot);
        *slot += 1;
        state.entities.insert(id, EntityRecord::default());
        id
    }

    /// Sets a property.
    pub fn set_property(
        &self,
        entity: EntityId,
        prop: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let record = state.entities.get_mut(&entity).ok_or(SombraError::NotFound)?;
        record.props.insert(prop.to_owned(), value.into());
        Ok(())
    }

    /// Sets a blob.
    pub fn set_blob(&self, entity: EntityId, blob: &str, bytes: Vec<u8>) -> Result<()> {
        let mut state = self.state.write();
        let record = state.entities.get_mut(&entity).ok_or(SombraError::NotFound)?;
        record.blobs.insert(blob.to_owned(), bytes);
        Ok(())
    }

    /// Appends `target` to a link of `entity`. Only this direction is recorded.
    pub fn add_link(&self, entity: EntityId, link: &str, target: EntityId) -> Result<()> {
        let mut state = self.state.write();
        if !state.entities.contains_key(&target) {
            return Err(SombraError::NotFound);
        }
        let record = state.entities.get_mut(&entity).ok_or(SombraError::NotFound)?;
        record.links.entry(link.to_owned()).or_default().push(target);
        Ok(())
    }

    /// Enables or disables the indirect link sort capability.
    pub fn set_sort_links_supported(&self, supported: bool) {
        self.sort_links_supported.store(supported, Ordering::Relaxed);
    }

    /// Enables or disables the links shortcut capability.
    pub fn set_find_links_supported(&self, supported: bool) {
        self.find_links_supported.store(supported, Ordering::Relaxed);
    }

    /// Makes every extent read and filter fail with [`SombraError::Backend`] until
    /// cleared with `None`.
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_owned);
    }

    fn check(&self) -> Result<()> {
        match self.failure.lock().as_deref() {
            Some(message) => Err(SombraError::Backend(message.to_owned())),
            None => Ok(()),
        }
    }

    /// Current call counts.
    pub fn counters(&self) -> BackendCallCounts {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        BackendCallCounts {
            all: load(&c.all),
            property_equal: load(&c.property_equal),
            filters: load(&c.filters),
            intersect: load(&c.intersect),
            union: load(&c.union),
            minus: load(&c.minus),
            concat: load(&c.concat),
            sort_by_property: load(&c.sort_by_property),
            sort_links: load(&c.sort_links),
            find_links: load(&c.find_links),
            merge_sorted: load(&c.merge_sorted),
            iterations: load(&c.iterations),
        }
    }

    fn seq(&self, ids: Vec<EntityId>, sorted_by_id: bool) -> BackendSeq {
        Arc::new(MemorySeq {
            ids: ids.into(),
            sorted_by_id,
            counters: Arc::clone(&self.counters),
        })
    }

    fn filter<F>(&self, entity_type: &str, keep: F) -> Result<BackendSeq>
    where
        F: Fn(&EntityRecord) -> bool,
    {
        bump(&self.counters.filters);
        self.check()?;
        let ids = self.state.read().scan(entity_type, keep)?;
        Ok(self.seq(ids, true))
    }
}

fn collect(seq: &BackendSeq) -> Result<Vec<EntityId>> {
    seq.iter()?.collect()
}

impl Backend for MemoryBackend {
    fn all(&self, entity_type: &str) -> Result<BackendSeq> {
        bump(&self.counters.all);
        self.check()?;
        let ids = self.state.read().scan(entity_type, |_| true)?;
        Ok(self.seq(ids, true))
    }

    fn property_equal(&self, entity_type: &str, prop: &str, value: &Value) -> Result<BackendSeq> {
        bump(&self.counters.property_equal);
        self.check()?;
        let ids = self.state.read().scan(entity_type, |record| {
            record
                .props
                .get(prop)
                .is_some_and(|v| v.compare(value) == Some(std::cmp::Ordering::Equal))
        })?;
        Ok(self.seq(ids, true))
    }

    fn property_starts_with(
        &self,
        entity_type: &str,
        prop: &str,
        prefix: &str,
    ) -> Result<BackendSeq> {
        self.filter(entity_type, |record| {
            matches!(record.props.get(prop), Some(Value::String(s)) if s.starts_with(prefix))
        })
    }

    fn property_range(
        &self,
        entity_type: &str,
        prop: &str,
        min: &Value,
        max: &Value,
    ) -> Result<BackendSeq> {
        self.filter(entity_type, |record| {
            record.props.get(prop).is_some_and(|v| v.in_range(min, max))
        })
    }

    fn property_not_null(&self, entity_type: &str, prop: &str) -> Result<BackendSeq> {
        self.filter(entity_type, |record| record.props.contains_key(prop))
    }

    fn blob_not_null(&self, entity_type: &str, blob: &str) -> Result<BackendSeq> {
        self.filter(entity_type, |record| record.blobs.contains_key(blob))
    }

    fn link_equal(&self, entity_type: &str, link: &str, target: EntityId) -> Result<BackendSeq> {
        self.filter(entity_type, |record| {
            record
                .links
                .get(link)
                .is_some_and(|targets| targets.contains(&target))
        })
    }

    fn link_not_null(&self, entity_type: &str, link: &str) -> Result<BackendSeq> {
        self.filter(entity_type, |record| {
            record.links.get(link).is_some_and(|targets| !targets.is_empty())
        })
    }

    fn links_of(&self, entity: EntityId, link: &str) -> Result<BackendSeq> {
        let targets = self.links(entity, link)?;
        Ok(self.seq(targets, false))
    }

    fn find_links(
        &self,
        source: &BackendSeq,
        targets: &BackendSeq,
        link: &str,
    ) -> Result<Option<BackendSeq>> {
        bump(&self.counters.find_links);
        if !self.find_links_supported.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let wanted: FxHashSet<EntityId> = collect(targets)?.into_iter().collect();
        let state = self.state.read();
        let mut out = Vec::new();
        for id in source.iter()? {
            let id = id?;
            let linked = state
                .record(id)?
                .links
                .get(link)
                .is_some_and(|ts| ts.iter().any(|t| wanted.contains(t)));
            if linked {
                out.push(id);
            }
        }
        Ok(Some(self.seq(out, source.is_sorted_by_id())))
    }

    fn intersect(&self, left: &BackendSeq, right: &BackendSeq) -> Result<BackendSeq> {
        bump(&self.counters.intersect);
        let right: FxHashSet<EntityId> = collect(right)?.into_iter().collect();
        let ids = collect(left)?
            .into_iter()
            .filter(|id| right.contains(id))
            .collect();
        Ok(self.seq(ids, left.is_sorted_by_id()))
    }

    fn union(&self, left: &BackendSeq, right: &BackendSeq) -> Result<BackendSeq> {
        bump(&self.counters.union);
        let (l, r) = (collect(left)?, collect(right)?);
        if left.is_sorted_by_id() && right.is_sorted_by_id() {
            let mut out = Vec::with_capacity(l.len() + r.len());
            let (mut i, mut j) = (0, 0);
            while i < l.len() && j < r.len() {
                match l[i].cmp(&r[j]) {
                    std::cmp::Ordering::Less => {
                        out.push(l[i]);
                        i += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        out.push(r[j]);
                        j += 1;
                    }
                    std::cmp::Ordering::Equal => {
                        out.push(l[i]);
                        i += 1;
                        j += 1;
                    }
                }
            }
            out.extend_from_slice(&l[i..]);
            out.extend_from_slice(&r[j..]);
            return Ok(self.seq(out, true));
        }
        let mut seen = FxHashSet::default();
        let ids = l.into_iter().chain(r).filter(|id| seen.insert(*id)).collect();
        Ok(self.seq(ids, false))
    }

    fn minus(&self, left: &BackendSeq, right: &BackendSeq) -> Result<BackendSeq> {
        bump(&self.counters.minus);
        let right: FxHashSet<EntityId> = collect(right)?.into_iter().collect();
        let ids = collect(left)?
            .into_iter()
            .filter(|id| !right.contains(id))
            .collect();
        Ok(self.seq(ids, left.is_sorted_by_id()))
    }

    fn concat(&self, left: &BackendSeq, right: &BackendSeq) -> Result<BackendSeq> {
        bump(&self.counters.concat);
        let mut ids = collect(left)?;
        ids.extend(collect(right)?);
        Ok(self.seq(ids, false))
    }

    fn sort_by_property(
        &self,
        entity_type: &str,
        prop: &str,
        source: Option<&BackendSeq>,
        ascending: bool,
    ) -> Result<BackendSeq> {
        bump(&self.counters.sort_by_property);
        self.check()?;
        let state = self.state.read();
        let ids = match source {
            None => state.scan(entity_type, |_| true)?,
            Some(source) => {
                let ty = state.type_id(entity_type)?;
                collect(source)?
                    .into_iter()
                    .filter(|id| id.type_id == ty)
                    .collect()
            }
        };
        let mut keyed = ids
            .into_iter()
            .map(|id| -> Result<(Option<Value>, EntityId)> {
                Ok((state.record(id)?.props.get(prop).cloned(), id))
            })
            .collect::<Result<Vec<(Option<Value>, EntityId)>>>()?;
        keyed.sort_by(|a, b| compare_sort_keys(&a.0, &b.0, ascending));
        Ok(self.seq(keyed.into_iter().map(|(_, id)| id).collect(), false))
    }

    fn sort_links(&self, request: LinkSortRequest<'_>) -> Result<Option<BackendSeq>> {
        bump(&self.counters.sort_links);
        if !self.sort_links_supported.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let rank: FxHashMap<EntityId, usize> = collect(request.sorted_targets)?
            .into_iter()
            .enumerate()
            .map(|(pos, id)| (id, pos))
            .collect();
        let state = self.state.read();
        let mut linked = Vec::new();
        let mut unlinked = Vec::new();
        for id in request.source.iter()? {
            let id = id?;
            let first = state
                .record(id)?
                .links
                .get(request.link)
                .and_then(|targets| targets.iter().filter_map(|t| rank.get(t).copied()).min());
            match first {
                Some(pos) => linked.push((pos, id)),
                None => unlinked.push(id),
            }
        }
        linked.sort_by_key(|(pos, _)| *pos);
        let linked = linked.into_iter().map(|(_, id)| id);
        let ids = if request.ascending {
            linked.chain(unlinked).collect()
        } else {
            unlinked.into_iter().chain(linked).collect()
        };
        Ok(Some(self.seq(ids, false)))
    }

    fn merge_sorted(
        &self,
        sorted: Vec<BackendSeq>,
        key: ValueGetter,
        ascending: bool,
    ) -> Result<BackendSeq> {
        bump(&self.counters.merge_sorted);
        let iters = sorted
            .iter()
            .map(|seq| seq.iter())
            .collect::<Result<Vec<EntityIter>>>()?;
        let ids = merge_sorted(iters, &key, ascending)?;
        Ok(self.seq(ids, false))
    }

    fn property(&self, entity: EntityId, prop: &str) -> Result<Option<Value>> {
        Ok(self.state.read().record(entity)?.props.get(prop).cloned())
    }

    fn link(&self, entity: EntityId, link: &str) -> Result<Option<EntityId>> {
        Ok(self
            .state
            .read()
            .record(entity)?
            .links
            .get(link)
            .and_then(|targets| targets.first().copied()))
    }

    fn links(&self, entity: EntityId, link: &str) -> Result<Vec<EntityId>> {
        Ok(self
            .state
            .read()
            .record(entity)?
            .links
            .get(link)
            .cloned()
            .unwrap_or_default())
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryBackend")
            .field("types", &state.type_ids.len())
            .field("entities", &state.entities.len())
            .finish()
    }
}
