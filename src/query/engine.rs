//! Entity-set algebra over backend sequences and deferred query trees.
//!
//! The engine prefers, in order: identity shortcuts, fusing two tree-keeping sequences
//! into one larger tree (never for concatenation), "get all" shortcuts for statically typed operands, the backend's
//! native set operation, and finally an in-memory implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tracing::{debug, error};

use crate::backend::Backend;
use crate::query::ast::{warn_if_deep, Node};
use crate::query::config::QueryEngineConfig;
use crate::query::metadata::MetadataProvider;
use crate::query::optimizer::{OptimizedTreeAndSorts, OptimizedTreeCache, Optimizer};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::seq::EntitySeq;
use crate::query::sort::SortEngine;
use crate::query::tree_keeping::TreeKeepingSeq;
use crate::types::{EntityId, Result};

/// Set operation selector shared by fusion and materialization.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SetOp {
    Intersect,
    Union,
    Concat,
    Minus,
}

impl SetOp {
    fn name(self) -> &'static str {
        match self {
            SetOp::Intersect => "intersect",
            SetOp::Union => "union",
            SetOp::Concat => "concat",
            SetOp::Minus => "minus",
        }
    }
}

struct EngineInner {
    backend: Arc<dyn Backend>,
    metadata: Arc<dyn MetadataProvider>,
    config: QueryEngineConfig,
    cache: OptimizedTreeCache,
    optimizer: Optimizer,
    sort_engine: SortEngine,
}

/// Query entry point; cheap to clone and safe to share between threads.
#[derive(Clone)]
pub struct QueryEngine {
    inner: Arc<EngineInner>,
}

impl QueryEngine {
    /// Creates an engine over a backend and its schema metadata.
    pub fn new(
        backend: Arc<dyn Backend>,
        metadata: Arc<dyn MetadataProvider>,
        config: QueryEngineConfig,
    ) -> Self {
        let cache = OptimizedTreeCache::new(
            config.cache_capacity,
            config.concurrent_cache,
            config.cache_shards,
        );
        let optimizer = Optimizer::new(config.max_rewrites_per_plan);
        let sort_engine = SortEngine::new(
            Arc::clone(&backend),
            Arc::clone(&metadata),
            config.sort.clone(),
        );
        Self {
            inner: Arc::new(EngineInner {
                backend,
                metadata,
                config,
                cache,
                optimizer,
                sort_engine,
            }),
        }
    }

    /// Storage backend.
    pub fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    /// Schema metadata.
    pub fn metadata(&self) -> &dyn MetadataProvider {
        self.inner.metadata.as_ref()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &QueryEngineConfig {
        &self.inner.config
    }

    /// Optimized-tree cache.
    pub fn cache(&self) -> &OptimizedTreeCache {
        &self.inner.cache
    }

    /// Sort engine.
    pub fn sort_engine(&self) -> &SortEngine {
        &self.inner.sort_engine
    }

    /// Deferred query over every entity of `entity_type` and its subtypes.
    pub fn query(&self, entity_type: impl Into<String>, tree: Node) -> EntitySeq {
        EntitySeq::Tree(Arc::new(TreeKeepingSeq::new(
            self.clone(),
            None,
            entity_type.into(),
            tree,
        )))
    }

    /// Deferred query restricted to the entities of `instance`.
    pub fn query_on(
        &self,
        instance: &EntitySeq,
        entity_type: impl Into<String>,
        tree: Node,
    ) -> EntitySeq {
        EntitySeq::Tree(Arc::new(TreeKeepingSeq::new(
            self.clone(),
            Some(instance.clone()),
            entity_type.into(),
            tree,
        )))
    }

    /// Every entity of `entity_type` and its subtypes, evaluated now.
    pub fn all(&self, entity_type: &str) -> Result<EntitySeq> {
        self.query(entity_type, Node::GetAll).resolve()
    }

    /// Optimized form of `tree`, served from the cache when possible.
    pub fn optimize(&self, tree: &Node) -> Arc<OptimizedTreeAndSorts> {
        let start = profile_timer();
        let optimized = match self.inner.cache.find(tree) {
            Some(hit) => hit,
            None => {
                let config = &self.inner.config;
                warn_if_deep(
                    tree,
                    config.depth_warning_threshold,
                    Duration::from_millis(config.depth_warning_interval_ms),
                );
                let (optimized, sorts) = self.inner.optimizer.optimize(tree);
                debug!(source = %tree, optimized = %optimized, sorts = sorts.len(), "query.optimize.miss");
                self.inner.cache.store(tree, optimized, sorts)
            }
        };
        record_profile_timer(QueryProfileKind::Optimize, start);
        optimized
    }

    /// Entities present in both sequences, in the order of `left`.
    pub fn intersect(&self, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        if left.same_as(right) {
            return Ok(left.clone());
        }
        if left.is_known_empty() || right.is_known_empty() {
            return Ok(EntitySeq::Empty);
        }
        if let Some(fused) = self.fuse(left, right, SetOp::Intersect) {
            return Ok(fused);
        }
        if same_static_type(left, right) {
            if right.is_get_all_tree() {
                return Ok(left.clone());
            }
            if left.is_get_all_tree() {
                return Ok(right.clone());
            }
        }
        self.intersect_non_trees(left, right)
    }

    /// Entities of either sequence without duplicates.
    pub fn union(&self, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        if left.same_as(right) || right.is_known_empty() {
            return Ok(left.clone());
        }
        if left.is_known_empty() {
            return Ok(right.clone());
        }
        if let Some(fused) = self.fuse(left, right, SetOp::Union) {
            return Ok(fused);
        }
        if same_static_type(left, right) {
            if left.is_get_all_tree() {
                return Ok(left.clone());
            }
            if right.is_get_all_tree() {
                return Ok(right.clone());
            }
        }
        self.union_non_trees(left, right)
    }

    /// `left` followed by `right`, duplicates kept.
    pub fn concat(&self, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        if right.is_known_empty() {
            return Ok(left.clone());
        }
        if left.is_known_empty() {
            return Ok(right.clone());
        }
        self.concat_non_trees(left, right)
    }

    /// Entities of `left` not in `right`, in the order of `left`.
    pub fn exclude(&self, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        if left.same_as(right) || left.is_known_empty() {
            return Ok(EntitySeq::Empty);
        }
        if right.is_known_empty() {
            return Ok(left.clone());
        }
        if let Some(fused) = self.fuse(left, right, SetOp::Minus) {
            return Ok(fused);
        }
        if same_static_type(left, right) && right.is_get_all_tree() {
            return Ok(EntitySeq::Empty);
        }
        self.exclude_non_trees(left, right)
    }

    /// Materializing intersection.
    pub fn intersect_non_trees(&self, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        self.materialized(SetOp::Intersect, left, right)
    }

    /// Materializing union.
    pub fn union_non_trees(&self, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        self.materialized(SetOp::Union, left, right)
    }

    /// Materializing concatenation.
    pub fn concat_non_trees(&self, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        self.materialized(SetOp::Concat, left, right)
    }

    /// Materializing difference.
    pub fn exclude_non_trees(&self, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        self.materialized(SetOp::Minus, left, right)
    }

    /// Distinct targets of a single-valued link over `source`, in first-seen order.
    ///
    /// The result is statically typed by the link's target type when the metadata knows
    /// the association.
    pub fn select_distinct(&self, source: &EntitySeq, link: &str) -> Result<EntitySeq> {
        self.select(source, link, |id| Ok(self.backend().link(id, link)?.into_iter().collect()))
    }

    /// Distinct targets of a multi-valued link over `source`, in first-seen order.
    pub fn select_many_distinct(&self, source: &EntitySeq, link: &str) -> Result<EntitySeq> {
        self.select(source, link, |id| self.backend().links(id, link))
    }

    fn select<F>(&self, source: &EntitySeq, link: &str, targets_of: F) -> Result<EntitySeq>
    where
        F: Fn(EntityId) -> Result<Vec<EntityId>>,
    {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for id in source.iter()? {
            for target in targets_of(id?)? {
                if seen.insert(target) {
                    out.push(target);
                }
            }
        }
        let seq = EntitySeq::from_ids(out);
        let target_type = source
            .static_type()
            .and_then(|ty| self.metadata().association(ty, link))
            .map(|end| end.target_type);
        Ok(match target_type {
            Some(ty) => EntitySeq::typed(ty, seq),
            None => seq,
        })
    }

    /// Entities of `entity_type` linked through `link` to any entity of `targets`.
    pub fn links_equal(
        &self,
        entity_type: &str,
        link: &str,
        targets: &EntitySeq,
    ) -> Result<EntitySeq> {
        let targets = targets.resolve()?;
        let backend = self.backend();
        match &targets {
            EntitySeq::Empty => return Ok(EntitySeq::Empty),
            EntitySeq::Backend(native) => {
                let all = backend.all(entity_type)?;
                if let Some(found) = backend.find_links(&all, native, link)? {
                    return Ok(EntitySeq::Backend(found));
                }
            }
            _ => {}
        }
        let mut result = EntitySeq::Empty;
        for target in targets.iter()? {
            let linked = EntitySeq::Backend(backend.link_equal(entity_type, link, target?)?);
            result = self.union_non_trees(&result, &linked)?;
        }
        Ok(result)
    }

    /// Evaluates `And(other, decorator)` where `decorator` is a
    /// [`Node::LinksEqualDecorator`], using the backend's links shortcut when it has one.
    pub fn and_links_equal(
        &self,
        entity_type: &str,
        other: &Node,
        decorator: &Node,
    ) -> Result<EntitySeq> {
        let Node::LinksEqualDecorator {
            link,
            decorated,
            link_entity_type,
        } = decorator
        else {
            let left = other.instantiate(entity_type, self)?;
            let right = decorator.instantiate(entity_type, self)?;
            return self.intersect_non_trees(&left, &right);
        };
        let source = other.instantiate(entity_type, self)?.resolve()?;
        if source.is_known_empty() {
            return Ok(EntitySeq::Empty);
        }
        let targets = self
            .query(link_entity_type.clone(), (**decorated).clone())
            .resolve()?;
        if let (EntitySeq::Backend(native_source), EntitySeq::Backend(native_targets)) =
            (&source, &targets)
        {
            if let Some(found) = self
                .backend()
                .find_links(native_source, native_targets, link)?
            {
                let found = EntitySeq::Backend(found);
                if self.inner.config.trace_find_links {
                    let direct = self.links_equal(entity_type, link, &targets)?;
                    let direct = self.intersect_non_trees(&source, &direct)?;
                    self.check_find_links(link, &found, &direct)?;
                }
                return Ok(found);
            }
        }
        let linked = self.links_equal(entity_type, link, &targets)?;
        self.intersect_non_trees(&source, &linked)
    }

    fn check_find_links(&self, link: &str, found: &EntitySeq, direct: &EntitySeq) -> Result<()> {
        let found_ids = found.to_vec()?;
        let direct_ids = direct.to_vec()?;
        if found_ids.len() != direct_ids.len() {
            error!(
                link,
                shortcut = found_ids.len(),
                direct = direct_ids.len(),
                "query.find_links.mismatch"
            );
        } else if let Some(pos) = found_ids.iter().zip(&direct_ids).position(|(a, b)| a != b) {
            error!(
                link,
                position = pos,
                shortcut = %found_ids[pos],
                direct = %direct_ids[pos],
                "query.find_links.mismatch"
            );
        }
        Ok(())
    }

    /// Folds two tree-keeping sequences over the same instance into one tree.
    ///
    /// Concatenation never fuses: a fused tree is filtered through the instance and
    /// evaluated per subtype, which drops duplicates and interleaves the two sides.
    fn fuse(&self, left: &EntitySeq, right: &EntitySeq, op: SetOp) -> Option<EntitySeq> {
        let (EntitySeq::Tree(l), EntitySeq::Tree(r)) = (left, right) else {
            return None;
        };
        let same_instance = match (l.instance(), r.instance()) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_as(b),
            _ => false,
        };
        if !same_instance {
            return None;
        }
        let meta = self.metadata();
        let (lt, rt) = (l.entity_type(), r.entity_type());
        let entity_type = match op {
            SetOp::Intersect if meta.is_subtype_of(lt, rt) => lt,
            SetOp::Intersect if meta.is_subtype_of(rt, lt) => rt,
            SetOp::Union if lt == rt => lt,
            SetOp::Minus if meta.is_subtype_of(lt, rt) => lt,
            _ => return None,
        };
        let (a, b) = (l.source_tree().clone(), r.source_tree().clone());
        let tree = match op {
            SetOp::Intersect => Node::and(a, b),
            SetOp::Union => Node::or(a, b),
            SetOp::Minus => Node::minus(a, b),
            SetOp::Concat => return None,
        };
        debug!(op = op.name(), entity_type, "query.algebra.fuse");
        Some(EntitySeq::Tree(Arc::new(TreeKeepingSeq::new(
            self.clone(),
            l.instance().cloned(),
            entity_type.to_owned(),
            tree,
        ))))
    }

    fn materialized(&self, op: SetOp, left: &EntitySeq, right: &EntitySeq) -> Result<EntitySeq> {
        let left = left.resolve()?;
        let right = right.resolve()?;
        match (op, left.is_known_empty(), right.is_known_empty()) {
            (SetOp::Intersect, true, _) | (SetOp::Intersect, _, true) => {
                return Ok(EntitySeq::Empty)
            }
            (SetOp::Minus, true, _) => return Ok(EntitySeq::Empty),
            (SetOp::Minus, false, true) | (SetOp::Union | SetOp::Concat, false, true) => {
                return Ok(left)
            }
            (SetOp::Union | SetOp::Concat, true, _) => return Ok(right),
            _ => {}
        }
        let start = profile_timer();
        let result = match (left.as_backend(), right.as_backend()) {
            (Some(l), Some(r)) => {
                let backend = self.backend();
                let native = match op {
                    SetOp::Intersect => backend.intersect(l, r)?,
                    SetOp::Union => backend.union(l, r)?,
                    SetOp::Concat => backend.concat(l, r)?,
                    SetOp::Minus => backend.minus(l, r)?,
                };
                EntitySeq::Backend(native)
            }
            _ => EntitySeq::from_ids(in_memory(op, &left, &right)?),
        };
        record_profile_timer(QueryProfileKind::SetOperation, start);
        Ok(result)
    }
}

fn same_static_type(left: &EntitySeq, right: &EntitySeq) -> bool {
    matches!((left.static_type(), right.static_type()), (Some(a), Some(b)) if a == b)
}

fn in_memory(op: SetOp, left: &EntitySeq, right: &EntitySeq) -> Result<Vec<EntityId>> {
    let left = left.to_vec()?;
    match op {
        SetOp::Concat => {
            let mut out = left;
            out.extend(right.to_vec()?);
            Ok(out)
        }
        SetOp::Union => {
            let mut seen = FxHashSet::default();
            let mut out = Vec::with_capacity(left.len());
            for id in left.into_iter().chain(right.to_vec()?) {
                if seen.insert(id) {
                    out.push(id);
                }
            }
            Ok(out)
        }
        SetOp::Intersect | SetOp::Minus => {
            let keep = op == SetOp::Intersect;
            let right: FxHashSet<EntityId> = right.to_vec()?.into_iter().collect();
            Ok(left
                .into_iter()
                .filter(|id| right.contains(id) == keep)
                .collect())
        }
    }
}

impl fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEngine")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}
