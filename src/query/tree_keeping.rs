//! Deferred query results that keep their source tree.
//!
//! A [`TreeKeepingSeq`] is cheap to build: it only records the tree, the entity type, and
//! an optional instance sequence to filter. The tree is optimized on first evaluation and
//! the optimized form is memoized per sequence (and per process through the engine's
//! cache). Keeping the tree around lets the engine fuse set operations between two such
//! sequences into one bigger tree instead of materializing both sides.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::trace;

use crate::query::ast::{Node, SortOrder};
use crate::query::engine::QueryEngine;
use crate::query::optimizer::{OptimizedTreeAndSorts, Sorts};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::seq::EntitySeq;
use crate::types::Result;

/// Lazily evaluated query over an entity type hierarchy.
pub struct TreeKeepingSeq {
    engine: QueryEngine,
    instance: Option<EntitySeq>,
    entity_type: String,
    source_tree: Node,
    optimized: OnceLock<Arc<OptimizedTreeAndSorts>>,
}

impl TreeKeepingSeq {
    /// Builds a deferred query, folding it into `instance` when that is itself a deferred
    /// query over the same entity type.
    pub fn new(
        engine: QueryEngine,
        instance: Option<EntitySeq>,
        entity_type: String,
        tree: Node,
    ) -> Self {
        let (instance, source_tree) = match instance {
            Some(EntitySeq::Tree(outer)) if outer.entity_type == entity_type => {
                let spliced = splice(&outer.source_tree, tree);
                (outer.instance.clone(), spliced)
            }
            other => (other, tree),
        };
        Self {
            engine,
            instance,
            entity_type,
            source_tree,
            optimized: OnceLock::new(),
        }
    }

    /// Deferred query over an already optimized tree with no instance and no sorts.
    fn preoptimized(engine: QueryEngine, entity_type: String, tree: Node) -> Self {
        let optimized = OnceLock::new();
        let _ = optimized.set(Arc::new(OptimizedTreeAndSorts {
            tree: tree.clone(),
            sorts: Sorts::new(),
        }));
        Self {
            engine,
            instance: None,
            entity_type,
            source_tree: tree,
            optimized,
        }
    }

    /// Static entity type.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Sequence being filtered, if any.
    pub fn instance(&self) -> Option<&EntitySeq> {
        self.instance.as_ref()
    }

    /// Tree as built, before optimization.
    pub fn source_tree(&self) -> &Node {
        &self.source_tree
    }

    /// Optimized tree and hoisted sorts, computed on first use.
    pub fn optimized(&self) -> &Arc<OptimizedTreeAndSorts> {
        self.optimized
            .get_or_init(|| self.engine.optimize(&self.source_tree))
    }

    /// Evaluates the query.
    pub fn instantiate(&self) -> Result<EntitySeq> {
        let start = profile_timer();
        let optimized = Arc::clone(self.optimized());
        let (body, inline) = peel_sorts(&optimized.tree);
        let has_sorts = !inline.is_empty() || !optimized.sorts.is_empty();
        // The first sort reads the backend's sorted extent instead of a source.
        let sorted_extent = has_sorts && self.instance.is_none() && matches!(body, Node::GetAll);
        let mut result = match &self.instance {
            _ if sorted_extent => None,
            None => Some(body.instantiate_hierarchy(&self.entity_type, &self.engine)?),
            Some(instance) if matches!(body, Node::GetAll) => Some(instance.clone()),
            Some(instance) => {
                let unfiltered = EntitySeq::Tree(Arc::new(TreeKeepingSeq::preoptimized(
                    self.engine.clone(),
                    self.entity_type.clone(),
                    body.clone(),
                )));
                Some(self.engine.intersect(instance, &unfiltered)?)
            }
        };
        for order in inline.iter().rev() {
            result = Some(order.apply(&self.entity_type, &self.engine, result.as_ref())?);
        }
        let result = optimized
            .sorts
            .apply(&self.entity_type, &self.engine, result)?;
        trace!(entity_type = %self.entity_type, sorted_extent, "query.tree.instantiate");
        record_profile_timer(QueryProfileKind::Instantiate, start);
        Ok(result)
    }
}

/// Folds `tree` into the source tree of an outer deferred query.
fn splice(outer: &Node, tree: Node) -> Node {
    match tree {
        Node::Sort { order, child } if matches!(*child, Node::GetAll) => Node::Sort {
            order,
            child: Box::new(outer.clone()),
        },
        tree if matches!(outer, Node::GetAll) => tree,
        tree => Node::and(outer.clone(), tree),
    }
}

/// Splits sort nodes left at the top of an optimized tree from the body they sort.
fn peel_sorts(tree: &Node) -> (&Node, Vec<&SortOrder>) {
    let mut orders = Vec::new();
    let mut body = tree;
    while let Node::Sort { order, child } = body {
        orders.push(order);
        body = child.as_ref();
    }
    (body, orders)
}

impl fmt::Debug for TreeKeepingSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeKeepingSeq")
            .field("entity_type", &self.entity_type)
            .field("tree", &self.source_tree)
            .field("has_instance", &self.instance.is_some())
            .finish()
    }
}
