//! Query tree representation.
//!
//! A query is an owned tree of [`Node`]s. Children are boxed and owned by their parent,
//! so the parent relation is implicit in ownership: a node is reached through exactly one
//! path from the root, and [`Node::replace_child`] hands the detached child back to the
//! caller. Every tree has a canonical [`Node::handle`] used as the optimized-tree cache key.

use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::query::engine::QueryEngine;
use crate::query::seq::EntitySeq;
use crate::query::value::Value;
use crate::types::{EntityId, Result};

mod instantiate;
pub mod pattern;
pub mod sort;

pub use pattern::{ConversionWildcard, MatchContext, WildcardSlot};
pub use sort::SortOrder;

/// Query tree node.
#[derive(Clone)]
pub enum Node {
    /// Holder of the tree being optimized; lets rewrites replace the top node.
    Root(Box<Node>),
    /// Every entity of the queried type.
    GetAll,
    /// Targets of a link starting at a fixed entity; spans every type.
    GetLinks {
        /// Entity the link starts from.
        from: EntityId,
        /// Link name.
        link: String,
    },
    /// Property equals a value; `None` selects entities without the property.
    PropertyEqual {
        /// Property name.
        name: String,
        /// Expected value.
        value: Option<Value>,
    },
    /// Property lies inside an inclusive range.
    PropertyRange {
        /// Property name.
        name: String,
        /// Inclusive lower bound.
        min: Value,
        /// Inclusive upper bound.
        max: Value,
    },
    /// String property starts with a prefix.
    PropertyStartsWith {
        /// Property name.
        name: String,
        /// Required prefix.
        prefix: String,
    },
    /// Property (or blob) is set.
    PropertyNotNull {
        /// Property name.
        name: String,
    },
    /// Link points at an entity; `None` selects entities without the link.
    LinkEqual {
        /// Link name.
        name: String,
        /// Expected target.
        target: Option<EntityId>,
    },
    /// Link has at least one target.
    LinkNotNull {
        /// Link name.
        name: String,
    },
    /// Entities linked through `link` to any result of `decorated` evaluated over
    /// `link_entity_type`.
    LinksEqualDecorator {
        /// Link name.
        link: String,
        /// Query selecting the link targets; optimized separately.
        decorated: Box<Node>,
        /// Entity type `decorated` is evaluated against.
        link_entity_type: String,
    },
    /// Intersection.
    And(Box<Node>, Box<Node>),
    /// Union.
    Or(Box<Node>, Box<Node>),
    /// Set difference.
    Minus(Box<Node>, Box<Node>),
    /// Ordered concatenation, duplicates kept.
    Concat(Box<Node>, Box<Node>),
    /// Complement within the queried type.
    Not(Box<Node>),
    /// Reorders the child's result.
    Sort {
        /// Sort key and direction.
        order: SortOrder,
        /// Sorted subtree.
        child: Box<Node>,
    },
    /// Backend-specific leaf outside the built-in node set.
    Custom(Arc<dyn CustomLeaf>),
    /// Pattern placeholder binding any subtree.
    Wildcard(WildcardSlot),
    /// Pattern placeholder binding one node class and transforming it on substitution.
    Conversion(ConversionWildcard),
}

/// Node kind without attributes or children.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NodeClass {
    /// Tree holder.
    Root,
    /// Unconditional extent.
    GetAll,
    /// Link targets of one entity.
    GetLinks,
    /// Property equality.
    PropertyEqual,
    /// Property range.
    PropertyRange,
    /// Property prefix.
    PropertyStartsWith,
    /// Property presence.
    PropertyNotNull,
    /// Link equality.
    LinkEqual,
    /// Link presence.
    LinkNotNull,
    /// Links into a sub-query.
    LinksEqualDecorator,
    /// Intersection.
    And,
    /// Union.
    Or,
    /// Difference.
    Minus,
    /// Concatenation.
    Concat,
    /// Complement.
    Not,
    /// Reordering.
    Sort,
    /// Backend-specific leaf.
    Custom,
    /// Pattern placeholder.
    Wildcard,
}

/// Extension point for leaves that only a particular backend understands.
pub trait CustomLeaf: Send + Sync {
    /// Short name used in handles.
    fn name(&self) -> &str;

    /// Appends the leaf's attributes to a handle; equal handles mean equal leaves.
    fn write_handle(&self, out: &mut String);

    /// Evaluates the leaf for one entity type.
    fn instantiate(&self, entity_type: &str, engine: &QueryEngine) -> Result<EntitySeq>;

    /// Whether the result already spans the type hierarchy.
    fn polymorphic(&self) -> bool {
        false
    }
}

impl Node {
    /// Intersection of two subtrees.
    pub fn and(left: Node, right: Node) -> Node {
        Node::And(Box::new(left), Box::new(right))
    }

    /// Union of two subtrees.
    pub fn or(left: Node, right: Node) -> Node {
        Node::Or(Box::new(left), Box::new(right))
    }

    /// Entities of `left` not in `right`.
    pub fn minus(left: Node, right: Node) -> Node {
        Node::Minus(Box::new(left), Box::new(right))
    }

    /// `left` followed by `right`.
    pub fn concat(left: Node, right: Node) -> Node {
        Node::Concat(Box::new(left), Box::new(right))
    }

    /// Complement of a subtree.
    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Node) -> Node {
        Node::Not(Box::new(child))
    }

    /// Property equals `value`.
    pub fn property_equal(name: impl Into<String>, value: impl Into<Value>) -> Node {
        Node::PropertyEqual {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Property is not set.
    pub fn property_is_null(name: impl Into<String>) -> Node {
        Node::PropertyEqual {
            name: name.into(),
            value: None,
        }
    }

    /// Property inside `[min, max]`.
    pub fn range(name: impl Into<String>, min: impl Into<Value>, max: impl Into<Value>) -> Node {
        Node::PropertyRange {
            name: name.into(),
            min: min.into(),
            max: max.into(),
        }
    }

    /// String property starts with `prefix`.
    pub fn starts_with(name: impl Into<String>, prefix: impl Into<String>) -> Node {
        Node::PropertyStartsWith {
            name: name.into(),
            prefix: prefix.into(),
        }
    }

    /// Property is set.
    pub fn property_not_null(name: impl Into<String>) -> Node {
        Node::PropertyNotNull { name: name.into() }
    }

    /// Link points at `target`.
    pub fn link_equal(name: impl Into<String>, target: EntityId) -> Node {
        Node::LinkEqual {
            name: name.into(),
            target: Some(target),
        }
    }

    /// Link has no target.
    pub fn link_is_null(name: impl Into<String>) -> Node {
        Node::LinkEqual {
            name: name.into(),
            target: None,
        }
    }

    /// Link has a target.
    pub fn link_not_null(name: impl Into<String>) -> Node {
        Node::LinkNotNull { name: name.into() }
    }

    /// Targets of `link` from `from`.
    pub fn get_links(from: EntityId, link: impl Into<String>) -> Node {
        Node::GetLinks {
            from,
            link: link.into(),
        }
    }

    /// Entities linked through `link` to any `link_entity_type` entity selected by
    /// `decorated`.
    pub fn links_equal(
        link: impl Into<String>,
        decorated: Node,
        link_entity_type: impl Into<String>,
    ) -> Node {
        Node::LinksEqualDecorator {
            link: link.into(),
            decorated: Box::new(decorated),
            link_entity_type: link_entity_type.into(),
        }
    }

    /// Sorts `child` by a property.
    pub fn sort_by(child: Node, name: impl Into<String>, ascending: bool) -> Node {
        Node::Sort {
            order: SortOrder::Property {
                name: name.into(),
                ascending,
            },
            child: Box::new(child),
        }
    }

    /// Sorts `child` by a property of the entity behind `link`.
    pub fn sort_by_link(
        child: Node,
        enum_type: impl Into<String>,
        prop: impl Into<String>,
        link: impl Into<String>,
        ascending: bool,
    ) -> Node {
        Node::Sort {
            order: SortOrder::LinkProperty {
                enum_type: enum_type.into(),
                prop: prop.into(),
                link: link.into(),
                ascending,
            },
            child: Box::new(child),
        }
    }

    /// Sorts `child` by an arbitrary order.
    pub fn sorted(child: Node, order: SortOrder) -> Node {
        Node::Sort {
            order,
            child: Box::new(child),
        }
    }

    /// Attribute-free node kind.
    pub fn class(&self) -> NodeClass {
        match self {
            Node::Root(_) => NodeClass::Root,
            Node::GetAll => NodeClass::GetAll,
            Node::GetLinks { .. } => NodeClass::GetLinks,
            Node::PropertyEqual { .. } => NodeClass::PropertyEqual,
            Node::PropertyRange { .. } => NodeClass::PropertyRange,
            Node::PropertyStartsWith { .. } => NodeClass::PropertyStartsWith,
            Node::PropertyNotNull { .. } => NodeClass::PropertyNotNull,
            Node::LinkEqual { .. } => NodeClass::LinkEqual,
            Node::LinkNotNull { .. } => NodeClass::LinkNotNull,
            Node::LinksEqualDecorator { .. } => NodeClass::LinksEqualDecorator,
            Node::And(..) => NodeClass::And,
            Node::Or(..) => NodeClass::Or,
            Node::Minus(..) => NodeClass::Minus,
            Node::Concat(..) => NodeClass::Concat,
            Node::Not(_) => NodeClass::Not,
            Node::Sort { .. } => NodeClass::Sort,
            Node::Custom(_) => NodeClass::Custom,
            Node::Wildcard(_) => NodeClass::Wildcard,
            Node::Conversion(cw) => cw.class,
        }
    }

    /// Tag used as the head of the handle.
    pub fn simple_name(&self) -> &str {
        match self {
            Node::Root(_) => "root",
            Node::GetAll => "all",
            Node::GetLinks { .. } => "links",
            Node::PropertyEqual { .. } => "pe",
            Node::PropertyRange { .. } => "pr",
            Node::PropertyStartsWith { .. } => "psw",
            Node::PropertyNotNull { .. } => "pnn",
            Node::LinkEqual { .. } => "le",
            Node::LinkNotNull { .. } => "lnn",
            Node::LinksEqualDecorator { .. } => "led",
            Node::And(..) => "and",
            Node::Or(..) => "or",
            Node::Minus(..) => "minus",
            Node::Concat(..) => "concat",
            Node::Not(_) => "not",
            Node::Sort { .. } => "sort",
            Node::Custom(leaf) => leaf.name(),
            Node::Wildcard(_) | Node::Conversion(_) => "?",
        }
    }

    /// Whether the two children are unordered.
    pub fn is_commutative(&self) -> bool {
        matches!(self, Node::And(..) | Node::Or(..))
    }

    /// Number of owned children.
    pub fn child_count(&self) -> usize {
        match self {
            Node::And(..) | Node::Or(..) | Node::Minus(..) | Node::Concat(..) => 2,
            Node::Root(_) | Node::Not(_) | Node::Sort { .. } => 1,
            _ => 0,
        }
    }

    /// Owned child at `index`.
    pub fn child(&self, index: usize) -> &Node {
        match (self, index) {
            (
                Node::And(left, _) | Node::Or(left, _) | Node::Minus(left, _) | Node::Concat(left, _),
                0,
            ) => left,
            (
                Node::And(_, right)
                | Node::Or(_, right)
                | Node::Minus(_, right)
                | Node::Concat(_, right),
                1,
            ) => right,
            (Node::Root(child) | Node::Not(child) | Node::Sort { child, .. }, 0) => child,
            _ => panic!("{} node has no child at index {index}", self.simple_name()),
        }
    }

    /// Mutable access to the owned child at `index`.
    pub fn child_mut(&mut self, index: usize) -> &mut Node {
        assert!(
            index < self.child_count(),
            "{} node has no child at index {index}",
            self.simple_name()
        );
        match (self, index) {
            (
                Node::And(left, _) | Node::Or(left, _) | Node::Minus(left, _) | Node::Concat(left, _),
                0,
            ) => left,
            (
                Node::And(_, right)
                | Node::Or(_, right)
                | Node::Minus(_, right)
                | Node::Concat(_, right),
                1,
            ) => right,
            (Node::Root(child) | Node::Not(child) | Node::Sort { child, .. }, 0) => child,
            _ => unreachable!(),
        }
    }

    /// Swaps in `replacement` for the child at `index` and returns the detached child.
    ///
    /// # Panics
    ///
    /// Panics when the node does not own a child at `index`; that is a bug in the rule
    /// or caller, never a data problem.
    pub fn replace_child(&mut self, index: usize, replacement: Node) -> Node {
        std::mem::replace(self.child_mut(index), replacement)
    }

    /// Height of the tree; leaves have depth 1.
    pub fn depth(&self) -> usize {
        1 + (0..self.child_count())
            .map(|idx| self.child(idx).depth())
            .max()
            .unwrap_or(0)
    }

    /// Whether the node's result already spans the type hierarchy, so evaluating it once
    /// per concrete subtype would be wrong.
    ///
    /// Combinators are polymorphic only when every operand is.
    pub fn polymorphic(&self) -> bool {
        match self {
            Node::GetLinks { .. } => true,
            Node::Custom(leaf) => leaf.polymorphic(),
            Node::Root(child) | Node::Sort { child, .. } => child.polymorphic(),
            Node::And(l, r) | Node::Or(l, r) | Node::Minus(l, r) | Node::Concat(l, r) => {
                l.polymorphic() && r.polymorphic()
            }
            _ => false,
        }
    }

    /// Whether any node of the tree is polymorphic.
    pub fn contains_polymorphic(&self) -> bool {
        self.polymorphic()
            || (0..self.child_count()).any(|idx| self.child(idx).contains_polymorphic())
    }

    /// Canonical structural encoding of the subtree.
    pub fn handle(&self) -> String {
        let mut out = String::with_capacity(64);
        self.write_handle(&mut out);
        out
    }

    /// Appends the canonical encoding to `out`.
    ///
    /// Strings are length-prefixed, and the operands of commutative nodes are written in
    /// sorted order so that `and(a, b)` and `and(b, a)` share a handle.
    pub fn write_handle(&self, out: &mut String) {
        out.push_str(self.simple_name());
        out.push('(');
        match self {
            Node::GetLinks { from, link } => {
                let _ = write!(out, "{from},");
                write_str(out, link);
            }
            Node::PropertyEqual { name, value } => {
                write_str(out, name);
                out.push(',');
                write_value(out, value.as_ref());
            }
            Node::PropertyRange { name, min, max } => {
                write_str(out, name);
                out.push(',');
                min.write_handle(out);
                out.push(',');
                max.write_handle(out);
            }
            Node::PropertyStartsWith { name, prefix } => {
                write_str(out, name);
                out.push(',');
                write_str(out, prefix);
            }
            Node::PropertyNotNull { name } | Node::LinkNotNull { name } => write_str(out, name),
            Node::LinkEqual { name, target } => {
                write_str(out, name);
                match target {
                    Some(target) => {
                        let _ = write!(out, ",{target}");
                    }
                    None => out.push_str(",n"),
                }
            }
            Node::LinksEqualDecorator {
                link,
                decorated,
                link_entity_type,
            } => {
                write_str(out, link);
                out.push(',');
                write_str(out, link_entity_type);
                out.push(',');
                decorated.write_handle(out);
            }
            Node::And(left, right) | Node::Or(left, right) => {
                let mut a = left.handle();
                let mut b = right.handle();
                if b < a {
                    std::mem::swap(&mut a, &mut b);
                }
                out.push_str(&a);
                out.push(',');
                out.push_str(&b);
            }
            Node::Minus(left, right) | Node::Concat(left, right) => {
                left.write_handle(out);
                out.push(',');
                right.write_handle(out);
            }
            Node::Root(child) | Node::Not(child) => child.write_handle(out),
            Node::Sort { order, child } => {
                order.write_handle(out);
                out.push(',');
                child.write_handle(out);
            }
            Node::Custom(leaf) => leaf.write_handle(out),
            Node::Wildcard(slot) => {
                let _ = write!(out, "{}", slot.0);
            }
            Node::Conversion(cw) => {
                let _ = write!(out, "{}:{}", cw.slot.0, cw.name);
            }
            Node::GetAll => {}
        }
        out.push(')');
    }
}

fn write_str(out: &mut String, value: &str) {
    let _ = write!(out, "{}:{value}", value.len());
}

fn write_value(out: &mut String, value: Option<&Value>) {
    match value {
        Some(value) => value.write_handle(out),
        None => out.push('n'),
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Root(a), Node::Root(b)) | (Node::Not(a), Node::Not(b)) => a == b,
            (Node::GetAll, Node::GetAll) => true,
            (
                Node::GetLinks { from, link },
                Node::GetLinks {
                    from: other_from,
                    link: other_link,
                },
            ) => from == other_from && link == other_link,
            (
                Node::PropertyEqual { name, value },
                Node::PropertyEqual {
                    name: other_name,
                    value: other_value,
                },
            ) => name == other_name && value == other_value,
            (
                Node::PropertyRange { name, min, max },
                Node::PropertyRange {
                    name: other_name,
                    min: other_min,
                    max: other_max,
                },
            ) => name == other_name && min == other_min && max == other_max,
            (
                Node::PropertyStartsWith { name, prefix },
                Node::PropertyStartsWith {
                    name: other_name,
                    prefix: other_prefix,
                },
            ) => name == other_name && prefix == other_prefix,
            (Node::PropertyNotNull { name }, Node::PropertyNotNull { name: other })
            | (Node::LinkNotNull { name }, Node::LinkNotNull { name: other }) => name == other,
            (
                Node::LinkEqual { name, target },
                Node::LinkEqual {
                    name: other_name,
                    target: other_target,
                },
            ) => name == other_name && target == other_target,
            (
                Node::LinksEqualDecorator {
                    link,
                    decorated,
                    link_entity_type,
                },
                Node::LinksEqualDecorator {
                    link: other_link,
                    decorated: other_decorated,
                    link_entity_type: other_type,
                },
            ) => link == other_link && link_entity_type == other_type && decorated == other_decorated,
            (Node::And(a, b), Node::And(c, d)) | (Node::Or(a, b), Node::Or(c, d)) => {
                (a == c && b == d) || (a == d && b == c)
            }
            (Node::Minus(a, b), Node::Minus(c, d)) | (Node::Concat(a, b), Node::Concat(c, d)) => {
                a == c && b == d
            }
            (
                Node::Sort { order, child },
                Node::Sort {
                    order: other_order,
                    child: other_child,
                },
            ) => order == other_order && child == other_child,
            (Node::Custom(a), Node::Custom(b)) => Arc::ptr_eq(a, b) || self.handle() == other.handle(),
            (Node::Wildcard(a), Node::Wildcard(b)) => a == b,
            (Node::Conversion(a), Node::Conversion(b)) => a.slot == b.slot && a.name == b.name,
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.handle())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.handle())
    }
}

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// Emits a rate-limited `query.tree.deep` warning when `tree` is deeper than `threshold`.
///
/// At most one warning is logged per `interval` across the whole process. Returns
/// whether a warning was emitted.
pub fn warn_if_deep(tree: &Node, threshold: usize, interval: Duration) -> bool {
    static LAST_WARNING_MS: AtomicU64 = AtomicU64::new(0);

    if threshold == 0 {
        return false;
    }
    let depth = tree.depth();
    if depth <= threshold {
        return false;
    }
    let now_ms = process_start().elapsed().as_millis() as u64 + 1;
    let last = LAST_WARNING_MS.load(Ordering::Relaxed);
    if last != 0 && now_ms.saturating_sub(last) < interval.as_millis() as u64 {
        return false;
    }
    if LAST_WARNING_MS
        .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        return false;
    }
    warn!(depth, threshold, tree = %tree, "query.tree.deep");
    true
}
