//! Pattern matching and substitution over query trees.
//!
//! Rewrite rules are written as ordinary [`Node`] trees whose leaves may be
//! [`Node::Wildcard`] or [`Node::Conversion`] placeholders. Placeholders are identified
//! by a numeric slot, never by object identity.

use std::fmt;

use smallvec::SmallVec;

use super::{Node, NodeClass};

/// Identifier of a placeholder within one rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct WildcardSlot(pub u8);

/// Placeholder that binds one node class, checks a side predicate, and rewrites the bound
/// node when substituted.
#[derive(Clone, Copy)]
pub struct ConversionWildcard {
    /// Slot the bound node is recorded under.
    pub slot: WildcardSlot,
    /// Name written into handles and diagnostics.
    pub name: &'static str,
    /// Required node class.
    pub class: NodeClass,
    /// Side predicate on the candidate node.
    pub accepts: fn(&Node) -> bool,
    /// Transform applied to the bound node on substitution.
    pub convert: fn(&Node) -> Node,
}

impl fmt::Debug for ConversionWildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionWildcard")
            .field("slot", &self.slot)
            .field("name", &self.name)
            .field("class", &self.class)
            .finish()
    }
}

/// Wildcard bindings collected while matching one rule against one subtree.
#[derive(Default)]
pub struct MatchContext<'a> {
    bindings: SmallVec<[(WildcardSlot, &'a Node); 8]>,
}

impl<'a> MatchContext<'a> {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Node bound to `slot`, if any.
    pub fn get(&self, slot: WildcardSlot) -> Option<&'a Node> {
        self.bindings
            .iter()
            .find(|(bound, _)| *bound == slot)
            .map(|(_, node)| *node)
    }

    /// Binds `slot` on first use; later uses must be structurally equal.
    fn bind(&mut self, slot: WildcardSlot, node: &'a Node) -> bool {
        match self.get(slot) {
            Some(bound) => bound == node,
            None => {
                self.bindings.push((slot, node));
                true
            }
        }
    }
}

/// Matches `node` against `pattern`, recording bindings in `ctx`.
///
/// Leaves of the pattern that are not placeholders must equal the node exactly; inner
/// pattern nodes require the same class and attributes with children matched in order.
pub fn matches<'a>(node: &'a Node, pattern: &Node, ctx: &mut MatchContext<'a>) -> bool {
    match pattern {
        Node::Wildcard(slot) => ctx.bind(*slot, node),
        Node::Conversion(cw) => {
            node.class() == cw.class && (cw.accepts)(node) && ctx.bind(cw.slot, node)
        }
        _ => {
            if node.class() != pattern.class() {
                return false;
            }
            let arity = pattern.child_count();
            if arity == 0 {
                return node == pattern;
            }
            if !same_attributes(node, pattern) {
                return false;
            }
            (0..arity).all(|idx| matches(node.child(idx), pattern.child(idx), ctx))
        }
    }
}

fn same_attributes(node: &Node, pattern: &Node) -> bool {
    match (node, pattern) {
        (Node::Sort { order, .. }, Node::Sort { order: other, .. }) => order == other,
        _ => true,
    }
}

/// Builds a fresh tree from `destination`, replacing every placeholder with its binding.
///
/// # Panics
///
/// Panics when `destination` refers to a slot the source pattern never bound; such a rule
/// is malformed.
pub fn substitute(destination: &Node, ctx: &MatchContext<'_>) -> Node {
    match destination {
        Node::Wildcard(slot) => bound(ctx, *slot).clone(),
        Node::Conversion(cw) => (cw.convert)(bound(ctx, cw.slot)),
        _ => {
            let mut out = destination.clone();
            for idx in 0..destination.child_count() {
                out.replace_child(idx, substitute(destination.child(idx), ctx));
            }
            out
        }
    }
}

fn bound<'a>(ctx: &MatchContext<'a>, slot: WildcardSlot) -> &'a Node {
    match ctx.get(slot) {
        Some(node) => node,
        None => panic!("rewrite destination uses unbound wildcard slot {}", slot.0),
    }
}
