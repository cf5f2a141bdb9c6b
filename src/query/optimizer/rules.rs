//! The standard optimization plans.

use std::cmp::Ordering;

use crate::query::ast::{ConversionWildcard, Node, NodeClass, WildcardSlot};

use super::OptimizationPlan;

const A: Node = Node::Wildcard(WildcardSlot(0));
const B: Node = Node::Wildcard(WildcardSlot(1));
const C: Node = Node::Wildcard(WildcardSlot(2));
const D: Node = Node::Wildcard(WildcardSlot(3));

/// `a - b` becomes `a & !b`; sort nodes are hoisted on the way down.
pub(super) fn prepare() -> OptimizationPlan {
    OptimizationPlan::new("prepare", true)
        .hoisting_sorts()
        .with(Node::minus(A, B), Node::and(A, Node::not(B)))
}

/// Distribution, `ALL` identities, regrouping, and range merging; applied bottom-up.
pub(super) fn simplify() -> OptimizationPlan {
    let range_merge = Node::Conversion(ConversionWildcard {
        slot: WildcardSlot(0),
        name: "merge_ranges",
        class: NodeClass::And,
        accepts: mergeable_ranges,
        convert: merge_ranges,
    });
    OptimizationPlan::new("simplify", false)
        .with(
            Node::and(Node::or(A, B), Node::or(A, C)),
            Node::or(A, Node::and(B, C)),
        )
        .with(
            Node::or(Node::and(A, B), Node::and(A, C)),
            Node::and(A, Node::or(B, C)),
        )
        .with(Node::and(Node::GetAll, A), A)
        .with(Node::or(Node::GetAll, A), Node::GetAll)
        .with(
            Node::or(Node::and(A, B), Node::or(Node::and(A, C), D)),
            Node::or(Node::and(A, Node::or(B, C)), D),
        )
        .with(range_merge.clone(), range_merge)
}

/// Pushes negation toward the leaves and turns `a & !b` back into `a - b`.
pub(super) fn negation() -> OptimizationPlan {
    let null_property = Node::Conversion(ConversionWildcard {
        slot: WildcardSlot(0),
        name: "null_property",
        class: NodeClass::PropertyEqual,
        accepts: |node| matches!(node, Node::PropertyEqual { value: None, .. }),
        convert: |node| match node {
            Node::PropertyEqual { name, .. } => Node::not(Node::property_not_null(name.clone())),
            other => other.clone(),
        },
    });
    let null_link = Node::Conversion(ConversionWildcard {
        slot: WildcardSlot(0),
        name: "null_link",
        class: NodeClass::LinkEqual,
        accepts: |node| matches!(node, Node::LinkEqual { target: None, .. }),
        convert: |node| match node {
            Node::LinkEqual { name, .. } => Node::not(Node::link_not_null(name.clone())),
            other => other.clone(),
        },
    });
    OptimizationPlan::new("negation", true)
        .with(Node::not(Node::not(A)), A)
        .with(
            Node::and(Node::not(A), Node::not(B)),
            Node::not(Node::or(A, B)),
        )
        .with(
            Node::or(Node::not(A), Node::not(B)),
            Node::not(Node::and(A, B)),
        )
        .with(Node::and(A, Node::not(B)), Node::minus(A, B))
        .with(Node::or(A, Node::not(B)), Node::not(Node::minus(B, A)))
        .with(Node::minus(Node::minus(A, B), B), Node::minus(A, B))
        .with(null_property.clone(), null_property)
        .with(null_link.clone(), null_link)
}

/// Any negation left over becomes a difference from the full extent.
pub(super) fn residual() -> OptimizationPlan {
    OptimizationPlan::new("residual", false).with(Node::not(A), Node::minus(Node::GetAll, A))
}

fn range_pair(node: &Node) -> Option<(&Node, &Node)> {
    match node {
        Node::And(left, right) => match (left.as_ref(), right.as_ref()) {
            (Node::PropertyRange { name: l, .. }, Node::PropertyRange { name: r, .. })
                if l == r =>
            {
                Some((left.as_ref(), right.as_ref()))
            }
            _ => None,
        },
        _ => None,
    }
}

fn mergeable_ranges(node: &Node) -> bool {
    match range_pair(node) {
        Some((
            Node::PropertyRange { min, max, .. },
            Node::PropertyRange {
                min: other_min,
                max: other_max,
                ..
            },
        )) => min.compare(other_min).is_some() && max.compare(other_max).is_some(),
        _ => false,
    }
}

fn merge_ranges(node: &Node) -> Node {
    match range_pair(node) {
        Some((
            Node::PropertyRange { name, min, max },
            Node::PropertyRange {
                min: other_min,
                max: other_max,
                ..
            },
        )) => {
            let min = match min.compare(other_min) {
                Some(Ordering::Less) => other_min,
                _ => min,
            };
            let max = match max.compare(other_max) {
                Some(Ordering::Greater) => other_max,
                _ => max,
            };
            Node::range(name.clone(), min.clone(), max.clone())
        }
        _ => node.clone(),
    }
}
