//! Term-rewriting optimizer for query trees.
//!
//! Optimization runs four [`OptimizationPlan`]s in a fixed order, each until a full pass
//! over the tree makes no rewrite:
//!
//! 1. `prepare` turns set differences into conjunctions with a negation and hoists sort
//!    nodes into a [`Sorts`] side list;
//! 2. `simplify` applies algebraic identities and merges property ranges;
//! 3. `negation` pushes negation toward the leaves and regenerates differences;
//! 4. `residual` replaces any remaining negation with a difference from the full extent.

use tracing::{trace, warn};

use crate::query::ast::pattern::{matches, substitute};
use crate::query::ast::{MatchContext, Node};

mod cache;
mod rules;
mod sorts;

pub use cache::{OptimizedTreeAndSorts, OptimizedTreeCache};
pub use sorts::{Sorts, MAX_SORTS};

/// Immutable source/destination pattern pair.
#[derive(Clone, Debug)]
pub struct OptimizationRule {
    /// Pattern the subtree must match.
    pub source: Node,
    /// Replacement built from the bindings.
    pub destination: Node,
}

impl OptimizationRule {
    /// Replacement for `node` when the rule applies.
    pub fn rewrite(&self, node: &Node) -> Option<Node> {
        let mut ctx = MatchContext::new();
        if matches(node, &self.source, &mut ctx) {
            Some(substitute(&self.destination, &ctx))
        } else {
            None
        }
    }
}

/// Ordered rule set plus its traversal mode.
#[derive(Clone, Debug)]
pub struct OptimizationPlan {
    name: &'static str,
    rules: Vec<OptimizationRule>,
    apply_on_enter: bool,
    hoist_sorts: bool,
}

impl OptimizationPlan {
    /// Empty plan. With `apply_on_enter` rules are tried on a node before its children are
    /// visited; otherwise after.
    pub fn new(name: &'static str, apply_on_enter: bool) -> Self {
        Self {
            name,
            rules: Vec::new(),
            apply_on_enter,
            hoist_sorts: false,
        }
    }

    /// Makes the plan detach sort nodes into the [`Sorts`] list.
    pub fn hoisting_sorts(mut self) -> Self {
        self.hoist_sorts = true;
        self
    }

    /// Plan name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Concrete rules in application order.
    pub fn rules(&self) -> &[OptimizationRule] {
        &self.rules
    }

    /// Adds a rule, expanding every commutative node of `source` into both operand orders.
    ///
    /// A source with `n` commutative nodes yields `2^n` concrete rules, so matching never
    /// needs to try operand swaps itself.
    pub fn add(&mut self, source: Node, destination: Node) {
        let commutative = count_commutative(&source);
        for mask in 0u32..(1u32 << commutative) {
            let mut variant = source.clone();
            let mut position = 0;
            flip_commutative(&mut variant, mask, &mut position);
            self.rules.push(OptimizationRule {
                source: variant,
                destination: destination.clone(),
            });
        }
    }

    /// Chainable [`OptimizationPlan::add`].
    pub fn with(mut self, source: Node, destination: Node) -> Self {
        self.add(source, destination);
        self
    }

    fn rewrite(&self, node: &Node) -> Option<Node> {
        self.rules.iter().find_map(|rule| rule.rewrite(node))
    }

    /// Runs the plan over the children of `node` to a fixpoint, consuming at most
    /// `budget` rewrites. Returns the number of rewrites and hoists performed.
    pub fn optimize(&self, node: &mut Node, sorts: &mut Sorts, budget: &mut usize) -> usize {
        let mut total = 0;
        loop {
            let changed = self.optimize_children(node, sorts, budget);
            total += changed;
            if changed == 0 || *budget == 0 {
                return total;
            }
        }
    }

    fn optimize_children(&self, node: &mut Node, sorts: &mut Sorts, budget: &mut usize) -> usize {
        let mut changed = 0;
        let mut idx = 0;
        while idx < node.child_count() {
            if !self.apply_on_enter {
                changed += self.optimize_children(node.child_mut(idx), sorts, budget);
            }
            if self.hoist_sorts && matches!(node.child(idx), Node::Sort { .. }) && !sorts.is_full()
            {
                if let Node::Sort { order, child } = node.replace_child(idx, Node::GetAll) {
                    sorts.push(order);
                    node.replace_child(idx, *child);
                }
                changed += 1;
                idx = 0;
                continue;
            }
            if *budget > 0 {
                if let Some(replacement) = self.rewrite(node.child(idx)) {
                    trace!(plan = self.name, from = %node.child(idx), to = %replacement, "query.optimize.rewrite");
                    node.replace_child(idx, replacement);
                    *budget -= 1;
                    changed += 1;
                    idx = 0;
                    continue;
                }
            }
            if self.apply_on_enter {
                changed += self.optimize_children(node.child_mut(idx), sorts, budget);
            }
            idx += 1;
        }
        changed
    }
}

fn count_commutative(node: &Node) -> u32 {
    let own = u32::from(node.is_commutative());
    own + (0..node.child_count())
        .map(|idx| count_commutative(node.child(idx)))
        .sum::<u32>()
}

fn flip_commutative(node: &mut Node, mask: u32, position: &mut u32) {
    if node.is_commutative() {
        if mask & (1 << *position) != 0 {
            if let Node::And(left, right) | Node::Or(left, right) = node {
                std::mem::swap(left, right);
            }
        }
        *position += 1;
    }
    for idx in 0..node.child_count() {
        flip_commutative(node.child_mut(idx), mask, position);
    }
}

const MAX_ROUNDS: usize = 8;

/// Runs the fixed plan sequence.
#[derive(Clone, Debug)]
pub struct Optimizer {
    plans: Vec<OptimizationPlan>,
    max_rewrites_per_plan: usize,
}

impl Optimizer {
    /// Optimizer with the standard plans.
    pub fn new(max_rewrites_per_plan: usize) -> Self {
        Self {
            plans: vec![
                rules::prepare(),
                rules::simplify(),
                rules::negation(),
                rules::residual(),
            ],
            max_rewrites_per_plan,
        }
    }

    /// Plans in execution order.
    pub fn plans(&self) -> &[OptimizationPlan] {
        &self.plans
    }

    /// Optimizes a private copy of `tree`, returning the rewritten tree and the sorts
    /// hoisted out of it.
    ///
    /// The plan sequence is repeated until a whole round leaves the tree unchanged, so
    /// optimizing the result again is a no-op.
    pub fn optimize(&self, tree: &Node) -> (Node, Sorts) {
        let mut root = Node::Root(Box::new(tree.clone()));
        let mut sorts = Sorts::new();
        for round in 1..=MAX_ROUNDS {
            let before = root.clone();
            self.run_plans(&mut root, &mut sorts, tree);
            if root == before {
                break;
            }
            if round == MAX_ROUNDS {
                warn!(rounds = MAX_ROUNDS, tree = %tree, "query.optimizer.no_fixpoint");
            }
        }
        let optimized = match root {
            Node::Root(child) => *child,
            other => other,
        };
        (optimized, sorts)
    }

    fn run_plans(&self, root: &mut Node, sorts: &mut Sorts, tree: &Node) {
        for plan in &self.plans {
            let mut budget = self.max_rewrites_per_plan;
            plan.optimize(root, sorts, &mut budget);
            if budget == 0 {
                warn!(
                    plan = plan.name(),
                    max_rewrites = self.max_rewrites_per_plan,
                    tree = %tree,
                    "query.optimizer.budget_exhausted"
                );
            }
        }
    }
}
