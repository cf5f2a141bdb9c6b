use tracing::trace;

use crate::query::engine::QueryEngine;
use crate::query::metadata::PropertyKind;
use crate::query::seq::EntitySeq;
use crate::types::Result;

use super::Node;

impl Node {
    /// Evaluates the subtree over `entity_type` and every one of its subtypes.
    ///
    /// Subtrees that look at one concrete type at a time are evaluated once per type and
    /// the parts combined. A subtree holding a polymorphic leaf, a concatenation or a sort
    /// is combined at its own level instead: a difference then subtracts from the whole
    /// hierarchy, and concatenated or sorted results are not interleaved per type.
    pub fn instantiate_hierarchy(
        &self,
        entity_type: &str,
        engine: &QueryEngine,
    ) -> Result<EntitySeq> {
        if self.polymorphic() {
            return self.instantiate(entity_type, engine);
        }
        if self.is_type_local() {
            return self.fan_out(entity_type, engine);
        }
        match self {
            Node::Root(child) => child.instantiate_hierarchy(entity_type, engine),
            Node::And(left, right) => {
                let l = left.instantiate_hierarchy(entity_type, engine)?;
                let r = right.instantiate_hierarchy(entity_type, engine)?;
                engine.intersect_non_trees(&l, &r)
            }
            Node::Or(left, right) => {
                let l = left.instantiate_hierarchy(entity_type, engine)?;
                let r = right.instantiate_hierarchy(entity_type, engine)?;
                engine.union_non_trees(&l, &r)
            }
            Node::Minus(left, right) => {
                let l = left.instantiate_hierarchy(entity_type, engine)?;
                if l.is_known_empty() {
                    return Ok(EntitySeq::Empty);
                }
                let r = right.instantiate_hierarchy(entity_type, engine)?;
                engine.exclude_non_trees(&l, &r)
            }
            Node::Concat(left, right) => {
                let l = left.instantiate_hierarchy(entity_type, engine)?;
                let r = right.instantiate_hierarchy(entity_type, engine)?;
                engine.concat_non_trees(&l, &r)
            }
            Node::Not(child) => {
                let all = Node::GetAll.fan_out(entity_type, engine)?;
                let excluded = child.instantiate_hierarchy(entity_type, engine)?;
                engine.exclude_non_trees(&all, &excluded)
            }
            Node::Sort { order, child } => {
                let source = child.instantiate_hierarchy(entity_type, engine)?;
                order.apply(entity_type, engine, Some(&source))
            }
            _ => self.fan_out(entity_type, engine),
        }
    }

    /// Whether evaluating per concrete type and combining the parts equals evaluating
    /// over the hierarchy at once.
    fn is_type_local(&self) -> bool {
        match self {
            Node::Concat(..) | Node::Sort { .. } => false,
            _ if self.polymorphic() => false,
            _ => (0..self.child_count()).all(|idx| self.child(idx).is_type_local()),
        }
    }

    fn fan_out(&self, entity_type: &str, engine: &QueryEngine) -> Result<EntitySeq> {
        let subtypes = engine.metadata().subtype_closure(entity_type);
        let mut parts = Vec::with_capacity(subtypes.len() + 1);
        parts.push(self.instantiate(entity_type, engine)?);
        for subtype in &subtypes {
            parts.push(self.instantiate(subtype, engine)?);
        }
        // Parts are disjoint; the union only keeps id order across them.
        let by_id = parts.iter().all(EntitySeq::is_sorted_by_id);
        trace!(entity_type, parts = parts.len(), by_id, "query.tree.fan_out");
        let mut parts = parts.into_iter();
        let mut result = parts.next().unwrap_or(EntitySeq::Empty);
        for part in parts {
            result = if by_id {
                engine.union_non_trees(&result, &part)?
            } else {
                engine.concat_non_trees(&result, &part)?
            };
        }
        Ok(result)
    }

    /// Evaluates the subtree for exactly `entity_type`.
    ///
    /// Leaves delegate to the backend, combinators to the engine's set algebra. Subtypes
    /// are covered by [`Node::instantiate_hierarchy`].
    ///
    /// # Panics
    ///
    /// Panics on pattern placeholders; they only exist inside rewrite rules.
    pub fn instantiate(&self, entity_type: &str, engine: &QueryEngine) -> Result<EntitySeq> {
        let backend = engine.backend();
        let seq = match self {
            Node::Root(child) => return child.instantiate(entity_type, engine),
            Node::GetAll => backend.all(entity_type)?,
            Node::GetLinks { from, link } => backend.links_of(*from, link)?,
            Node::PropertyEqual {
                name,
                value: Some(value),
            } => backend.property_equal(entity_type, name, value)?,
            Node::PropertyEqual { name, value: None } => {
                let all = EntitySeq::from(backend.all(entity_type)?);
                let set = Node::property_not_null(name.clone()).instantiate(entity_type, engine)?;
                return engine.exclude_non_trees(&all, &set);
            }
            Node::PropertyRange { name, min, max } => {
                backend.property_range(entity_type, name, min, max)?
            }
            Node::PropertyStartsWith { name, prefix } => {
                backend.property_starts_with(entity_type, name, prefix)?
            }
            Node::PropertyNotNull { name } => {
                match engine.metadata().property_kind(entity_type, name) {
                    PropertyKind::Blob => backend.blob_not_null(entity_type, name)?,
                    PropertyKind::Primitive => backend.property_not_null(entity_type, name)?,
                }
            }
            Node::LinkEqual {
                name,
                target: Some(target),
            } => backend.link_equal(entity_type, name, *target)?,
            Node::LinkEqual { name, target: None } => {
                let all = EntitySeq::from(backend.all(entity_type)?);
                let set = EntitySeq::from(backend.link_not_null(entity_type, name)?);
                return engine.exclude_non_trees(&all, &set);
            }
            Node::LinkNotNull { name } => backend.link_not_null(entity_type, name)?,
            Node::LinksEqualDecorator {
                link,
                decorated,
                link_entity_type,
            } => {
                let targets = engine.query(link_entity_type.clone(), (**decorated).clone());
                return engine.links_equal(entity_type, link, &targets);
            }
            Node::And(left, right) => {
                if let Node::LinksEqualDecorator { .. } = right.as_ref() {
                    return engine.and_links_equal(entity_type, left, right);
                }
                if let Node::LinksEqualDecorator { .. } = left.as_ref() {
                    return engine.and_links_equal(entity_type, right, left);
                }
                let l = left.instantiate(entity_type, engine)?;
                let r = right.instantiate(entity_type, engine)?;
                return engine.intersect_non_trees(&l, &r);
            }
            Node::Or(left, right) => {
                let l = left.instantiate(entity_type, engine)?;
                let r = right.instantiate(entity_type, engine)?;
                return engine.union_non_trees(&l, &r);
            }
            Node::Minus(left, right) => {
                let l = left.instantiate(entity_type, engine)?;
                if l.is_known_empty() {
                    return Ok(EntitySeq::Empty);
                }
                let r = right.instantiate(entity_type, engine)?;
                return engine.exclude_non_trees(&l, &r);
            }
            Node::Concat(left, right) => {
                let l = left.instantiate(entity_type, engine)?;
                let r = right.instantiate(entity_type, engine)?;
                return engine.concat_non_trees(&l, &r);
            }
            Node::Not(child) => {
                let all = EntitySeq::from(backend.all(entity_type)?);
                let excluded = child.instantiate(entity_type, engine)?;
                return engine.exclude_non_trees(&all, &excluded);
            }
            Node::Sort { order, child } => {
                let source = child.instantiate(entity_type, engine)?;
                return order.apply(entity_type, engine, Some(&source));
            }
            Node::Custom(leaf) => return leaf.instantiate(entity_type, engine),
            Node::Wildcard(_) | Node::Conversion(_) => {
                panic!("pattern placeholder {self} cannot be instantiated")
            }
        };
        Ok(EntitySeq::Backend(seq))
    }
}
