//! Schema metadata consumed by the optimizer, tree-keeping sequences, and sort engine.
//!
//! Only three facts are needed: the entity type hierarchy, link cardinality with the
//! opposite association end, and whether a property is stored as a blob.

use std::collections::{HashMap, HashSet, VecDeque};

/// Number of targets a link may hold.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cardinality {
    /// At most one target.
    Single,
    /// Any number of targets.
    Multiple,
}

/// Description of the far end of a link.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssociationEnd {
    /// Entity type the link points at.
    pub target_type: String,
    /// Cardinality of the link on the source side.
    pub cardinality: Cardinality,
    /// Link on the target type that points back, if the association is bidirectional.
    pub opposite_link: Option<String>,
}

/// Declared storage kind of a property.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum PropertyKind {
    /// Comparable primitive value.
    #[default]
    Primitive,
    /// Binary large object.
    Blob,
}

/// Provides type-hierarchy and association facts to the query layer.
pub trait MetadataProvider: Send + Sync {
    /// Direct subtypes of an entity type.
    fn direct_subtypes(&self, entity_type: &str) -> Vec<String>;

    /// Every transitive subtype, breadth first, excluding `entity_type` itself.
    fn subtype_closure(&self, entity_type: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<String> = self.direct_subtypes(entity_type).into();
        while let Some(next) = queue.pop_front() {
            if next == entity_type || !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.direct_subtypes(&next));
            out.push(next);
        }
        out
    }

    /// Whether `entity_type` equals `ancestor` or transitively derives from it.
    fn is_subtype_of(&self, entity_type: &str, ancestor: &str) -> bool {
        entity_type == ancestor
            || self
                .subtype_closure(ancestor)
                .iter()
                .any(|sub| sub == entity_type)
    }

    /// Association end for a link declared on `entity_type`.
    fn association(&self, entity_type: &str, link: &str) -> Option<AssociationEnd>;

    /// Declared kind of a property.
    fn property_kind(&self, _entity_type: &str, _prop: &str) -> PropertyKind {
        PropertyKind::Primitive
    }
}

/// Simple in-memory metadata provider used for tests or prototyping.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetadata {
    subtypes: HashMap<String, Vec<String>>,
    associations: HashMap<(String, String), AssociationEnd>,
    blobs: HashSet<(String, String)>,
}

impl InMemoryMetadata {
    /// Creates a new empty in-memory metadata provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `child` as a direct subtype of `parent`.
    pub fn with_subtype(mut self, parent: impl Into<String>, child: impl Into<String>) -> Self {
        self.subtypes
            .entry(parent.into())
            .or_default()
            .push(child.into());
        self
    }

    /// Registers a one-directional link.
    pub fn with_link(
        mut self,
        entity_type: impl Into<String>,
        link: impl Into<String>,
        target_type: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        self.associations.insert(
            (entity_type.into(), link.into()),
            AssociationEnd {
                target_type: target_type.into(),
                cardinality,
                opposite_link: None,
            },
        );
        self
    }

    /// Registers a bidirectional association as two links that name each other.
    pub fn with_association(
        mut self,
        (source_type, link, cardinality): (&str, &str, Cardinality),
        (target_type, opposite, opposite_cardinality): (&str, &str, Cardinality),
    ) -> Self {
        self.associations.insert(
            (source_type.to_owned(), link.to_owned()),
            AssociationEnd {
                target_type: target_type.to_owned(),
                cardinality,
                opposite_link: Some(opposite.to_owned()),
            },
        );
        self.associations.insert(
            (target_type.to_owned(), opposite.to_owned()),
            AssociationEnd {
                target_type: source_type.to_owned(),
                cardinality: opposite_cardinality,
                opposite_link: Some(link.to_owned()),
            },
        );
        self
    }

    /// Declares a property as a blob.
    pub fn with_blob(mut self, entity_type: impl Into<String>, prop: impl Into<String>) -> Self {
        self.blobs.insert((entity_type.into(), prop.into()));
        self
    }

    fn supertypes_of(&self, entity_type: &str) -> impl Iterator<Item = &str> + '_ {
        let mut chain = Vec::new();
        let mut current = entity_type.to_owned();
        while let Some(parent) = self
            .subtypes
            .iter()
            .find(|(_, children)| children.iter().any(|c| *c == current))
            .map(|(parent, _)| parent.as_str())
        {
            if chain.contains(&parent) || parent == entity_type {
                break;
            }
            chain.push(parent);
            current = parent.to_owned();
        }
        chain.into_iter()
    }
}

impl MetadataProvider for InMemoryMetadata {
    fn direct_subtypes(&self, entity_type: &str) -> Vec<String> {
        self.subtypes.get(entity_type).cloned().unwrap_or_default()
    }

    fn association(&self, entity_type: &str, link: &str) -> Option<AssociationEnd> {
        let key = (entity_type.to_owned(), link.to_owned());
        if let Some(end) = self.associations.get(&key) {
            return Some(end.clone());
        }
        // Links declared on a supertype apply to its subtypes.
        self.supertypes_of(entity_type).find_map(|parent| {
            self.associations
                .get(&(parent.to_owned(), link.to_owned()))
                .cloned()
        })
    }

    fn property_kind(&self, entity_type: &str, prop: &str) -> PropertyKind {
        let declared = |ty: &str| self.blobs.contains(&(ty.to_owned(), prop.to_owned()));
        if declared(entity_type) || self.supertypes_of(entity_type).any(declared) {
            PropertyKind::Blob
        } else {
            PropertyKind::Primitive
        }
    }
}
