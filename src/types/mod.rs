//! Identifier newtypes and the crate-wide error type.

use std::fmt;

/// Numeric identifier of a concrete entity type inside a backend.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);

/// Identity of a stored entity.
///
/// Ordering is by type first and local id second, which is the "ordering by id" that
/// backend-native sequences report through `is_sorted_by_id`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EntityId {
    /// Concrete type of the entity.
    pub type_id: TypeId,
    /// Identifier unique within `type_id`.
    pub local_id: u64,
}

impl EntityId {
    /// Creates a new entity identifier.
    pub const fn new(type_id: TypeId, local_id: u64) -> Self {
        Self { type_id, local_id }
    }
}

/// Errors surfaced by the query layer.
///
/// Backend failures travel through these variants unchanged; the query layer never
/// retries or suppresses them.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SombraError {
    /// Requested entity or object does not exist.
    #[error("not found")]
    NotFound,
    /// Entity type is not known to the backend.
    #[error("unknown entity type '{0}'")]
    UnknownType(String),
    /// Failure reported by the storage backend.
    #[error("backend: {0}")]
    Backend(String),
    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SombraError>;

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.type_id.0, self.local_id)
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}
