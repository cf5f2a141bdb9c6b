//! Query algebra and optimizer for an embedded entity database.
//!
//! Queries are trees of [`query::ast::Node`] values evaluated lazily against a
//! [`backend::Backend`]. Trees are rewritten by a fixed sequence of optimization plans,
//! cached by structural handle, and evaluated across the entity type hierarchy. Set
//! operations between deferred queries fuse into larger trees before anything is
//! materialized.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod query;
pub mod types;
