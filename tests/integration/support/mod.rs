#![allow(dead_code)]

use std::sync::{Arc, Once};

use sombra_entity_query::backend::memory::MemoryBackend;
use sombra_entity_query::backend::Backend;
use sombra_entity_query::query::metadata::Cardinality;
use sombra_entity_query::query::{EntitySeq, InMemoryMetadata, QueryEngine, QueryEngineConfig};
use sombra_entity_query::types::{EntityId, Result};

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Issue tracker schema: `Issue` with subtypes `Bug` and `Feature`, owned by a `User`.
pub fn issue_schema() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_subtype("Issue", "Bug")
        .with_subtype("Issue", "Feature")
        .with_link("Issue", "owner", "User", Cardinality::Single)
        .with_association(
            ("Issue", "tags", Cardinality::Multiple),
            ("Tag", "issues", Cardinality::Multiple),
        )
        .with_link("User", "assigned", "Issue", Cardinality::Multiple)
        .with_blob("Issue", "attachment")
}

/// Same schema without subtypes, for tests that want a single concrete type.
pub fn flat_schema() -> InMemoryMetadata {
    InMemoryMetadata::new().with_link("Issue", "owner", "User", Cardinality::Single)
}

pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub engine: QueryEngine,
}

impl Fixture {
    pub fn new(metadata: InMemoryMetadata) -> Self {
        Self::with_config(metadata, QueryEngineConfig::default())
    }

    pub fn with_config(metadata: InMemoryMetadata, config: QueryEngineConfig) -> Self {
        init_tracing();
        let backend = Arc::new(MemoryBackend::with_types([
            "Issue", "Bug", "Feature", "User", "Tag",
        ]));
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        let engine = QueryEngine::new(dyn_backend, Arc::new(metadata), config);
        Self { backend, engine }
    }

    /// Creates an entity with the given properties.
    pub fn entity(&self, entity_type: &str, props: &[(&str, Prop)]) -> EntityId {
        let id = self.backend.create_entity(entity_type);
        for (name, value) in props {
            let result = match value {
                Prop::Int(v) => self.backend.set_property(id, name, *v),
                Prop::Str(v) => self.backend.set_property(id, name, *v),
            };
            result.expect("entity exists");
        }
        id
    }

    pub fn link(&self, from: EntityId, link: &str, to: EntityId) {
        self.backend.add_link(from, link, to).expect("both entities exist");
    }

    /// Values of an integer property in iteration order.
    pub fn ints(&self, seq: &EntitySeq, prop: &str) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        for id in seq.to_vec()? {
            match self.backend.property(id, prop)? {
                Some(sombra_entity_query::query::Value::Int(v)) => out.push(v),
                other => panic!("{id} has no integer {prop}: {other:?}"),
            }
        }
        Ok(out)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Prop {
    Int(i64),
    Str(&'static str),
}

pub fn sorted(mut ids: Vec<EntityId>) -> Vec<EntityId> {
    ids.sort();
    ids
}
