#![allow(missing_docs)]

mod support;

use sombra_entity_query::query::profile::profile_snapshot;
use sombra_entity_query::query::Node;
use sombra_entity_query::types::Result;

use support::{issue_schema, Fixture, Prop};

// Profiling is switched on once per process, so this binary holds a single test.
#[test]
fn profile_counters_record_queries_and_reset() -> Result<()> {
    std::env::set_var("SOMBRA_PROFILE", "1");
    let fx = Fixture::new(issue_schema());
    for size in [3, 1, 2] {
        fx.entity("Bug", &[("size", Prop::Int(size))]);
    }
    let seq = fx.engine.query("Issue", Node::sort_by(Node::GetAll, "size", true));
    assert_eq!(fx.ints(&seq, "size")?, vec![1, 2, 3]);

    let snapshot = profile_snapshot(true).expect("profiling enabled");
    assert!(snapshot.optimize_count >= 1);
    assert!(snapshot.instantiate_count >= 1);
    assert!(snapshot.merge_count >= 1, "per-type extents are merged");

    let reset = profile_snapshot(false).expect("profiling enabled");
    assert_eq!(reset.optimize_count, 0);
    assert_eq!(reset.instantiate_count, 0);
    assert_eq!(reset.optimize_ns + reset.instantiate_ns, 0);
    Ok(())
}
