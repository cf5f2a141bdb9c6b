#![allow(missing_docs)]

mod support;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_entity_query::query::metadata::Cardinality;
use sombra_entity_query::query::sort::InMemorySortKind;
use sombra_entity_query::query::{
    EntitySeq, InMemoryMetadata, Node, QueryEngineConfig, SortConfig,
};
use sombra_entity_query::types::{EntityId, Result};

use support::{flat_schema, issue_schema, Fixture, Prop};

fn sized(fx: &Fixture, entity_type: &str, sizes: &[i64]) -> Vec<EntityId> {
    sizes
        .iter()
        .map(|size| fx.entity(entity_type, &[("size", Prop::Int(*size))]))
        .collect()
}

#[test]
fn issues_sort_by_size_in_both_directions() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    sized(&fx, "Issue", &[5, 1, 3]);
    let asc = fx
        .engine
        .query("Issue", Node::sort_by(Node::GetAll, "size", true));
    assert_eq!(fx.ints(&asc, "size")?, vec![1, 3, 5]);
    let desc = fx
        .engine
        .query("Issue", Node::sort_by(Node::GetAll, "size", false));
    assert_eq!(fx.ints(&desc, "size")?, vec![5, 3, 1]);
    Ok(())
}

#[test]
fn missing_values_sort_last_ascending_and_first_descending() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    let ids = sized(&fx, "Issue", &[2, 1]);
    let blank = fx.entity("Issue", &[]);
    let asc = fx
        .engine
        .query("Issue", Node::sort_by(Node::GetAll, "size", true))
        .to_vec()?;
    assert_eq!(asc, vec![ids[1], ids[0], blank]);
    let desc = fx
        .engine
        .query("Issue", Node::sort_by(Node::GetAll, "size", false))
        .to_vec()?;
    assert_eq!(desc, vec![blank, ids[0], ids[1]]);
    Ok(())
}

#[test]
fn subtype_extents_are_merged_in_key_order() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    sized(&fx, "Issue", &[4]);
    sized(&fx, "Bug", &[1, 6]);
    sized(&fx, "Feature", &[3]);
    let before = fx.backend.counters();
    let asc = fx
        .engine
        .query("Issue", Node::sort_by(Node::GetAll, "size", true));
    assert_eq!(fx.ints(&asc, "size")?, vec![1, 3, 4, 6]);
    assert_eq!(fx.backend.counters().merge_sorted - before.merge_sorted, 1);

    let open_desc = fx
        .engine
        .query("Issue", Node::sort_by(Node::range("size", 2i64, 9i64), "size", false));
    assert_eq!(fx.ints(&open_desc, "size")?, vec![6, 4, 3]);
    Ok(())
}

struct Owners {
    fx: Fixture,
    ann: EntityId,
    bob: EntityId,
    carol: EntityId,
    unowned: EntityId,
}

fn owners(config: QueryEngineConfig) -> Owners {
    let fx = Fixture::with_config(flat_schema(), config);
    let carol_user = fx.entity("User", &[("name", Prop::Str("carol"))]);
    let ann_user = fx.entity("User", &[("name", Prop::Str("ann"))]);
    let bob_user = fx.entity("User", &[("name", Prop::Str("Bob"))]);
    let bob = fx.entity("Issue", &[]);
    let carol = fx.entity("Issue", &[]);
    let unowned = fx.entity("Issue", &[]);
    let ann = fx.entity("Issue", &[]);
    fx.link(bob, "owner", bob_user);
    fx.link(carol, "owner", carol_user);
    fx.link(ann, "owner", ann_user);
    Owners {
        fx,
        ann,
        bob,
        carol,
        unowned,
    }
}

fn by_owner_name(ascending: bool) -> Node {
    Node::sort_by_link(Node::GetAll, "User", "name", "owner", ascending)
}

fn eager_link_sort() -> QueryEngineConfig {
    QueryEngineConfig {
        sort: SortConfig {
            min_entries_for_link_sort: 1,
            ..SortConfig::default()
        },
        ..QueryEngineConfig::default()
    }
}

#[test]
fn link_sort_follows_the_sorted_targets() -> Result<()> {
    let o = owners(eager_link_sort());
    let before = o.fx.backend.counters();
    let asc = o.fx.engine.query("Issue", by_owner_name(true)).to_vec()?;
    assert_eq!(asc, vec![o.ann, o.bob, o.carol, o.unowned]);
    let desc = o.fx.engine.query("Issue", by_owner_name(false)).to_vec()?;
    assert_eq!(desc, vec![o.unowned, o.carol, o.bob, o.ann]);
    assert_eq!(o.fx.backend.counters().sort_links - before.sort_links, 2);
    Ok(())
}

#[test]
fn unsupported_link_sort_falls_back_to_memory() -> Result<()> {
    let o = owners(eager_link_sort());
    o.fx.backend.set_sort_links_supported(false);
    let asc = o.fx.engine.query("Issue", by_owner_name(true)).to_vec()?;
    assert_eq!(asc, vec![o.ann, o.bob, o.carol, o.unowned]);
    let desc = o.fx.engine.query("Issue", by_owner_name(false)).to_vec()?;
    assert_eq!(desc, vec![o.unowned, o.carol, o.bob, o.ann]);
    Ok(())
}

#[test]
fn small_sources_skip_the_link_sort() -> Result<()> {
    let o = owners(QueryEngineConfig::default());
    let before = o.fx.backend.counters();
    let asc = o.fx.engine.query("Issue", by_owner_name(true)).to_vec()?;
    assert_eq!(asc, vec![o.ann, o.bob, o.carol, o.unowned]);
    assert_eq!(o.fx.backend.counters().sort_links, before.sort_links);
    Ok(())
}

#[test]
fn oversized_materialized_sources_read_the_sorted_extent() -> Result<()> {
    let config = QueryEngineConfig {
        sort: SortConfig {
            max_in_memory: 2,
            ..SortConfig::default()
        },
        ..QueryEngineConfig::default()
    };
    let fx = Fixture::with_config(flat_schema(), config);
    let ids = sized(&fx, "Issue", &[5, 1, 3, 4]);
    let sorter = fx.engine.sort_engine();

    let small = EntitySeq::from_ids(vec![ids[0], ids[2]]);
    let sorted = sorter.sort_by_property("Issue", "size", Some(&small), true)?;
    assert_eq!(sorted.to_vec()?, vec![ids[2], ids[0]]);

    let before = fx.backend.counters();
    let large = EntitySeq::from_ids(vec![ids[0], ids[2], ids[0], ids[3]]);
    let sorted = sorter.sort_by_property("Issue", "size", Some(&large), true)?;
    assert_eq!(sorted.to_vec()?, vec![ids[2], ids[3], ids[0], ids[0]]);
    assert_eq!(
        fx.backend.counters().sort_by_property - before.sort_by_property,
        1,
        "one read of the sorted extent"
    );
    Ok(())
}

#[test]
fn hoisted_sort_matches_sorting_the_filtered_result() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..64 {
        let state = if rng.gen_bool(0.5) { "open" } else { "closed" };
        fx.entity(
            "Issue",
            &[("state", Prop::Str(state)), ("size", Prop::Int(rng.gen_range(0..8)))],
        );
    }
    let filter = Node::property_equal("state", "open");
    let tree = Node::sort_by(filter.clone(), "size", true);
    assert!(!fx.engine.optimize(&tree).sorts.is_empty());

    let optimized = fx.engine.query("Issue", tree.clone()).to_vec()?;
    let unoptimized = tree.instantiate("Issue", &fx.engine)?.to_vec()?;

    let filtered = fx.engine.query("Issue", filter);
    let mut literal: Vec<(i64, EntityId)> = fx
        .ints(&filtered, "size")?
        .into_iter()
        .zip(filtered.to_vec()?)
        .collect();
    literal.sort_by_key(|(size, _)| *size);
    let literal: Vec<EntityId> = literal.into_iter().map(|(_, id)| id).collect();

    assert_eq!(optimized, literal);
    assert_eq!(unoptimized, literal);
    Ok(())
}

#[test]
fn every_in_memory_strategy_is_stable() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let sizes: Vec<i64> = (0..200).map(|_| rng.gen_range(0..10)).collect();
    let mut expected: Option<Vec<EntityId>> = None;
    for kind in [
        InMemorySortKind::Merge,
        InMemorySortKind::Stable,
        InMemorySortKind::Heap,
    ] {
        let config = QueryEngineConfig {
            sort: SortConfig {
                in_memory: kind,
                ..SortConfig::default()
            },
            ..QueryEngineConfig::default()
        };
        let fx = Fixture::with_config(flat_schema(), config);
        let ids = sized(&fx, "Issue", &sizes);
        let sorter = fx.engine.sort_engine();
        let key = sorter.property_getter("size");
        let sorted = sorter.sort_in_memory(&ids, &key, false)?;

        let mut reference: Vec<(i64, EntityId)> = sizes.iter().copied().zip(ids).collect();
        reference.sort_by(|a, b| b.0.cmp(&a.0));
        let reference: Vec<EntityId> = reference.into_iter().map(|(_, id)| id).collect();
        assert_eq!(sorted, reference, "{kind:?}");
        match &expected {
            Some(previous) => assert_eq!(previous, &sorted),
            None => expected = Some(sorted),
        }
    }
    Ok(())
}

#[test]
fn entities_outside_the_sorted_hierarchy_keep_the_null_position() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let user = fx.entity("User", &[]);
    let issue = fx.entity("Issue", &[("size", Prop::Int(3))]);
    let tag = fx.entity("Tag", &[]);
    let bug = fx.entity("Bug", &[("size", Prop::Int(1))]);
    for target in [issue, tag, bug] {
        fx.link(user, "assigned", target);
    }
    let assigned = Node::get_links(user, "assigned");
    let asc = fx
        .engine
        .query("Issue", Node::sort_by(assigned.clone(), "size", true));
    assert_eq!(asc.to_vec()?, vec![bug, issue, tag]);
    let desc = fx
        .engine
        .query("Issue", Node::sort_by(assigned, "size", false));
    assert_eq!(desc.to_vec()?, vec![tag, issue, bug]);
    Ok(())
}

#[test]
fn oversized_mixed_sources_keep_entities_outside_the_extent() -> Result<()> {
    let config = QueryEngineConfig {
        sort: SortConfig {
            max_in_memory: 1,
            ..SortConfig::default()
        },
        ..QueryEngineConfig::default()
    };
    let fx = Fixture::with_config(issue_schema(), config);
    let issue = fx.entity("Issue", &[("size", Prop::Int(3))]);
    let tag = fx.entity("Tag", &[]);
    let bug = fx.entity("Bug", &[("size", Prop::Int(1))]);
    let source = EntitySeq::from_ids(vec![tag, issue, bug]);
    let sorted = fx
        .engine
        .sort_engine()
        .sort_by_property("Issue", "size", Some(&source), true)?;
    assert_eq!(sorted.to_vec()?, vec![bug, issue, tag]);
    Ok(())
}

struct Watched {
    fx: Fixture,
    issues: Vec<EntityId>,
}

/// Issues watched by several users, some of whom have no name.
fn watched(config: QueryEngineConfig) -> Watched {
    let metadata =
        InMemoryMetadata::new().with_link("Issue", "watchers", "User", Cardinality::Multiple);
    let fx = Fixture::with_config(metadata, config);
    let ann = fx.entity("User", &[("name", Prop::Str("ann"))]);
    let bob = fx.entity("User", &[("name", Prop::Str("Bob"))]);
    let carol = fx.entity("User", &[("name", Prop::Str("carol"))]);
    let nameless = fx.entity("User", &[]);
    let watchers: [&[EntityId]; 5] = [&[carol, nameless], &[bob], &[ann, carol], &[nameless], &[]];
    let issues = watchers
        .iter()
        .map(|users| {
            let issue = fx.entity("Issue", &[]);
            for user in *users {
                fx.link(issue, "watchers", *user);
            }
            issue
        })
        .collect();
    Watched { fx, issues }
}

fn by_watcher_name(ascending: bool) -> Node {
    Node::sort_by_link(Node::GetAll, "User", "name", "watchers", ascending)
}

fn assert_watcher_order(w: &Watched) -> Result<()> {
    let i = &w.issues;
    let asc = w.fx.engine.query("Issue", by_watcher_name(true)).to_vec()?;
    assert_eq!(asc, vec![i[2], i[1], i[0], i[3], i[4]], "first name ascending");
    let desc = w.fx.engine.query("Issue", by_watcher_name(false)).to_vec()?;
    assert_eq!(desc, vec![i[3], i[4], i[0], i[2], i[1]], "last name descending");
    Ok(())
}

#[test]
fn multi_valued_link_sort_ranks_by_the_best_named_target() -> Result<()> {
    let w = watched(eager_link_sort());
    let before = w.fx.backend.counters();
    assert_watcher_order(&w)?;
    assert_eq!(w.fx.backend.counters().sort_links - before.sort_links, 2);

    let w = watched(eager_link_sort());
    w.fx.backend.set_sort_links_supported(false);
    assert_watcher_order(&w)
}
