#![allow(missing_docs)]

mod support;

use std::sync::Arc;

use sombra_entity_query::backend::Backend;
use sombra_entity_query::query::{Node, QueryEngineConfig, SortOrder, Value};
use sombra_entity_query::types::{Result, SombraError};

use support::{flat_schema, issue_schema, sorted, Fixture, Prop};

#[test]
fn issues_without_owner_come_from_a_difference_with_all() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let user = fx.entity("User", &[]);
    let owned = fx.entity("Issue", &[]);
    let unowned = fx.entity("Issue", &[]);
    let unowned_bug = fx.entity("Bug", &[]);
    fx.link(owned, "owner", user);

    let tree = Node::and(Node::GetAll, Node::not(Node::link_not_null("owner")));
    let optimized = fx.engine.optimize(&tree);
    assert_eq!(
        optimized.tree,
        Node::minus(Node::GetAll, Node::link_not_null("owner"))
    );
    assert!(optimized.sorts.is_empty());

    let result = fx.engine.query("Issue", tree).to_vec()?;
    assert_eq!(result, vec![unowned, unowned_bug]);
    Ok(())
}

#[test]
fn overlapping_ranges_merge_into_their_intersection() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    for size in 0..10 {
        fx.entity("Issue", &[("size", Prop::Int(size))]);
    }
    let tree = Node::and(Node::range("size", 2i64, 6i64), Node::range("size", 4i64, 9i64));
    assert_eq!(fx.engine.optimize(&tree).tree, Node::range("size", 4i64, 6i64));
    let seq = fx.engine.query("Issue", tree);
    assert_eq!(fx.ints(&seq, "size")?, vec![4, 5, 6]);

    let disjoint = Node::and(Node::range("size", 1i64, 2i64), Node::range("size", 5i64, 6i64));
    assert!(fx.engine.query("Issue", disjoint).to_vec()?.is_empty());
    Ok(())
}

#[test]
fn queries_fan_out_over_subtypes() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let issue = fx.entity("Issue", &[("state", Prop::Str("open"))]);
    let bug = fx.entity("Bug", &[("state", Prop::Str("open"))]);
    let feature = fx.entity("Feature", &[("state", Prop::Str("closed"))]);
    fx.entity("Bug", &[("state", Prop::Str("closed"))]);

    let open = Node::property_equal("state", "open");
    assert_eq!(fx.engine.query("Issue", open.clone()).to_vec()?, vec![issue, bug]);
    assert_eq!(fx.engine.query("Bug", open).to_vec()?, vec![bug]);
    assert_eq!(
        fx.engine.query("Feature", Node::GetAll).to_vec()?,
        vec![feature]
    );
    assert_eq!(fx.engine.query("Issue", Node::GetAll).size()?, 4);
    Ok(())
}

#[test]
fn polymorphic_leaves_are_evaluated_once_and_deduplicated_when_mixed() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let user = fx.entity("User", &[]);
    let issue = fx.entity("Issue", &[("state", Prop::Str("open"))]);
    let bug = fx.entity("Bug", &[("state", Prop::Str("open"))]);
    fx.entity("Feature", &[("state", Prop::Str("open"))]);
    fx.link(user, "assigned", bug);
    fx.link(user, "assigned", issue);

    let assigned = Node::get_links(user, "assigned");
    assert_eq!(
        fx.engine.query("Issue", assigned.clone()).to_vec()?,
        vec![bug, issue],
        "link order is kept"
    );

    let open_and_assigned = Node::and(assigned.clone(), Node::property_equal("state", "open"));
    assert_eq!(
        sorted(fx.engine.query("Issue", open_and_assigned).to_vec()?),
        vec![issue, bug]
    );

    let assigned_or_closed = Node::or(assigned, Node::property_equal("state", "closed"));
    let result = fx.engine.query("Issue", assigned_or_closed).to_vec()?;
    assert_eq!(sorted(result), vec![issue, bug], "no duplicates across parts");
    Ok(())
}

#[test]
fn null_equality_and_blob_presence() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let titled = fx.entity("Issue", &[("title", Prop::Str("crash"))]);
    let untitled = fx.entity("Issue", &[]);
    let bug = fx.entity("Bug", &[]);
    fx.backend.set_blob(bug, "attachment", vec![1, 2, 3])?;

    let missing_title = fx.engine.query("Issue", Node::property_is_null("title"));
    assert_eq!(missing_title.to_vec()?, vec![untitled, bug]);
    let with_attachment = fx
        .engine
        .query("Issue", Node::property_not_null("attachment"));
    assert_eq!(with_attachment.to_vec()?, vec![bug]);
    let titled_only = fx.engine.query("Issue", Node::property_not_null("title"));
    assert_eq!(titled_only.to_vec()?, vec![titled]);
    Ok(())
}

#[test]
fn equivalent_trees_share_one_cache_entry() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    let user = fx.entity("User", &[]);
    for state in ["open", "closed", "open"] {
        let issue = fx.entity("Issue", &[("state", Prop::Str(state))]);
        fx.link(issue, "owner", user);
    }
    let open = Node::property_equal("state", "open");
    let owned = Node::link_not_null("owner");
    let cache = fx.engine.cache();

    let first = fx
        .engine
        .query("Issue", Node::and(open.clone(), owned.clone()))
        .to_vec()?;
    assert_eq!((cache.hits(), cache.misses()), (0, 1));
    let again = fx
        .engine
        .query("Issue", Node::and(open.clone(), owned.clone()))
        .to_vec()?;
    let swapped = fx.engine.query("Issue", Node::and(owned, open)).to_vec()?;
    assert_eq!((cache.hits(), cache.misses()), (2, 1));
    assert_eq!(cache.len(), 1);
    assert_eq!(first, again);
    assert_eq!(first, swapped);
    Ok(())
}

#[test]
fn disabled_cache_stores_nothing() -> Result<()> {
    let config = QueryEngineConfig {
        cache_capacity: 0,
        ..QueryEngineConfig::default()
    };
    let fx = Fixture::with_config(flat_schema(), config);
    fx.entity("Issue", &[("state", Prop::Str("open"))]);
    let tree = Node::property_equal("state", "open");
    assert_eq!(fx.engine.query("Issue", tree.clone()).to_vec()?.len(), 1);
    assert_eq!(fx.engine.query("Issue", tree).to_vec()?.len(), 1);
    assert!(!fx.engine.cache().is_enabled());
    assert_eq!(fx.engine.cache().len(), 0);
    assert_eq!(fx.engine.cache().hits(), 0);
    Ok(())
}

#[test]
fn getter_sorts_are_never_cached() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    for size in [2, 7, 4] {
        fx.entity("Issue", &[("size", Prop::Int(size))]);
    }
    let backend = Arc::clone(&fx.backend);
    let negated = SortOrder::getter(
        "negated size",
        move |id| {
            Ok(backend.property(id, "size")?.map(|value| match value {
                Value::Int(v) => Value::Int(-v),
                other => other,
            }))
        },
        true,
    );
    let tree = Node::sorted(Node::GetAll, negated);
    let seq = fx.engine.query("Issue", tree.clone());
    assert_eq!(fx.ints(&seq, "size")?, vec![7, 4, 2]);
    assert!(fx.engine.cache().find(&tree).is_none());
    Ok(())
}

#[test]
fn sorts_beyond_the_hoisting_limit_are_applied_in_place() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    for (size, rank) in [(3, 1), (1, 2), (3, 0), (2, 2)] {
        fx.entity("Issue", &[("size", Prop::Int(size)), ("rank", Prop::Int(rank))]);
    }
    // Innermost: rank ascending; then four size sorts, the last one descending.
    let mut tree = Node::sort_by(Node::GetAll, "rank", true);
    for ascending in [true, true, true, false] {
        tree = Node::sort_by(tree, "size", ascending);
    }
    let optimized = fx.engine.optimize(&tree);
    assert_eq!(optimized.sorts.len(), 4);
    assert_eq!(optimized.tree, Node::sort_by(Node::GetAll, "rank", true));

    let seq = fx.engine.query("Issue", tree);
    assert_eq!(fx.ints(&seq, "size")?, vec![3, 3, 2, 1]);
    assert_eq!(fx.ints(&seq, "rank")?, vec![0, 1, 2, 2]);
    Ok(())
}

#[test]
fn differences_with_a_polymorphic_side_subtract_across_the_hierarchy() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let user = fx.entity("User", &[]);
    let closed_issue = fx.entity("Issue", &[("state", Prop::Str("closed"))]);
    let open_bug = fx.entity("Bug", &[("state", Prop::Str("open"))]);
    let closed_bug = fx.entity("Bug", &[("state", Prop::Str("closed"))]);
    for target in [closed_issue, open_bug, closed_bug] {
        fx.link(user, "assigned", target);
    }
    let assigned = Node::get_links(user, "assigned");
    let closed = Node::property_equal("state", "closed");

    let still_open = Node::minus(assigned.clone(), closed.clone());
    assert_eq!(fx.engine.query("Issue", still_open).to_vec()?, vec![open_bug]);

    let not_closed = Node::and(assigned.clone(), Node::not(closed.clone()));
    assert_eq!(fx.engine.query("Issue", not_closed).to_vec()?, vec![open_bug]);

    let unassigned_closed = Node::minus(closed, assigned);
    assert!(fx.engine.query("Issue", unassigned_closed).to_vec()?.is_empty());
    Ok(())
}

#[test]
fn concatenation_trees_keep_each_side_whole() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let open_issue = fx.entity("Issue", &[("state", Prop::Str("open"))]);
    let closed_bug = fx.entity("Bug", &[("state", Prop::Str("closed"))]);
    let open_bug = fx.entity("Bug", &[("state", Prop::Str("open"))]);
    let closed_feature = fx.entity("Feature", &[("state", Prop::Str("closed"))]);

    let tree = Node::concat(
        Node::property_equal("state", "open"),
        Node::property_equal("state", "closed"),
    );
    assert_eq!(
        fx.engine.query("Issue", tree).to_vec()?,
        vec![open_issue, open_bug, closed_bug, closed_feature]
    );
    Ok(())
}

#[test]
fn sorting_the_whole_extent_reads_only_the_sorted_backend_extent() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let middle = fx.entity("Issue", &[("size", Prop::Int(2))]);
    let largest = fx.entity("Bug", &[("size", Prop::Int(3))]);
    let smallest = fx.entity("Feature", &[("size", Prop::Int(1))]);

    let before = fx.backend.counters();
    let seq = fx.engine.query("Issue", Node::sort_by(Node::GetAll, "size", true));
    assert_eq!(seq.to_vec()?, vec![smallest, middle, largest]);
    let after = fx.backend.counters();
    assert_eq!(after.all, before.all, "no unsorted extent is evaluated");
    assert_eq!(after.filters, before.filters);
    assert!(after.sort_by_property > before.sort_by_property);
    Ok(())
}

#[test]
fn backend_failures_reach_the_caller_unchanged() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let issue = fx.entity("Issue", &[("state", Prop::Str("open"))]);
    let seq = fx.engine.query("Issue", Node::property_equal("state", "open"));

    fx.backend.fail_with(Some("storage offline"));
    let err = seq.to_vec().unwrap_err();
    assert_eq!(err, SombraError::Backend("storage offline".into()));
    let sorted = fx.engine.query("Issue", Node::sort_by(Node::GetAll, "size", true));
    assert_eq!(
        sorted.to_vec().unwrap_err(),
        SombraError::Backend("storage offline".into())
    );

    fx.backend.fail_with(None);
    assert_eq!(seq.to_vec()?, vec![issue]);
    Ok(())
}
