#![allow(missing_docs)]

mod support;

use sombra_entity_query::backend::Backend;
use sombra_entity_query::query::{EntitySeq, Node, QueryEngineConfig};
use sombra_entity_query::types::Result;

use support::{flat_schema, issue_schema, sorted, Fixture, Prop};

fn open_and_closed(fx: &Fixture) {
    let states = ["open", "closed", "open", "open", "closed"];
    for (i, state) in states.into_iter().enumerate() {
        fx.entity(
            "Issue",
            &[("state", Prop::Str(state)), ("size", Prop::Int(i as i64))],
        );
    }
}

#[test]
fn identities_hold_for_same_typed_queries() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    open_and_closed(&fx);
    let engine = &fx.engine;
    let open = || engine.query("Issue", Node::property_equal("state", "open"));
    let all = || engine.query("Issue", Node::GetAll);

    let x = open().to_vec()?;
    assert_eq!(x.len(), 3);
    assert_eq!(engine.intersect(&open(), &all())?.to_vec()?, x, "X and ALL is X");
    assert_eq!(
        engine.union(&open(), &all())?.to_vec()?,
        all().to_vec()?,
        "X or ALL is ALL"
    );
    assert!(engine.exclude(&open(), &open())?.to_vec()?.is_empty(), "X minus X");
    let seq = open();
    assert!(engine.exclude(&seq, &seq)?.is_known_empty());
    assert_eq!(engine.union(&open(), &EntitySeq::Empty)?.to_vec()?, x);

    let reversed = EntitySeq::from_ids(x.iter().rev().copied().collect());
    let concat = engine.concat(&EntitySeq::Empty, &reversed)?;
    assert!(concat.same_as(&reversed), "concat with empty returns the other side");
    assert_eq!(concat.to_vec()?, x.iter().rev().copied().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn intersecting_two_queries_on_one_instance_fuses_them() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    for (state, priority) in [("open", "high"), ("open", "low"), ("closed", "high")] {
        fx.entity(
            "Issue",
            &[("state", Prop::Str(state)), ("priority", Prop::Str(priority))],
        );
    }
    let instance = EntitySeq::Backend(fx.backend.all("Issue")?);
    let engine = &fx.engine;
    let open = engine.query_on(&instance, "Issue", Node::property_equal("state", "open"));
    let high = engine.query_on(&instance, "Issue", Node::property_equal("priority", "high"));
    assert!(open.as_tree().is_some() && high.as_tree().is_some());

    let before = fx.backend.counters();
    let both = engine.intersect(&open, &high)?;
    let fused = both.as_tree().expect("fused into one deferred query");
    assert_eq!(
        fused.source_tree(),
        &Node::and(
            Node::property_equal("state", "open"),
            Node::property_equal("priority", "high")
        )
    );
    assert_eq!(both.to_vec()?.len(), 1);
    let after = fx.backend.counters();
    assert_eq!(after.property_equal - before.property_equal, 2);
    assert_eq!(
        after.intersect - before.intersect,
        2,
        "one intersection for the fused tree, one against the instance"
    );
    Ok(())
}

#[test]
fn different_instances_do_not_fuse() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    open_and_closed(&fx);
    let engine = &fx.engine;
    let first = EntitySeq::Backend(fx.backend.all("Issue")?);
    let second = EntitySeq::Backend(fx.backend.all("Issue")?);
    let a = engine.query_on(&first, "Issue", Node::property_equal("state", "open"));
    let b = engine.query_on(&second, "Issue", Node::range("size", 0i64, 2i64));
    let both = engine.intersect(&a, &b)?;
    assert!(both.as_tree().is_none());
    assert_eq!(fx.ints(&both, "size")?, vec![0, 2]);
    Ok(())
}

#[test]
fn nested_query_on_a_deferred_query_splices_its_tree() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    open_and_closed(&fx);
    let engine = &fx.engine;
    let open = engine.query("Issue", Node::property_equal("state", "open"));
    let by_size = engine.query_on(&open, "Issue", Node::sort_by(Node::GetAll, "size", false));
    let tree = by_size.as_tree().expect("deferred");
    assert!(tree.instance().is_none(), "outer instance is inherited");
    assert_eq!(
        tree.source_tree(),
        &Node::sort_by(Node::property_equal("state", "open"), "size", false)
    );
    assert_eq!(fx.ints(&by_size, "size")?, vec![3, 2, 0]);

    let owned = engine.query_on(&open, "Issue", Node::link_not_null("owner"));
    assert_eq!(
        owned.as_tree().map(|t| t.source_tree().clone()),
        Some(Node::and(
            Node::property_equal("state", "open"),
            Node::link_not_null("owner")
        ))
    );
    Ok(())
}

#[test]
fn select_distinct_keeps_first_seen_order_and_target_type() -> Result<()> {
    let fx = Fixture::new(issue_schema());
    let ann = fx.entity("User", &[("name", Prop::Str("ann"))]);
    let bob = fx.entity("User", &[("name", Prop::Str("bob"))]);
    let tag = fx.entity("Tag", &[]);
    for owner in [bob, ann, bob] {
        let issue = fx.entity("Issue", &[]);
        fx.link(issue, "owner", owner);
        fx.link(issue, "tags", tag);
    }
    let issues = fx.engine.query("Issue", Node::GetAll);
    let owners = fx.engine.select_distinct(&issues, "owner")?;
    assert_eq!(owners.static_type(), Some("User"));
    assert_eq!(owners.to_vec()?, vec![bob, ann]);

    let tags = fx.engine.select_many_distinct(&issues, "tags")?;
    assert_eq!(tags.static_type(), Some("Tag"));
    assert_eq!(tags.to_vec()?, vec![tag]);
    Ok(())
}

#[test]
fn links_equal_uses_the_shortcut_and_falls_back_without_it() -> Result<()> {
    let config = QueryEngineConfig {
        trace_find_links: true,
        ..QueryEngineConfig::default()
    };
    let fx = Fixture::with_config(issue_schema(), config);
    let ann = fx.entity("User", &[("name", Prop::Str("ann"))]);
    let bob = fx.entity("User", &[("name", Prop::Str("bob"))]);
    let mut expected = Vec::new();
    for (owner, state) in [(ann, "open"), (bob, "open"), (ann, "closed")] {
        let issue = fx.entity("Issue", &[("state", Prop::Str(state))]);
        fx.link(issue, "owner", owner);
        if owner == ann && state == "open" {
            expected.push(issue);
        }
    }
    let bug = fx.entity("Bug", &[("state", Prop::Str("open"))]);
    fx.link(bug, "owner", ann);
    expected.push(bug);

    let tree = Node::and(
        Node::property_equal("state", "open"),
        Node::links_equal("owner", Node::property_equal("name", "ann"), "User"),
    );
    let before = fx.backend.counters();
    let with_shortcut = sorted(fx.engine.query("Issue", tree.clone()).to_vec()?);
    assert_eq!(with_shortcut, expected);
    assert!(fx.backend.counters().find_links > before.find_links);

    fx.backend.set_find_links_supported(false);
    let direct = sorted(fx.engine.query("Issue", tree).to_vec()?);
    assert_eq!(direct, expected);

    let only_links = fx.engine.query(
        "Issue",
        Node::links_equal("owner", Node::property_equal("name", "bob"), "User"),
    );
    assert_eq!(only_links.to_vec()?.len(), 1);
    Ok(())
}

#[test]
fn typed_sequences_take_get_all_shortcuts() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    open_and_closed(&fx);
    let engine = &fx.engine;
    let first_two = fx
        .backend
        .all("Issue")?
        .iter()?
        .take(2)
        .collect::<Result<Vec<_>>>()?;
    let some = EntitySeq::typed("Issue", EntitySeq::from_ids(first_two));
    let all = engine.query("Issue", Node::GetAll);
    let before = fx.backend.counters();
    let kept = engine.intersect(&some, &all)?;
    assert!(kept.same_as(&some));
    assert!(engine.exclude(&some, &all)?.is_known_empty());
    assert!(engine.union(&some, &all)?.same_as(&all));
    assert_eq!(fx.backend.counters().all, before.all, "nothing evaluated");
    Ok(())
}

#[test]
fn union_and_difference_on_one_instance_fuse() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    open_and_closed(&fx);
    let instance = EntitySeq::Backend(fx.backend.all("Issue")?);
    let engine = &fx.engine;
    let open = || engine.query_on(&instance, "Issue", Node::property_equal("state", "open"));
    let small = || engine.query_on(&instance, "Issue", Node::range("size", 0i64, 1i64));

    let either = engine.union(&open(), &small())?;
    assert_eq!(
        either.as_tree().map(|t| t.source_tree().clone()),
        Some(Node::or(
            Node::property_equal("state", "open"),
            Node::range("size", 0i64, 1i64)
        ))
    );
    assert_eq!(fx.ints(&either, "size")?, vec![0, 1, 2, 3]);

    let rest = engine.exclude(&open(), &small())?;
    assert_eq!(
        rest.as_tree().map(|t| t.source_tree().clone()),
        Some(Node::minus(
            Node::property_equal("state", "open"),
            Node::range("size", 0i64, 1i64)
        ))
    );
    assert_eq!(fx.ints(&rest, "size")?, vec![2, 3]);
    Ok(())
}

#[test]
fn concatenation_keeps_duplicates_and_side_order() -> Result<()> {
    let fx = Fixture::new(flat_schema());
    let issue = fx.entity("Issue", &[("state", Prop::Str("open"))]);
    let instance = EntitySeq::Backend(fx.backend.all("Issue")?);
    let engine = &fx.engine;
    let open = || engine.query_on(&instance, "Issue", Node::property_equal("state", "open"));
    let twice = engine.concat(&open(), &open())?;
    assert!(twice.as_tree().is_none(), "concatenation is never fused");
    assert_eq!(twice.to_vec()?, vec![issue, issue]);

    let fx = Fixture::new(issue_schema());
    let issue = fx.entity("Issue", &[("state", Prop::Str("open")), ("size", Prop::Int(1))]);
    let bug = fx.entity("Bug", &[("state", Prop::Str("open")), ("size", Prop::Int(2))]);
    let engine = &fx.engine;
    let open = engine.query("Issue", Node::property_equal("state", "open"));
    let sized = engine.query("Issue", Node::property_not_null("size"));
    assert_eq!(
        engine.concat(&open, &sized)?.to_vec()?,
        vec![issue, bug, issue, bug]
    );

    let literal = engine.query(
        "Issue",
        Node::concat(
            Node::property_equal("state", "open"),
            Node::property_not_null("size"),
        ),
    );
    assert_eq!(literal.to_vec()?, vec![issue, bug, issue, bug]);
    Ok(())
}
