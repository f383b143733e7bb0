#![allow(missing_docs)]

mod fixture;

use fixture::Fixture;
use sombra_ask::query::hierarchy::{EdgeRelation, HierarchyCache};
use sombra_ask::query::{
    Comparator, DataItem, Description, EntityRef, PropertyRef, Query, QueryConfig, QueryOutcome,
    QueryStore, SortOrder,
};
use sombra_ask::EntityId;

const DEEP_CATEGORIES: &str = "
INSERT INTO ids VALUES (16, 'Districts', 14, '', 'Districts'), (17, 'Quarters', 14, '', 'Quarters');
INSERT INTO subc VALUES (16, 12), (17, 16);
INSERT INTO inst VALUES (5, 17);
";

fn cities(store: &QueryStore) -> Vec<String> {
    let mut query = Query::new(Description::class([EntityRef::category("Cities")]), store.config())
        .with_sort("", SortOrder::Asc);
    let outcome = store.get_query_result(&mut query);
    assert!(query.errors.is_empty(), "unexpected issues: {:?}", query.errors);
    titles(&outcome)
}

fn titles(outcome: &QueryOutcome) -> Vec<String> {
    outcome
        .instances()
        .expect("instance results")
        .rows
        .iter()
        .map(|row| row.entity.title.clone())
        .collect()
}

fn closure_relation(table: &str, depth: u32, seeds: &[u64]) -> String {
    let edges = EdgeRelation {
        table: table.to_owned(),
        subject: "s_id".to_owned(),
        object: "o_id".to_owned(),
    };
    let seeds: Vec<EntityId> = seeds.iter().copied().map(EntityId).collect();
    HierarchyCache::relation_name(&HierarchyCache::key(&edges, depth, &seeds))
}

#[test]
fn subcategory_members_are_included() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());

    assert_eq!(cities(&store), vec!["Berlin", "Hamburg", "Lyon", "Paris"]);
    assert_eq!(fx.temp_tables(), vec![closure_relation("subc", 10, &[10])]);
    assert_eq!(store.hierarchy_cache().len(), 1);
}

#[test]
fn closure_depth_limits_the_walk() {
    let fx = Fixture::new();
    fx.execute(DEEP_CATEGORIES);

    let shallow = fx.store(QueryConfig {
        subcategory_depth: 2,
        ..QueryConfig::default()
    });
    assert_eq!(cities(&shallow), vec!["Berlin", "Hamburg", "Lyon", "Paris"]);

    let deep = fx.store(QueryConfig {
        subcategory_depth: 3,
        ..QueryConfig::default()
    });
    assert_eq!(
        cities(&deep),
        vec!["Berlin", "Hamburg", "Lyon", "Paris", "Tiny_Town"]
    );
}

#[test]
fn zero_depth_keeps_several_categories_as_plain_ids() {
    let fx = Fixture::new();
    fx.execute(DEEP_CATEGORIES);
    let store = fx.store(QueryConfig {
        subcategory_depth: 0,
        ..QueryConfig::default()
    });
    let condition = Description::class([
        EntityRef::category("Cities"),
        EntityRef::category("German cities"),
    ]);
    let mut query = Query::new(condition, store.config()).with_sort("", SortOrder::Asc);

    let outcome = store.get_query_result(&mut query);

    assert!(query.errors.is_empty(), "unexpected issues: {:?}", query.errors);
    assert_eq!(titles(&outcome), vec!["Hamburg", "Lyon"]);
    assert!(fx.temp_tables().is_empty(), "created: {:?}", fx.temp_tables());
    assert!(store.hierarchy_cache().is_empty());
}

#[test]
fn disabled_category_hierarchy_matches_direct_members_only() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig {
        category_hierarchy: false,
        ..QueryConfig::default()
    });

    assert_eq!(cities(&store), vec!["Lyon"]);
    assert!(fx.temp_tables().is_empty());
}

#[test]
fn cached_closure_is_copied_per_query() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let cached = closure_relation("subc", 10, &[10]);

    let first = cities(&store);
    let second = cities(&store);

    assert_eq!(first, second);
    assert_eq!(store.hierarchy_cache().len(), 1);
    assert_eq!(fx.temp_tables(), vec![cached]);
}

#[test]
fn stale_closure_is_refreshed_after_invalidation() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    assert_eq!(cities(&store), vec!["Berlin", "Hamburg", "Lyon", "Paris"]);

    fx.execute(DEEP_CATEGORIES);
    assert_eq!(cities(&store), vec!["Berlin", "Hamburg", "Lyon", "Paris"]);

    assert_eq!(store.invalidate_hierarchies().expect("invalidate"), 1);
    assert!(fx.temp_tables().is_empty());
    assert_eq!(
        cities(&store),
        vec!["Berlin", "Hamburg", "Lyon", "Paris", "Tiny_Town"]
    );
}

#[test]
fn cyclic_category_edges_terminate() {
    let fx = Fixture::new();
    fx.execute("INSERT INTO subc VALUES (10, 12);");
    let store = fx.store(QueryConfig::default());

    assert_eq!(cities(&store), vec!["Berlin", "Hamburg", "Lyon", "Paris"]);
}

#[test]
fn subproperty_closure_follows_configuration() {
    let fx = Fixture::new();
    let small = Description::some_property(
        PropertyRef::new("Population"),
        Description::value(DataItem::Number(1_000.0), Comparator::Leq),
    );

    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(small.clone(), store.config());
    assert_eq!(titles(&store.get_query_result(&mut query)), vec!["Tiny_Town"]);

    let flat = fx.store(QueryConfig {
        subproperty_depth: 0,
        ..QueryConfig::default()
    });
    let mut query = Query::new(small, flat.config());
    assert!(titles(&flat.get_query_result(&mut query)).is_empty());
}
