#![allow(missing_docs)]

mod fixture;

use fixture::{unix_now, Fixture, BIG_CITIES, CACHED_CAPITALS, LOOP_CONCEPT};
use sombra_ask::query::{
    ConceptCaching, Comparator, DataItem, Description, EntityRef, PropertyRef, Query, QueryConfig,
    QueryIssue, QueryOutcome, QueryStore, SortOrder,
};

const DAY: i64 = 24 * 60 * 60;

fn big_cities_definition() -> String {
    let definition = Description::some_property(
        PropertyRef::new("Population"),
        Description::value(DataItem::Number(2_000_000.0), Comparator::Geq),
    );
    serde_json::to_string(&definition).expect("serialize definition")
}

fn category_definition() -> String {
    serde_json::to_string(&Description::namespace(14)).expect("serialize definition")
}

fn run(store: &QueryStore, description: Description) -> (Vec<String>, Vec<QueryIssue>) {
    let mut query = Query::new(description, store.config()).with_sort("", SortOrder::Asc);
    let outcome = store.get_query_result(&mut query);
    (titles(&outcome), query.errors)
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

fn concept(title: &str) -> Description {
    Description::concept(EntityRef::concept(title))
}

#[test]
fn uncached_concept_is_computed_from_definition() {
    let fx = Fixture::new();
    fx.add_concept(BIG_CITIES, &big_cities_definition(), 1, 2, 1, None);
    let store = fx.store(QueryConfig::default());

    let (rows, errors) = run(&store, concept("Big cities"));

    assert!(errors.is_empty(), "unexpected issues: {errors:?}");
    assert_eq!(rows, vec!["Berlin", "Paris"]);
}

#[test]
fn fresh_cache_is_preferred_over_definition() {
    let fx = Fixture::new();
    fx.add_concept(CACHED_CAPITALS, &category_definition(), 8, 1, 0, Some(unix_now()));
    let store = fx.store(QueryConfig::default());

    let (rows, errors) = run(&store, concept("Cached capitals"));

    assert!(errors.is_empty(), "unexpected issues: {errors:?}");
    assert_eq!(rows, vec!["Berlin", "Paris"]);
}

#[test]
fn stale_cache_is_bypassed_when_computable() {
    let fx = Fixture::new();
    fx.add_concept(
        CACHED_CAPITALS,
        &category_definition(),
        8,
        1,
        0,
        Some(unix_now() - 2 * DAY),
    );
    let store = fx.store(QueryConfig::default());

    let (rows, _) = run(&store, concept("Cached capitals"));

    assert_eq!(rows, vec!["Capitals", "Cities", "German_cities", "Towns"]);
}

#[test]
fn stale_cache_is_used_when_computation_is_forbidden() {
    let fx = Fixture::new();
    fx.add_concept(
        CACHED_CAPITALS,
        &category_definition(),
        8,
        1,
        0,
        Some(unix_now() - 2 * DAY),
    );
    let store = fx.store(QueryConfig {
        concept_caching: ConceptCaching::All,
        ..QueryConfig::default()
    });

    let (rows, errors) = run(&store, concept("Cached capitals"));

    assert!(errors.is_empty(), "unexpected issues: {errors:?}");
    assert_eq!(rows, vec!["Berlin", "Paris"]);
}

#[test]
fn oversized_uncached_concept_is_not_computed() {
    let fx = Fixture::new();
    fx.add_concept(BIG_CITIES, &big_cities_definition(), 1, 2, 1, None);
    let store = fx.store(QueryConfig {
        concept_max_size: 1,
        ..QueryConfig::default()
    });

    let (rows, errors) = run(&store, concept("Big cities"));

    assert!(rows.is_empty());
    assert!(matches!(
        errors.as_slice(),
        [QueryIssue::ConceptNotComputable { concept }] if concept == "Concept:Big cities"
    ));
}

#[test]
fn missing_definition_is_reported() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());

    let (rows, errors) = run(&store, concept("Undefined"));

    assert!(rows.is_empty());
    assert!(matches!(errors.as_slice(), [QueryIssue::ConceptUndefined { .. }]));
}

#[test]
fn self_referencing_concept_is_reported() {
    let fx = Fixture::new();
    let text = serde_json::to_string(&concept("Loop")).expect("serialize definition");
    fx.add_concept(LOOP_CONCEPT, &text, 4, 1, 0, None);
    let store = fx.store(QueryConfig::default());

    let (rows, errors) = run(&store, concept("Loop"));

    assert!(rows.is_empty());
    assert!(errors
        .iter()
        .any(|issue| matches!(issue, QueryIssue::ConceptCycle { concept } if concept == "Concept:Loop")));
}

#[test]
fn unreadable_definition_is_reported() {
    let fx = Fixture::new();
    fx.add_concept(BIG_CITIES, "[[Population::>2000000]]", 1, 2, 1, None);
    let store = fx.store(QueryConfig::default());

    let (rows, errors) = run(&store, concept("Big cities"));

    assert!(rows.is_empty());
    assert!(matches!(errors.as_slice(), [QueryIssue::ConceptInvalid { .. }]));
}

#[test]
fn concept_combines_with_other_conditions() {
    let fx = Fixture::new();
    fx.add_concept(BIG_CITIES, &big_cities_definition(), 1, 2, 1, None);
    let store = fx.store(QueryConfig::default());
    let condition = Description::conjunction([
        concept("Big cities"),
        Description::some_property(
            PropertyRef::new("Located in"),
            Description::page(EntityRef::page("France")),
        ),
    ]);

    let (rows, errors) = run(&store, condition);

    assert!(errors.is_empty(), "unexpected issues: {errors:?}");
    assert_eq!(rows, vec!["Paris"]);
}
