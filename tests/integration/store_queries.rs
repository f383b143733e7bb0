#![allow(missing_docs)]

mod fixture;

use fixture::Fixture;
use sombra_ask::query::{
    Comparator, DataItem, Description, EntityRef, PropertyRef, Query, QueryConfig, QueryFeatures,
    QueryIssue, QueryMode, QueryOutcome, QueryStore, SortOrder,
};

fn population(comparator: Comparator, value: f64) -> Description {
    Description::some_property(
        PropertyRef::new("Population"),
        Description::value(DataItem::Number(value), comparator),
    )
}

fn located_in(country: &str) -> Description {
    Description::some_property(
        PropertyRef::new("Located in"),
        Description::page(EntityRef::page(country)),
    )
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

#[test]
fn numeric_threshold_returns_matching_entities() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(population(Comparator::Geq, 1_000_000.0), store.config())
        .with_sort("", SortOrder::Asc);

    let outcome = store.get_query_result(&mut query);

    assert!(query.errors.is_empty(), "unexpected issues: {:?}", query.errors);
    assert_eq!(titles(&outcome), vec!["Berlin", "Hamburg", "Paris"]);
    assert!(!outcome.instances().expect("instances").has_further_results);
}

#[test]
fn subproperty_values_are_included() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(population(Comparator::Leq, 1_000.0), store.config());

    let outcome = store.get_query_result(&mut query);

    assert_eq!(titles(&outcome), vec!["Tiny_Town"]);
}

#[test]
fn limit_and_offset_page_through_results() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let condition = population(Comparator::Geq, 1_000_000.0);

    let mut first = Query::new(condition.clone(), store.config())
        .with_limit(2, store.config())
        .with_sort("", SortOrder::Asc);
    let outcome = store.get_query_result(&mut first);
    assert_eq!(titles(&outcome), vec!["Berlin", "Hamburg"]);
    assert!(outcome.instances().expect("instances").has_further_results);

    let mut second = Query::new(condition, store.config())
        .with_limit(2, store.config())
        .with_offset(2)
        .with_sort("", SortOrder::Asc);
    let outcome = store.get_query_result(&mut second);
    assert_eq!(titles(&outcome), vec!["Paris"]);
    assert!(!outcome.instances().expect("instances").has_further_results);
}

#[test]
fn sorting_by_property_value() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(population(Comparator::Geq, 1_000_000.0), store.config())
        .with_sort("Population", SortOrder::Desc);

    let outcome = store.get_query_result(&mut query);

    assert_eq!(titles(&outcome), vec!["Berlin", "Paris", "Hamburg"]);
}

#[test]
fn sorting_by_unconstrained_property_joins_it() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(Description::class([EntityRef::category("Cities")]), store.config())
        .with_sort("Population", SortOrder::Asc);

    let outcome = store.get_query_result(&mut query);

    assert_eq!(titles(&outcome), vec!["Lyon", "Hamburg", "Paris", "Berlin"]);
}

#[test]
fn sorting_by_page_property_uses_target_sortkey() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let condition = Description::conjunction([
        population(Comparator::Geq, 1_000_000.0),
        Description::some_property(PropertyRef::new("Located in"), Description::thing()),
    ]);
    let mut query = Query::new(condition, store.config())
        .with_sort("Located in", SortOrder::Asc)
        .with_sort("", SortOrder::Asc);

    let outcome = store.get_query_result(&mut query);

    assert_eq!(titles(&outcome), vec!["Paris", "Berlin", "Hamburg"]);
}

#[test]
fn conjunction_intersects_restrictions() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let condition = Description::conjunction([
        Description::class([EntityRef::category("Cities")]),
        population(Comparator::Geq, 2_000_000.0),
        located_in("Germany"),
    ]);
    let mut query = Query::new(condition, store.config());

    let outcome = store.get_query_result(&mut query);

    assert!(query.errors.is_empty(), "unexpected issues: {:?}", query.errors);
    assert_eq!(titles(&outcome), vec!["Berlin"]);
}

#[test]
fn inverse_property_walks_edges_backwards() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let condition = Description::some_property(
        PropertyRef::inverse("Located in"),
        Description::page(EntityRef::page("Hamburg")),
    );
    let mut query = Query::new(condition, store.config());

    let outcome = store.get_query_result(&mut query);

    assert_eq!(titles(&outcome), vec!["Germany"]);
}

#[test]
fn quantity_condition_respects_unit() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let area = |unit: &str| {
        Description::some_property(
            PropertyRef::new("Area"),
            Description::value(
                DataItem::Quantity {
                    value: 500.0,
                    unit: unit.to_owned(),
                },
                Comparator::Geq,
            ),
        )
    };

    let mut query = Query::new(area("km2"), store.config());
    assert_eq!(titles(&store.get_query_result(&mut query)), vec!["Berlin"]);

    let mut query = Query::new(area(""), store.config()).with_sort("", SortOrder::Asc);
    assert_eq!(
        titles(&store.get_query_result(&mut query)),
        vec!["Berlin", "Hamburg"]
    );
}

#[test]
fn string_pattern_matches_with_wildcards() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let condition = Description::some_property(
        PropertyRef::new("Nickname"),
        Description::value(DataItem::String("Spree*".to_owned()), Comparator::Like),
    );
    let mut query = Query::new(condition, store.config());

    assert_eq!(titles(&store.get_query_result(&mut query)), vec!["Berlin"]);
}

#[test]
fn disjunction_skips_unknown_branches_and_drops_its_relation() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let condition = Description::disjunction([
        Description::page(EntityRef::page("Paris")),
        Description::some_property(
            PropertyRef::new("Nickname"),
            Description::value(DataItem::String("Spree-Athen".to_owned()), Comparator::Eq),
        ),
        Description::page(EntityRef::page("Atlantis")),
    ]);
    let mut query = Query::new(condition, store.config()).with_sort("", SortOrder::Asc);

    let outcome = store.get_query_result(&mut query);

    assert_eq!(titles(&outcome), vec!["Berlin", "Paris"]);
    assert!(fx.temp_tables().is_empty(), "leaked: {:?}", fx.temp_tables());
}

#[test]
fn stores_sharing_an_engine_keep_their_relations_apart() {
    let fx = Fixture::new();
    let first = fx.store(QueryConfig::default());
    let second = fx.store(QueryConfig::default());
    let nickname = || {
        Description::some_property(
            PropertyRef::new("Nickname"),
            Description::value(DataItem::String("Spree-Athen".to_owned()), Comparator::Eq),
        )
    };
    let run = |store: &QueryStore, condition: Description| {
        let mut query = Query::new(condition, store.config()).with_sort("", SortOrder::Asc);
        let outcome = store.get_query_result(&mut query);
        assert!(query.errors.is_empty(), "unexpected issues: {:?}", query.errors);
        titles(&outcome)
    };

    std::thread::scope(|scope| {
        let left = scope.spawn(|| {
            (0..100)
                .map(|_| {
                    let condition = Description::disjunction([
                        Description::page(EntityRef::page("Paris")),
                        nickname(),
                    ]);
                    run(&first, condition)
                })
                .collect::<Vec<_>>()
        });
        let right = scope.spawn(|| {
            (0..100)
                .map(|_| {
                    let condition = Description::disjunction([
                        Description::page(EntityRef::page("Hamburg")),
                        located_in("France"),
                    ]);
                    run(&second, condition)
                })
                .collect::<Vec<_>>()
        });
        for rows in left.join().expect("first store") {
            assert_eq!(rows, vec!["Berlin", "Paris"]);
        }
        for rows in right.join().expect("second store") {
            assert_eq!(rows, vec!["Hamburg", "Lyon", "Paris"]);
        }
    });
    assert!(fx.temp_tables().is_empty(), "leaked: {:?}", fx.temp_tables());
}

#[test]
fn redirected_page_values_resolve_to_target() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(Description::page(EntityRef::page("Berlin City")), store.config());

    assert_eq!(titles(&store.get_query_result(&mut query)), vec!["Berlin"]);
}

#[test]
fn internal_objects_are_not_returned() {
    let fx = Fixture::new();
    let config = QueryConfig {
        subcategory_depth: 0,
        ..QueryConfig::default()
    };
    let store = fx.store(config);
    let mut query = Query::new(Description::class([EntityRef::category("Cities")]), store.config());

    let outcome = store.get_query_result(&mut query);

    assert_eq!(titles(&outcome), vec!["Lyon"]);
    assert!(fx.temp_tables().is_empty());
    assert!(store.hierarchy_cache().is_empty());
}

#[test]
fn internal_objects_do_not_count_toward_the_limit() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let cities = || Description::class([EntityRef::category("Cities")]);

    let mut query = Query::new(cities(), store.config())
        .with_limit(1, store.config())
        .with_sort("", SortOrder::Desc);
    let outcome = store.get_query_result(&mut query);
    let page = outcome.instances().expect("instances");
    assert_eq!(titles(&outcome), vec!["Paris"]);
    assert!(page.has_further_results);

    let mut query = Query::new(cities(), store.config())
        .with_limit(2, store.config())
        .with_offset(2)
        .with_sort("", SortOrder::Desc);
    let outcome = store.get_query_result(&mut query);
    assert_eq!(titles(&outcome), vec!["Hamburg", "Berlin"]);
    assert!(!outcome.instances().expect("instances").has_further_results);

    let mut query = Query::new(cities(), store.config()).with_mode(QueryMode::Count);
    assert_eq!(store.get_query_result(&mut query).count(), Some(4));
}

#[test]
fn unconstrained_query_lists_every_entity_in_namespace() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(Description::namespace(108), store.config())
        .with_sort("", SortOrder::Asc);

    let outcome = store.get_query_result(&mut query);

    assert_eq!(
        titles(&outcome),
        vec!["Big_cities", "Cached_capitals", "Loop", "Undefined"]
    );
}

#[test]
fn count_mode_counts_distinct_matches() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(population(Comparator::Geq, 1_000_000.0), store.config())
        .with_mode(QueryMode::Count);

    let outcome = store.get_query_result(&mut query);

    assert_eq!(outcome.count(), Some(3));
}

#[test]
fn none_mode_only_signals_further_results() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let mut query = Query::new(population(Comparator::Geq, 1_000_000.0), store.config())
        .with_mode(QueryMode::None);

    let outcome = store.get_query_result(&mut query);
    let set = outcome.instances().expect("instances");

    assert!(set.rows.is_empty());
    assert!(set.has_further_results);
}

#[test]
fn debug_mode_describes_without_touching_data() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    let condition = Description::disjunction([
        Description::page(EntityRef::page("Paris")),
        Description::class([EntityRef::category("Cities")]),
    ]);
    let mut query = Query::new(condition, store.config()).with_mode(QueryMode::Debug);

    let outcome = store.get_query_result(&mut query);
    let trace = outcome.debug_trace().expect("debug trace");

    assert_eq!(trace.condition, "<q>[[:Paris]] OR [[Category:Cities]]</q>");
    assert!(trace
        .sql
        .as_deref()
        .is_some_and(|sql| sql.starts_with("SELECT DISTINCT")));
    assert!(trace.plan.as_ref().is_some_and(|plan| plan.render().contains("Disjunction")));
    let statements: Vec<&str> = trace
        .auxiliary
        .iter()
        .flat_map(|entry| entry.statements.iter().map(String::as_str))
        .collect();
    assert!(statements
        .iter()
        .any(|s| s.starts_with("Recursively computed hierarchy for element(s) (10).")));
    assert!(statements.iter().any(|s| s.starts_with("INSERT OR IGNORE INTO")));
    assert!(fx.temp_tables().is_empty());
    assert!(store.hierarchy_cache().is_empty());
}

#[test]
fn disallowed_features_block_execution() {
    let fx = Fixture::new();
    let config = QueryConfig {
        features: QueryFeatures::PROPERTY,
        ..QueryConfig::default()
    };
    let store = fx.store(config);
    let mut query = Query::new(Description::class([EntityRef::category("Cities")]), store.config());

    let outcome = store.get_query_result(&mut query);

    assert!(titles(&outcome).is_empty());
    assert!(matches!(
        query.errors.as_slice(),
        [QueryIssue::FeatureNotAllowed { features }] if features == &vec!["category".to_owned()]
    ));

    let permissive = fx.store(QueryConfig {
        features: QueryFeatures::PROPERTY,
        ignore_query_errors: true,
        subcategory_depth: 0,
        ..QueryConfig::default()
    });
    let mut query =
        Query::new(Description::class([EntityRef::category("Cities")]), permissive.config());
    assert_eq!(titles(&permissive.get_query_result(&mut query)), vec!["Lyon"]);
}

#[test]
fn oversized_queries_are_pruned_and_still_answered() {
    let fx = Fixture::new();
    let config = QueryConfig {
        max_size: 2,
        ..QueryConfig::default()
    };
    let store = fx.store(config);
    let condition = Description::conjunction([
        population(Comparator::Geq, 2_000_000.0),
        located_in("Germany"),
    ]);
    let mut query = Query::new(condition, store.config()).with_sort("", SortOrder::Asc);

    let outcome = store.get_query_result(&mut query);

    assert_eq!(titles(&outcome), vec!["Berlin", "Paris"]);
    assert!(matches!(
        query.errors.as_slice(),
        [QueryIssue::BudgetExceeded { dropped }] if dropped.len() == 1
    ));
}

#[test]
fn engine_failures_become_query_issues() {
    let fx = Fixture::new();
    let store = fx.store(QueryConfig::default());
    fx.execute("DROP TABLE di_quantity;");
    let condition = Description::disjunction([
        Description::page(EntityRef::page("Paris")),
        Description::some_property(
            PropertyRef::new("Area"),
            Description::value(
                DataItem::Quantity {
                    value: 100.0,
                    unit: String::new(),
                },
                Comparator::Grtr,
            ),
        ),
    ]);
    let mut query = Query::new(condition, store.config());

    let outcome = store.get_query_result(&mut query);

    assert!(titles(&outcome).is_empty());
    assert!(matches!(query.errors.as_slice(), [QueryIssue::Engine { .. }]));
    assert!(fx.temp_tables().is_empty(), "leaked: {:?}", fx.temp_tables());
}
