//! Query derivation: filters, paging, grouping, aggregates and search

use crate::integration::test_utils::{as_runner, people_columns, FakeBackend};
use lazyrows::{
    AggColumn, ColumnDescription, QueryContext, QueryError, QueryOptions, QueryValue,
    DEFAULT_SEARCH_THRESHOLD,
};

fn base(ctx: &QueryContext, backend: &std::sync::Arc<FakeBackend>, known: bool) -> QueryValue {
    let mut options = QueryOptions::new();
    if known {
        options = options.with_known_columns(people_columns());
    }
    ctx.create("SELECT * FROM people", as_runner(backend), options)
}

#[test]
fn filters_combine_with_and() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let adults = base(&ctx, &backend, false).filter("age >= 18");
    let text = adults.filter("name <> 'ada'").text();
    assert!(text.contains("WHERE (age >= 18) AND (name <> 'ada')"));
}

#[test]
fn paging_sets_limit_and_offset() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let people = base(&ctx, &backend, false);
    assert!(people.paginate(20, 10).text().ends_with("LIMIT 10 OFFSET 20"));
    assert!(people.offset(5).text().ends_with("OFFSET 5"));
    assert!(!people.text().contains("LIMIT"));
}

#[test]
fn known_schema_is_forwarded_to_simple_derivations() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let known = base(&ctx, &backend, true).limit(1);
    assert!(known.columns_loaded());
    assert_eq!(known.columns().as_slice(), people_columns().as_slice());

    // Fresh context: the cached base already carries the schema
    let unknown = base(&QueryContext::default(), &backend, false).limit(1);
    assert!(!unknown.columns_loaded());
}

#[test]
fn group_by_derives_grouped_schema() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let grouped = base(&ctx, &backend, true).group_by(&["name"], true);

    let text = grouped.text();
    assert!(text.starts_with("SELECT \"name\", count(*) AS \"rows\" FROM"));
    assert!(text.ends_with("GROUP BY \"name\""));
    assert_eq!(
        grouped.columns().as_slice(),
        &[
            ColumnDescription::new("name", "VARCHAR", true),
            ColumnDescription::new("rows", "BIGINT", false),
        ]
    );

    let plain = base(&ctx, &backend, true).group_by(&["age"], false);
    assert!(!plain.text().contains("count(*)"));
}

#[test]
fn aggregates_append_aliased_columns() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let grouped = base(&ctx, &backend, false).group_by(&["name"], false);
    let summed = grouped
        .agg([
            ("sum", vec![AggColumn::from("age")]),
            ("avg", vec![AggColumn::aliased("age", "mean_age")]),
        ])
        .unwrap();
    let text = summed.text();
    assert!(text.contains("sum(\"age\") AS \"sum_age\""));
    assert!(text.contains("avg(\"age\") AS \"mean_age\""));
}

#[test]
fn unknown_aggregates_fail_synchronously() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let err = base(&ctx, &backend, false)
        .agg([("median", vec![AggColumn::from("age")])])
        .unwrap_err();
    assert_eq!(err, QueryError::UnknownAggregate("median".to_string()));
}

#[test]
fn search_ranks_by_similarity() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let found = base(&ctx, &backend, true)
        .search_with_threshold("Grace", "name", 0.8)
        .unwrap();

    let text = found.text();
    assert!(text.starts_with(
        "SELECT jaro_winkler_similarity(lower('Grace'), lower(\"name\")) AS \"similarity\", * FROM"
    ));
    assert!(text.contains("WHERE (similarity > 0.8)"));
    assert!(text.ends_with("ORDER BY similarity DESC"));

    let columns = found.columns();
    assert_eq!(
        columns.last(),
        Some(&ColumnDescription::new("similarity", "INTEGER", false))
    );
    assert_eq!(columns.len(), 3);
}

#[test]
fn search_terms_are_escaped() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let found = base(&ctx, &backend, false).search("O'Brien", "name");
    assert!(found.text().contains("lower('O''Brien')"));
}

#[test]
fn search_defaults_to_half_similarity() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let people = base(&ctx, &backend, false);

    let found = people.search("ada", "name");
    assert!(found.text().contains("WHERE (similarity > 0.5)"));
    let explicit = people
        .search_with_threshold("ada", "name", DEFAULT_SEARCH_THRESHOLD)
        .unwrap();
    assert!(QueryValue::ptr_eq(&found, &explicit));
}

#[test]
fn non_finite_search_thresholds_are_rejected() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let people = base(&ctx, &backend, false);

    for threshold in [f64::NAN, f64::INFINITY] {
        let err = people
            .search_with_threshold("ada", "name", threshold)
            .unwrap_err();
        assert!(matches!(err, QueryError::Construction(_)));
    }
}
