//! End-to-end scenarios over small hand-written runners

use crate::integration::test_utils::{row, settle};
use lazyrows::{runner_fn, sync_runner_fn, QueryContext, QueryError, QueryOptions, QueryValue};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Answers every facet query for a single `x = 1` row.
fn single_row_runner() -> lazyrows::SharedRunner {
    sync_runner_fn(|_, name| {
        if name.ends_with("_length") {
            Ok(vec![row(json!({"rowCount": 1}))])
        } else if name.ends_with("_columns") {
            Ok(vec![row(
                json!({"column_name": "x", "column_type": "INTEGER", "nullable": "YES"}),
            )])
        } else {
            Ok(vec![row(json!({"x": 1}))])
        }
    })
}

#[tokio::test]
async fn single_row_query_resolves_every_facet() {
    let ctx = QueryContext::default();
    let value = ctx
        .create("SELECT 1", single_row_runner(), QueryOptions::new())
        .fetch()
        .await;

    assert_eq!(value.length(), 1);
    assert!(value.columns().iter().any(|c| c.column_name == "x"));
    assert_eq!(value.get(0).unwrap()["x"], 1);
}

#[tokio::test]
async fn uncached_twins_fail_independently() {
    let ctx = QueryContext::default();
    let failing = sync_runner_fn(|_, _| Err(QueryError::runner("connection reset")));

    let broken = ctx.create(
        "SELECT 1",
        failing,
        QueryOptions::new().disable_cache(),
    );
    let healthy = ctx.create(
        "SELECT 1",
        single_row_runner(),
        QueryOptions::new().disable_cache(),
    );
    assert!(!QueryValue::ptr_eq(&broken, &healthy));

    broken.fetch().await;
    healthy.fetch().await;
    assert!(matches!(broken.error(), Some(QueryError::Runner(_))));
    assert!(healthy.error().is_none());
    assert!(healthy.ready());
}

#[tokio::test]
async fn data_failure_leaves_length_in_a_terminal_state() {
    let ctx = QueryContext::default();
    let runner = sync_runner_fn(|_, name| {
        if name.ends_with("_data") {
            Err(QueryError::runner("out of memory"))
        } else if name.ends_with("_length") {
            Ok(vec![row(json!({"rowCount": 7}))])
        } else {
            Ok(Vec::new())
        }
    });
    let value = ctx.create("SELECT * FROM big", runner, QueryOptions::new());
    value.fetch().await;

    assert!(matches!(value.error(), Some(QueryError::Runner(_))));
    assert!(value.data_loaded());
    assert!(value.length_loaded());
}

#[tokio::test]
async fn untouched_queries_never_run_their_data_query() {
    let data_calls = Arc::new(AtomicUsize::new(0));
    let runner = {
        let data_calls = data_calls.clone();
        runner_fn(move |_, name: String| {
            let data_calls = data_calls.clone();
            async move {
                if name.ends_with("_data") {
                    data_calls.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, QueryError>(Vec::new())
            }
        })
    };
    let ctx = QueryContext::default();
    let value = ctx.create("SELECT * FROM big", runner, QueryOptions::new());
    let _ = value.id();
    let _ = value.columns();
    let _ = value.length();
    settle().await;

    assert_eq!(data_calls.load(Ordering::SeqCst), 0);
}
