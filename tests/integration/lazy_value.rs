//! Lazy value handle: fetch triggers, placeholder rows and subscriptions

use crate::integration::test_utils::{as_runner, settle, FakeBackend};
use lazyrows::{FacetState, QueryContext, QueryOptions, QueryValue};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn reading_length_never_runs_the_data_query() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let value = ctx.create("SELECT * FROM people", as_runner(&backend), QueryOptions::new());

    assert_eq!(value.length(), 0);
    value.fetch_length().await.unwrap();
    settle().await;
    assert_eq!(value.length(), 3);
    assert_eq!(value.columns().len(), 2);
    assert_eq!(backend.calls("_data"), 0);
    assert_eq!(value.data_state(), FacetState::Init);
}

#[tokio::test]
async fn indexing_triggers_the_data_fetch() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let value = ctx.create("SELECT * FROM people", as_runner(&backend), QueryOptions::new());
    value.fetch_columns().await.unwrap();

    // Before data arrives, a placeholder with every column set to null
    let placeholder = value.get(0).unwrap();
    assert_eq!(placeholder.len(), 2);
    assert!(placeholder.values().all(Value::is_null));
    assert_eq!(value.data_state(), FacetState::Loading);

    value.fetch_data().await.unwrap();
    assert_eq!(value.get(0).unwrap()["name"], "ada");
    assert_eq!(backend.calls("_data"), 1);
}

#[tokio::test]
async fn placeholders_respect_a_known_length() {
    let backend = FakeBackend::people()
        .with_delay("---- Data", std::time::Duration::from_millis(50))
        .shared();
    let ctx = QueryContext::default();
    let value = ctx.create("SELECT * FROM people", as_runner(&backend), QueryOptions::new());
    value.fetch_length().await.unwrap();

    assert!(value.get(2).is_some());
    assert!(value.get(3).is_none());
    assert!(value.at(-4).is_none());
    assert!(value.data_loading());
}

#[tokio::test]
async fn rows_iter_and_negative_indices_read_loaded_data() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let value = ctx.create("SELECT * FROM people", as_runner(&backend), QueryOptions::new());

    assert!(value.rows().is_none());
    assert_eq!(value.iter().count(), 0);
    value.fetch().await;

    let names: Vec<Value> = value.iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec!["ada", "grace", "linus"]);
    assert_eq!(value.at(-1).unwrap()["name"], "linus");
    assert!(value.get(99).is_none());
}

#[tokio::test]
async fn unknown_members_are_absent_not_errors() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let value = ctx.create(
        "SELECT * FROM people",
        as_runner(&backend),
        QueryOptions::new().with_id("members"),
    );
    assert_eq!(value.member("flibbertigibbet"), None);
    assert_eq!(value.member("id"), Some(Value::from("members")));
    assert_eq!(value.member("error"), None);

    value.fetch().await;
    assert_eq!(value.member("length"), Some(Value::from(3u64)));
    assert_eq!(value.member("1").unwrap()["name"], "grace");
    assert_eq!(value.member("ready"), Some(Value::from(true)));
}

#[tokio::test]
async fn subscribers_see_every_transition_until_unsubscribed() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let value = ctx.create(
        "SELECT * FROM people",
        as_runner(&backend),
        QueryOptions::new().with_known_columns(crate::integration::test_utils::people_columns()),
    );
    settle().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let last_loaded = Arc::new(Mutex::new(false));
    let subscription = {
        let calls = calls.clone();
        let last_loaded = last_loaded.clone();
        value.subscribe(move |v: &QueryValue| {
            calls.fetch_add(1, Ordering::SeqCst);
            *last_loaded.lock() = v.data_loaded();
        })
    };
    // Invoked synchronously on subscribe
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    value.fetch_data().await.unwrap();
    // Loading, then resolved
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(*last_loaded.lock());

    assert!(subscription.unsubscribe());
    assert_eq!(value.subscriber_count(), 0);
}

#[tokio::test]
async fn handles_share_identity_across_clones() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let value = ctx.create("SELECT * FROM people", as_runner(&backend), QueryOptions::new());
    let copy = value.clone();
    assert!(QueryValue::ptr_eq(&value, &copy));

    copy.fetch().await;
    assert!(value.data_loaded());
}

#[tokio::test]
async fn every_fetch_trigger_member_starts_the_data_fetch_once() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();

    for (i, name) in lazyrows::FETCH_TRIGGERS.iter().enumerate() {
        let value = ctx.create(
            format!("SELECT '{}' AS accessor, * FROM people", name),
            as_runner(&backend),
            QueryOptions::new(),
        );
        assert_eq!(value.data_state(), FacetState::Init);

        value.member(name);
        value.member(name);
        settle().await;
        assert_eq!(value.data_state(), FacetState::Resolved, "member {}", name);
        assert_eq!(backend.calls("_data"), i + 1);
    }
}

#[tokio::test]
async fn plain_members_leave_data_untouched() {
    let backend = FakeBackend::people().shared();
    let ctx = QueryContext::default();
    let value = ctx.create("SELECT * FROM people", as_runner(&backend), QueryOptions::new());

    for name in ["id", "hash", "columns", "ready", "nonexistent"] {
        value.member(name);
    }
    settle().await;
    assert_eq!(value.data_state(), FacetState::Init);
    assert_eq!(backend.calls("_data"), 0);
}
