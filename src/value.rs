//! Lazy value handle
//!
//! [`QueryValue`] is what callers hold. It behaves like a list of rows whose
//! contents arrive on demand: reading rows triggers the data fetch, reading the
//! length triggers the length fetch, and until data arrives indexing answers
//! with placeholder rows so that a renderer can lay out a table shape. No
//! accessor ever fails; errors are exposed through [`Query::error`].

use crate::error::QueryError;
use crate::query::{AggColumn, Query, Subscriber, Subscription, DEFAULT_SEARCH_THRESHOLD};
use crate::types::{ColumnDescription, Row, Rows};
use serde_json::Value;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Accessor names that start the data fetch.
pub const FETCH_TRIGGERS: &[&str] = &["at", "rows", "iter"];

#[derive(Clone)]
pub struct QueryValue {
    query: Arc<Query>,
}

impl QueryValue {
    pub(crate) fn new(query: Arc<Query>) -> Self {
        Self { query }
    }

    /// Whether two handles refer to the same query instance.
    pub fn ptr_eq(a: &QueryValue, b: &QueryValue) -> bool {
        Arc::ptr_eq(&a.query, &b.query)
    }

    pub fn query(&self) -> &Arc<Query> {
        &self.query
    }

    /// Row at `index`.
    ///
    /// Triggers the data fetch. Until data has loaded, answers with a mock row
    /// for indices that may exist (any index while the length is unknown) and
    /// `None` past a known length.
    pub fn get(&self, index: usize) -> Option<Row> {
        self.query.spawn_data_fetch("index");
        if let Some(rows) = self.query.loaded_rows() {
            return rows.get(index).cloned();
        }
        match self.query.row_count() {
            Some(length) if index as u64 >= length => None,
            _ => Some(self.query.mock_row()),
        }
    }

    /// Like [`get`](Self::get), but negative indices count from the end of a
    /// known length.
    pub fn at(&self, index: i64) -> Option<Row> {
        if index >= 0 {
            return self.get(index as usize);
        }
        self.query.spawn_data_fetch("at");
        let length = match self.query.loaded_rows() {
            Some(rows) => rows.len() as u64,
            None => self.query.row_count()?,
        };
        let from_end = index.unsigned_abs();
        if from_end > length {
            return None;
        }
        self.get((length - from_end) as usize)
    }

    /// Loaded rows. Triggers the data fetch.
    pub fn rows(&self) -> Option<Arc<Rows>> {
        self.query.spawn_data_fetch("rows");
        self.query.loaded_rows()
    }

    /// Iterate loaded rows. Triggers the data fetch; empty until data arrives.
    pub fn iter(&self) -> impl Iterator<Item = Row> {
        let rows = self.rows().unwrap_or_default();
        (0..rows.len()).filter_map(move |i| rows.get(i).cloned())
    }

    /// Row count. Triggers the length fetch; zero until known.
    pub fn length(&self) -> u64 {
        self.query.spawn_length_fetch();
        self.query.row_count().unwrap_or(0)
    }

    /// Resolved schema, or an empty list. Never starts a fetch.
    pub fn columns(&self) -> Arc<Vec<ColumnDescription>> {
        self.query.column_descriptions()
    }

    /// Dynamic member access.
    ///
    /// Numeric names index rows, known names read the corresponding property
    /// as JSON, and unknown names yield `None`.
    pub fn member(&self, name: &str) -> Option<Value> {
        if let Ok(index) = name.parse::<usize>() {
            return self.get(index).map(Value::Object);
        }
        if FETCH_TRIGGERS.contains(&name) {
            self.query.spawn_data_fetch(name);
        }
        match name {
            "length" => Some(Value::from(self.length())),
            "id" => Some(Value::from(self.query.id())),
            "hash" => Some(Value::from(self.query.hash().to_string())),
            "text" => Some(Value::from(self.query.text())),
            "originalText" => Some(Value::from(self.query.original_text())),
            "score" => self.query.score().map(Value::from),
            "error" => self.query.error().map(|e| Value::from(e.to_string())),
            "ready" => Some(Value::from(self.query.ready())),
            "loading" => Some(Value::from(self.query.loading())),
            "columns" => serde_json::to_value(self.columns().as_ref()).ok(),
            "rows" | "iter" => self
                .query
                .loaded_rows()
                .map(|rows| Value::Array(rows.iter().cloned().map(Value::Object).collect())),
            _ => None,
        }
    }

    /// Register a callback invoked on every state change. It is also invoked
    /// once immediately.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueryValue) + Send + Sync + 'static,
    {
        let subscriber: Subscriber = Arc::new(callback);
        self.query.subscribe(subscriber)
    }

    pub(crate) fn subscribe_shared(&self, subscriber: Subscriber) -> Subscription {
        self.query.subscribe(subscriber)
    }

    pub fn subscriber_count(&self) -> usize {
        self.query.subscriber_count()
    }

    /// Fetch all facets and wait for each to settle. Failures are recorded on
    /// the query rather than returned.
    pub async fn fetch(&self) -> QueryValue {
        self.query.fetch_all().await;
        self.clone()
    }

    pub async fn fetch_data(&self) -> Result<Arc<Rows>, QueryError> {
        self.query.fetch_data().await
    }

    pub async fn fetch_length(&self) -> Result<u64, QueryError> {
        self.query.fetch_length().await
    }

    pub async fn fetch_columns(&self) -> Result<Arc<Vec<ColumnDescription>>, QueryError> {
        self.query.fetch_columns().await
    }

    /// Execute the data query for its side effects on the backend.
    pub fn background_fetch(&self) {
        self.query.background_fetch();
    }

    // ---- derivations ----

    /// Add a `WHERE` predicate.
    pub fn filter(&self, predicate: &str) -> QueryValue {
        self.query.filter(predicate)
    }

    pub fn limit(&self, n: u64) -> QueryValue {
        self.query.limit(n)
    }

    pub fn offset(&self, n: u64) -> QueryValue {
        self.query.offset(n)
    }

    /// One page of `n` rows starting at `offset`.
    pub fn paginate(&self, offset: u64, n: u64) -> QueryValue {
        self.query.paginate(offset, n)
    }

    /// Group by `columns`, optionally adding a `rows` count column.
    pub fn group_by<S: AsRef<str>>(&self, columns: &[S], with_row_count: bool) -> QueryValue {
        let columns: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self.query.group_by(&columns, with_row_count)
    }

    /// Append aggregate columns, keyed by aggregate name (`sum`, `avg`).
    pub fn agg<K, I>(&self, aggregates: I) -> Result<QueryValue, QueryError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Vec<AggColumn>)>,
    {
        self.query.agg(aggregates)
    }

    /// Fuzzy match `term` against `column`, best matches first, keeping rows
    /// whose similarity exceeds [`DEFAULT_SEARCH_THRESHOLD`].
    pub fn search(&self, term: &str, column: &str) -> QueryValue {
        self.query.search(term, column, DEFAULT_SEARCH_THRESHOLD)
    }

    /// [`search`](Self::search) with an explicit similarity cutoff. The
    /// threshold must be a finite number.
    pub fn search_with_threshold(
        &self,
        term: &str,
        column: &str,
        threshold: f64,
    ) -> Result<QueryValue, QueryError> {
        if !threshold.is_finite() {
            return Err(QueryError::Construction(format!(
                "Search threshold must be finite, got {}",
                threshold
            )));
        }
        Ok(self.query.search(term, column, threshold))
    }
}

impl Deref for QueryValue {
    type Target = Query;

    fn deref(&self) -> &Query {
        &self.query
    }
}

impl fmt::Debug for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.query.as_ref(), f)
    }
}
