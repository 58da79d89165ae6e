//! Query state machine
//!
//! A [`Query`] aggregates three independently fetched facets of one logical
//! query: row data, row count and column schema. Each facet is started at most
//! once. The first facet failure becomes the query's terminal error, after which
//! every further facet fetch short-circuits to a rejection instead of calling
//! the runner again.
//!
//! Queries are created through [`QueryContext::create`](crate::context::QueryContext::create)
//! and handed out as [`QueryValue`]s.

use crate::builder::{quote_identifier, quote_literal, Projection, SelectBuilder, SqlBuilder};
use crate::config::QueryConfig;
use crate::context::{ContextShared, QueryContext};
use crate::error::QueryError;
use crate::events::{EventEmitter, HandlerId, QueryEvent, QueryEventKind};
use crate::facet::{AsyncFacet, FacetState};
use crate::hash::hash_query;
use crate::inflight::{InFlightTracker, InstanceKey};
use crate::runner::SharedRunner;
use crate::score::compute_score;
use crate::types::{mock_row, ColumnDescription, QueryHash, Row, Rows};
use crate::value::QueryValue;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

const EMPTY_QUERY_TEXT: &str = "SELECT 'Empty Query' WHERE 0";

/// What a query is built from.
#[derive(Debug, Clone)]
pub enum QueryInput {
    /// Raw SQL text, wrapped as a subquery before execution.
    Text(String),
    /// A builder whose rendering is executed as-is.
    Builder(Box<dyn SqlBuilder>),
}

impl QueryInput {
    /// Hash of the construction arguments; the cache key.
    pub fn hash(&self) -> QueryHash {
        match self {
            QueryInput::Text(text) => hash_query(text),
            QueryInput::Builder(builder) => hash_query(&builder.render()),
        }
    }
}

impl From<&str> for QueryInput {
    fn from(text: &str) -> Self {
        QueryInput::Text(text.to_string())
    }
}

impl From<String> for QueryInput {
    fn from(text: String) -> Self {
        QueryInput::Text(text)
    }
}

impl From<SelectBuilder> for QueryInput {
    fn from(builder: SelectBuilder) -> Self {
        QueryInput::Builder(Box::new(builder))
    }
}

impl From<Box<dyn SqlBuilder>> for QueryInput {
    fn from(builder: Box<dyn SqlBuilder>) -> Self {
        QueryInput::Builder(builder)
    }
}

/// Per-query creation options
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Display id; defaults to the short form of the hash
    pub id: Option<String>,
    /// Bypass the cache: always construct a fresh query
    pub disable_cache: bool,
    /// Compute the score once length and columns resolve
    pub auto_score: bool,
    /// Schema known up front; the columns facet resolves without a runner call
    pub known_columns: Option<Vec<ColumnDescription>>,
    /// Rows known up front
    pub initial_data: Option<Rows>,
    /// Show `initial_data` but still fetch fresh rows from the runner
    pub initial_data_dirty: bool,
    /// Create the query already failed
    pub initial_error: Option<QueryError>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            id: None,
            disable_cache: false,
            auto_score: true,
            known_columns: None,
            initial_data: None,
            initial_data_dirty: false,
            initial_error: None,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn disable_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    pub fn auto_score(mut self, enabled: bool) -> Self {
        self.auto_score = enabled;
        self
    }

    pub fn with_known_columns(mut self, columns: Vec<ColumnDescription>) -> Self {
        self.known_columns = Some(columns);
        self
    }

    /// Attach externally supplied column metadata.
    ///
    /// Fails synchronously with [`QueryError::Schema`] when the metadata is not
    /// an array of column descriptions.
    pub fn with_known_columns_json(self, columns: Value) -> Result<Self, QueryError> {
        Ok(self.with_known_columns(ColumnDescription::list_from_json(columns)?))
    }

    pub fn with_initial_data(mut self, rows: Rows) -> Self {
        self.initial_data = Some(rows);
        self
    }

    pub fn initial_data_dirty(mut self, dirty: bool) -> Self {
        self.initial_data_dirty = dirty;
        self
    }

    pub fn with_initial_error(mut self, err: QueryError) -> Self {
        self.initial_error = Some(err);
        self
    }

    /// Layer `overrides` on top of these options.
    pub fn merged_with(&self, overrides: &QueryOptions) -> QueryOptions {
        QueryOptions {
            id: overrides.id.clone().or_else(|| self.id.clone()),
            disable_cache: self.disable_cache || overrides.disable_cache,
            auto_score: self.auto_score && overrides.auto_score,
            known_columns: overrides
                .known_columns
                .clone()
                .or_else(|| self.known_columns.clone()),
            initial_data: overrides
                .initial_data
                .clone()
                .or_else(|| self.initial_data.clone()),
            initial_data_dirty: self.initial_data_dirty || overrides.initial_data_dirty,
            initial_error: overrides
                .initial_error
                .clone()
                .or_else(|| self.initial_error.clone()),
        }
    }

    /// Drop the one-shot initial state.
    pub fn without_initial_state(mut self) -> Self {
        self.initial_data = None;
        self.initial_data_dirty = false;
        self.initial_error = None;
        self
    }
}

/// Similarity cutoff used by [`QueryValue::search`].
pub const DEFAULT_SEARCH_THRESHOLD: f64 = 0.5;

/// Aggregate functions accepted by [`QueryValue::agg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Avg,
}

impl Aggregate {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
        }
    }
}

impl FromStr for Aggregate {
    type Err = QueryError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        match key {
            "sum" => Ok(Aggregate::Sum),
            "avg" => Ok(Aggregate::Avg),
            other => Err(QueryError::UnknownAggregate(other.to_string())),
        }
    }
}

/// A column to aggregate, optionally aliased. Unaliased columns are named
/// `<aggregate>_<column>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggColumn {
    pub column: String,
    pub alias: Option<String>,
}

impl AggColumn {
    pub fn aliased(column: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: Some(alias.into()),
        }
    }
}

impl From<&str> for AggColumn {
    fn from(column: &str) -> Self {
        Self {
            column: column.to_string(),
            alias: None,
        }
    }
}

pub type Subscriber = Arc<dyn Fn(&QueryValue) + Send + Sync>;

/// Handle returned by [`QueryValue::subscribe`].
///
/// The subscription stays active until [`Subscription::unsubscribe`] is called.
pub struct Subscription {
    query: Weak<Query>,
    id: u64,
}

impl Subscription {
    /// Stop receiving publishes. Returns `false` if already removed.
    pub fn unsubscribe(self) -> bool {
        match self.query.upgrade() {
            Some(query) => {
                let mut subscribers = query.subscribers.lock();
                let before = subscribers.len();
                subscribers.retain(|(id, _)| *id != self.id);
                before != subscribers.len()
            }
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Shared dependencies a query is constructed with.
#[derive(Clone)]
pub(crate) struct QueryEnv {
    pub config: Arc<QueryConfig>,
    pub tracker: Arc<InFlightTracker>,
    pub context: Weak<ContextShared>,
}

impl QueryEnv {
    pub(crate) fn of(context: &QueryContext) -> Self {
        Self {
            config: context.shared().config.clone(),
            tracker: context.shared().tracker.clone(),
            context: Arc::downgrade(context.shared()),
        }
    }
}

fn next_instance_key() -> InstanceKey {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub struct Query {
    instance: InstanceKey,
    id: String,
    hash: QueryHash,
    original_text: String,
    builder: Box<dyn SqlBuilder>,
    runner: SharedRunner,
    auto_score: bool,
    env: QueryEnv,

    data: AsyncFacet<Arc<Rows>>,
    length: AsyncFacet<u64>,
    columns: AsyncFacet<Arc<Vec<ColumnDescription>>>,
    /// Rows shown while dirty initial data is being refreshed
    stale_rows: Mutex<Option<Arc<Rows>>>,
    dirty: bool,

    score: Mutex<Option<u64>>,
    error: OnceLock<QueryError>,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_subscriber: AtomicU64,
    events: EventEmitter<QueryEvent>,
}

impl Query {
    /// Construct a query outside the cache.
    ///
    /// Prefer [`QueryContext::create`](crate::context::QueryContext::create): a
    /// query built here is never deduplicated and is not warmed up.
    pub fn new(
        input: impl Into<QueryInput>,
        runner: SharedRunner,
        options: QueryOptions,
        context: &QueryContext,
    ) -> QueryValue {
        let input = input.into();
        warn!(
            hash = %input.hash().short(),
            "Directly constructing a Query is not recommended; use QueryContext::create"
        );
        QueryValue::new(Self::build(input, runner, options, QueryEnv::of(context)))
    }

    pub(crate) fn build(
        input: QueryInput,
        runner: SharedRunner,
        options: QueryOptions,
        env: QueryEnv,
    ) -> Arc<Query> {
        let hash = input.hash();
        let id = options.id.clone().unwrap_or_else(|| hash.short());

        let (builder, original_text, construction_error) = match input {
            QueryInput::Text(text) if text.trim().is_empty() => (
                Box::new(SelectBuilder::from_text(EMPTY_QUERY_TEXT)) as Box<dyn SqlBuilder>,
                EMPTY_QUERY_TEXT.to_string(),
                Some(QueryError::Construction("No Query Text provided".to_string())),
            ),
            QueryInput::Text(text) => (
                Box::new(SelectBuilder::from_text(&text)) as Box<dyn SqlBuilder>,
                text,
                None,
            ),
            QueryInput::Builder(builder) => {
                let text = builder.render();
                (builder, text, None)
            }
        };

        let query = Arc::new(Query {
            instance: next_instance_key(),
            id,
            hash,
            original_text,
            builder,
            runner,
            auto_score: options.auto_score,
            env,
            data: AsyncFacet::new(),
            length: AsyncFacet::new(),
            columns: AsyncFacet::new(),
            stale_rows: Mutex::new(None),
            dirty: options.initial_data.is_some() && options.initial_data_dirty,
            score: Mutex::new(None),
            error: OnceLock::new(),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            events: EventEmitter::new(),
        });

        if let Some(err) = construction_error.or(options.initial_error) {
            query.set_error(err);
            return query;
        }

        if let Some(rows) = options.initial_data {
            debug!(query = %query.id, rows = rows.len(), "Created with initial data");
            let rows = Arc::new(rows);
            if query.dirty {
                *query.stale_rows.lock() = Some(rows);
            } else {
                query.data.resolve_immediately(rows.clone());
                query.length.resolve_immediately(rows.len() as u64);
            }
        }

        if let Some(columns) = options.known_columns {
            query.columns.resolve_immediately(Arc::new(columns));
        }

        query.refresh_score();
        query
    }

    /// Warm the length and columns facets in the background, and refresh dirty
    /// initial data. The data facet is otherwise left untouched.
    pub(crate) fn prime(self: &Arc<Self>) {
        if Handle::try_current().is_err() {
            debug!(query = %self.id, "No async runtime; skipping warm-up");
            return;
        }
        if let Some(job) = self.start_columns() {
            tokio::spawn(job);
        }
        if let Some(job) = self.start_length() {
            tokio::spawn(job);
        }
        if self.dirty {
            self.spawn_data_fetch("dirty initial data");
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hash(&self) -> QueryHash {
        self.hash
    }

    /// The query text as it was supplied
    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    /// The query text as it is executed
    pub fn text(&self) -> String {
        self.builder.render()
    }

    pub fn error(&self) -> Option<QueryError> {
        self.error.get().cloned()
    }

    pub fn score(&self) -> Option<u64> {
        *self.score.lock()
    }

    pub fn data_state(&self) -> FacetState {
        self.data.state()
    }

    pub fn length_state(&self) -> FacetState {
        self.length.state()
    }

    pub fn columns_state(&self) -> FacetState {
        self.columns.state()
    }

    pub fn data_loaded(&self) -> bool {
        self.data.state().is_settled()
    }

    pub fn data_loading(&self) -> bool {
        self.data.state() == FacetState::Loading
    }

    pub fn length_loaded(&self) -> bool {
        self.length.state().is_settled()
    }

    pub fn length_loading(&self) -> bool {
        self.length.state() == FacetState::Loading
    }

    pub fn columns_loaded(&self) -> bool {
        self.columns.state().is_settled()
    }

    pub fn columns_loading(&self) -> bool {
        self.columns.state() == FacetState::Loading
    }

    /// True when data, length and columns have all resolved
    pub fn ready(&self) -> bool {
        [self.data.state(), self.length.state(), self.columns.state()]
            .iter()
            .all(|s| *s == FacetState::Resolved)
    }

    /// True when any facet is being fetched
    pub fn loading(&self) -> bool {
        self.data_loading() || self.length_loading() || self.columns_loading()
    }

    /// Loaded rows, falling back to dirty initial rows while they refresh.
    /// Never starts a fetch.
    pub fn loaded_rows(&self) -> Option<Arc<Rows>> {
        self.data.value().or_else(|| self.stale_rows.lock().clone())
    }

    /// Resolved row count. Never starts a fetch.
    pub fn row_count(&self) -> Option<u64> {
        self.length.value()
    }

    /// Resolved schema, or an empty list. Never starts a fetch.
    pub fn column_descriptions(&self) -> Arc<Vec<ColumnDescription>> {
        self.columns.value().unwrap_or_default()
    }

    /// A row with every known column mapped to `null`.
    pub fn mock_row(&self) -> Row {
        mock_row(&self.column_descriptions())
    }

    pub fn on<F>(&self, kind: QueryEventKind, handler: F) -> HandlerId
    where
        F: Fn(&QueryEvent, QueryEventKind) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    pub fn off(&self, kind: QueryEventKind, id: HandlerId) -> bool {
        self.events.off(kind, id)
    }

    fn set_error(&self, err: QueryError) {
        if self.error.set(err.clone()).is_ok() {
            error!(query = %self.id, hash = %self.hash.short(), error = %err, "Error in Query");
            self.events.emit(&QueryEvent::Error(err));
        }
    }

    // ---- subscriptions ----

    pub(crate) fn subscribe(self: &Arc<Self>, subscriber: Subscriber) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, subscriber.clone()));
        subscriber(&QueryValue::new(self.clone()));
        Subscription {
            query: Arc::downgrade(self),
            id,
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn publish(self: &Arc<Self>, source: &str) {
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        if snapshot.is_empty() {
            return;
        }
        debug!(query = %self.id, source, subscribers = snapshot.len(), "Publishing");
        let value = QueryValue::new(self.clone());
        for subscriber in snapshot {
            subscriber(&value);
        }
    }

    // ---- fetching ----

    /// Claim a facet for fetching, or short-circuit it if the query has failed.
    fn claim<T: Clone>(self: &Arc<Self>, facet: &AsyncFacet<T>, name: &str) -> bool {
        if let Some(err) = self.error() {
            debug!(query = %self.id, facet = name, "Refusing to execute, query has an error state");
            if facet.reject_immediately(err) {
                self.publish(name);
            }
            return false;
        }
        let claimed = facet.start();
        if claimed {
            self.publish(name);
        }
        claimed
    }

    fn start_data(self: &Arc<Self>) -> Option<BoxFuture<'static, ()>> {
        if !self.claim(&self.data, "data") {
            return None;
        }
        let this = self.clone();
        Some(async move { this.run_data().await }.boxed())
    }

    fn start_length(self: &Arc<Self>) -> Option<BoxFuture<'static, ()>> {
        if let Some(rows) = self.data.value() {
            if self.length.resolve_immediately(rows.len() as u64) {
                debug!(query = %self.id, "Inferred length from already-resolved data");
                self.refresh_score();
                self.publish("length");
            }
            return None;
        }
        if !self.claim(&self.length, "length") {
            return None;
        }
        let this = self.clone();
        Some(async move { this.run_length().await }.boxed())
    }

    fn start_columns(self: &Arc<Self>) -> Option<BoxFuture<'static, ()>> {
        if !self.claim(&self.columns, "columns") {
            return None;
        }
        let this = self.clone();
        Some(async move { this.run_columns().await }.boxed())
    }

    /// Run a claimed job detached from the caller when a runtime is available,
    /// so that dropping the caller's future never strands a loading facet.
    async fn drive(job: BoxFuture<'static, ()>) {
        if Handle::try_current().is_ok() {
            tokio::spawn(job);
        } else {
            job.await;
        }
    }

    pub(crate) async fn fetch_data(self: &Arc<Self>) -> Result<Arc<Rows>, QueryError> {
        if let Some(job) = self.start_data() {
            Self::drive(job).await;
        }
        self.data.wait().await
    }

    pub(crate) async fn fetch_length(self: &Arc<Self>) -> Result<u64, QueryError> {
        if let Some(job) = self.start_length() {
            Self::drive(job).await;
        }
        self.length.wait().await
    }

    pub(crate) async fn fetch_columns(self: &Arc<Self>) -> Result<Arc<Vec<ColumnDescription>>, QueryError> {
        if let Some(job) = self.start_columns() {
            Self::drive(job).await;
        }
        self.columns.wait().await
    }

    /// Start all three facets and wait for each to settle, successfully or not.
    pub(crate) async fn fetch_all(self: &Arc<Self>) {
        let (columns, data, length) =
            futures::join!(self.fetch_columns(), self.fetch_data(), self.fetch_length());
        debug!(
            query = %self.id,
            columns_ok = columns.is_ok(),
            data_ok = data.is_ok(),
            length_ok = length.is_ok(),
            "Fetch settled"
        );
    }

    /// Start the data facet from a synchronous accessor.
    pub(crate) fn spawn_data_fetch(self: &Arc<Self>, trigger: &str) {
        if self.data.state() != FacetState::Init {
            return;
        }
        if Handle::try_current().is_err() {
            debug!(query = %self.id, trigger, "No async runtime; implicit fetch skipped");
            return;
        }
        if let Some(job) = self.start_data() {
            debug!(query = %self.id, trigger, "Implicit query fetch");
            tokio::spawn(job);
        }
    }

    /// Start the length facet from a synchronous accessor.
    pub(crate) fn spawn_length_fetch(self: &Arc<Self>) {
        if self.length.state() != FacetState::Init {
            return;
        }
        if self.data.value().is_none() && Handle::try_current().is_err() {
            return;
        }
        if let Some(job) = self.start_length() {
            tokio::spawn(job);
        }
    }

    /// Execute the data query without touching facets or subscribers.
    pub(crate) fn background_fetch(&self) {
        let Ok(handle) = Handle::try_current() else {
            debug!(query = %self.id, "Did not execute background fetch outside a runtime");
            return;
        };
        let runner = self.runner.clone();
        let text = format!("--data\n{}", self.text().trim());
        let name = self.id.clone();
        debug!(query = %self.id, "Executed background fetch");
        handle.spawn(async move {
            tokio::task::yield_now().await;
            if let Err(e) = runner.run(&text, &name).await {
                debug!(query = %name, error = %e, "Background fetch failed");
            }
        });
    }

    fn data_query_text(&self) -> String {
        format!(
            "---- Data {} {}\n{}\n",
            self.id,
            self.hash.short(),
            self.text().trim()
        )
    }

    fn length_query_text(&self) -> String {
        format!(
            "---- Length {} ({})\nSELECT COUNT(*) as rowCount FROM ({})\n",
            self.id,
            self.hash.short(),
            self.text().trim()
        )
    }

    fn columns_query_text(&self) -> String {
        format!(
            "---- Columns {} ({})\nDESCRIBE {}\n",
            self.id,
            self.hash.short(),
            self.text().trim()
        )
    }

    async fn run_data(self: Arc<Self>) {
        let text = self.data_query_text();
        debug!(query = %self.id, text = %text, "Data query");

        self.env.tracker.add(self.instance);
        let started = Instant::now();
        let result = self.runner.run(&text, &format!("{}_data", self.id)).await;
        let elapsed = started.elapsed();

        if elapsed > self.env.config.long_run_threshold() {
            warn!(query = %self.id, elapsed_ms = elapsed.as_millis() as u64, "Long-running query");
            self.events.emit(&QueryEvent::LongRun(elapsed));
        }

        match result {
            Ok(rows) => {
                self.stale_rows.lock().take();
                self.data.resolve(Arc::new(rows));
                self.env.tracker.remove(self.instance);
                self.events.emit(&QueryEvent::DataReady);
            }
            Err(err) => {
                self.set_error(err.clone());
                self.data.reject(err);
                self.env.tracker.remove(self.instance);
            }
        }
        self.publish("data");
    }

    async fn run_length(self: Arc<Self>) {
        let text = self.length_query_text();
        debug!(query = %self.id, text = %text, "Length query");

        let result = self
            .runner
            .run(&text, &format!("{}_length", self.id))
            .await
            .and_then(|rows| parse_row_count(&rows));

        match result {
            Ok(count) => {
                self.length.resolve(count);
                self.refresh_score();
            }
            Err(err) => {
                self.set_error(err.clone());
                self.length.reject(err);
            }
        }
        self.publish("length");
    }

    async fn run_columns(self: Arc<Self>) {
        let text = self.columns_query_text();
        debug!(query = %self.id, text = %text, "Columns query");

        let result = self
            .runner
            .run(&text, &format!("{}_columns", self.id))
            .await
            .and_then(|rows| ColumnDescription::list_from_rows(&rows));

        match result {
            Ok(columns) => {
                self.columns.resolve(Arc::new(columns));
                self.refresh_score();
            }
            Err(err) => {
                self.set_error(err.clone());
                self.columns.reject(err);
            }
        }
        self.publish("columns");
    }

    /// Compute the score once both length and columns have resolved.
    fn refresh_score(&self) {
        if !self.auto_score {
            return;
        }
        let (Some(length), Some(columns)) = (self.length.value(), self.columns.value()) else {
            return;
        };
        let score = {
            let mut slot = self.score.lock();
            if slot.is_some() {
                return;
            }
            let score = compute_score(length, &columns);
            *slot = Some(score);
            score
        };
        if score > self.env.config.high_score_threshold {
            warn!(query = %self.id, score, "Query result is estimated to use a lot of memory");
            self.events.emit(&QueryEvent::HighScore(score));
        }
    }

    // ---- derivation ----

    fn derive(
        self: &Arc<Self>,
        builder: Box<dyn SqlBuilder>,
        known_columns: Option<Vec<ColumnDescription>>,
    ) -> QueryValue {
        let context = match self.env.context.upgrade() {
            Some(shared) => QueryContext::from_shared(shared),
            None => QueryContext::new((*self.env.config).clone()),
        };
        let mut options = QueryOptions::default();
        if let Some(columns) = known_columns {
            options = options.with_known_columns(columns);
        }
        context.create(QueryInput::Builder(builder), self.runner.clone(), options)
    }

    fn known_columns(&self) -> Option<Vec<ColumnDescription>> {
        self.columns.value().map(|c| c.as_ref().clone())
    }

    pub(crate) fn filter(self: &Arc<Self>, predicate: &str) -> QueryValue {
        let mut builder = self.builder.clone();
        builder.filter(predicate);
        self.derive(builder, self.known_columns())
    }

    pub(crate) fn limit(self: &Arc<Self>, n: u64) -> QueryValue {
        let mut builder = self.builder.clone();
        builder.limit(n);
        self.derive(builder, self.known_columns())
    }

    pub(crate) fn offset(self: &Arc<Self>, n: u64) -> QueryValue {
        let mut builder = self.builder.clone();
        builder.offset(n);
        self.derive(builder, self.known_columns())
    }

    pub(crate) fn paginate(self: &Arc<Self>, offset: u64, n: u64) -> QueryValue {
        let mut builder = self.builder.clone();
        builder.offset(offset);
        builder.limit(n);
        self.derive(builder, self.known_columns())
    }

    pub(crate) fn group_by(self: &Arc<Self>, columns: &[String], with_row_count: bool) -> QueryValue {
        let mut builder = self.builder.clone();
        let projections: Vec<Projection> = columns.iter().map(|c| Projection::column(c)).collect();
        builder.replace_select(&projections);
        if with_row_count {
            builder.select(&[Projection::aliased("count(*)", "rows")]);
        }
        builder.group_by(columns);

        let known = self.known_columns().map(|existing| {
            let mut grouped: Vec<ColumnDescription> = columns
                .iter()
                .filter_map(|name| existing.iter().find(|c| &c.column_name == name).cloned())
                .collect();
            if with_row_count {
                grouped.push(ColumnDescription::new("rows", "BIGINT", false));
            }
            grouped
        });
        self.derive(builder, known)
    }

    pub(crate) fn agg<K>(
        self: &Arc<Self>,
        aggregates: impl IntoIterator<Item = (K, Vec<AggColumn>)>,
    ) -> Result<QueryValue, QueryError>
    where
        K: AsRef<str>,
    {
        let mut builder = self.builder.clone();
        let mut added = Vec::new();
        for (key, columns) in aggregates {
            let aggregate: Aggregate = key.as_ref().parse()?;
            for col in columns {
                let alias = col
                    .alias
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", aggregate.as_str(), col.column));
                let expr = format!("{}({})", aggregate.as_str(), quote_identifier(&col.column));
                builder.select(&[Projection::aliased(expr, &alias)]);
                added.push(ColumnDescription::new(alias, "DOUBLE", true));
            }
        }
        let known = self.known_columns().map(|mut existing| {
            existing.extend(added);
            existing
        });
        Ok(self.derive(builder, known))
    }

    pub(crate) fn search(self: &Arc<Self>, term: &str, column: &str, threshold: f64) -> QueryValue {
        let mut builder = self.builder.clone();
        let similarity = format!(
            "jaro_winkler_similarity(lower({}), lower({}))",
            quote_literal(term),
            quote_identifier(column)
        );
        builder.replace_select(&[Projection::aliased(similarity, "similarity"), Projection::all()]);
        builder.filter(&format!("similarity > {}", threshold));
        builder.order_by("similarity DESC");

        let known = self.known_columns().map(|mut existing| {
            existing.push(ColumnDescription::new("similarity", "INTEGER", false));
            existing
        });
        self.derive(builder, known)
    }
}

/// Read `rowCount` from the first row of a length query result.
fn parse_row_count(rows: &[Row]) -> Result<u64, QueryError> {
    let value = rows
        .first()
        .and_then(|row| row.get("rowCount"))
        .ok_or_else(|| QueryError::Schema("Length query returned no rowCount".to_string()))?;
    let count = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    count.ok_or_else(|| QueryError::Schema(format!("Invalid rowCount: {}", value)))
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("hash", &self.hash)
            .field("data", &self.data.state())
            .field("length", &self.length.state())
            .field("columns", &self.columns.state())
            .field("score", &self.score())
            .field("error", &self.error())
            .finish()
    }
}
