//! Query context
//!
//! A [`QueryContext`] owns the cache, the in-flight tracker and the
//! configuration shared by every query created through it. Contexts are cheap
//! to clone; clones share state. Queries refer back to their context weakly,
//! so dropping every clone of a context frees its cache.

use crate::cache::QueryCache;
use crate::config::QueryConfig;
use crate::events::{GlobalEvent, HandlerId};
use crate::inflight::InFlightTracker;
use crate::query::{Query, QueryEnv, QueryInput, QueryOptions};
use crate::reactive::ReactiveQuery;
use crate::runner::SharedRunner;
use crate::value::QueryValue;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ContextShared {
    pub(crate) cache: QueryCache,
    pub(crate) tracker: Arc<InFlightTracker>,
    pub(crate) config: Arc<QueryConfig>,
}

#[derive(Clone)]
pub struct QueryContext {
    shared: Arc<ContextShared>,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

impl QueryContext {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                cache: QueryCache::new(config.cache_max_score),
                tracker: Arc::new(InFlightTracker::new()),
                config: Arc::new(config),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<ContextShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<ContextShared> {
        &self.shared
    }

    pub fn config(&self) -> &QueryConfig {
        &self.shared.config
    }

    /// Get or create the query for `input`.
    ///
    /// Creating the same input twice returns the same instance unless the
    /// cache is disabled for the call or the first instance has been evicted.
    /// A newly created query starts warming its length and columns in the
    /// background when a runtime is available; its data is left unfetched.
    pub fn create(
        &self,
        input: impl Into<QueryInput>,
        runner: SharedRunner,
        options: QueryOptions,
    ) -> QueryValue {
        let input = input.into();
        let env = QueryEnv::of(self);

        if options.disable_cache {
            let query = Query::build(input, runner, options, env);
            debug!(query = %query.id(), "Created uncached query");
            query.prime();
            return QueryValue::new(query);
        }

        let hash = input.hash();
        let (query, hit) = self
            .shared
            .cache
            .get_or_insert_with(hash, || Query::build(input, runner, options, env));
        if !hit {
            query.prime();
        }
        QueryValue::new(query)
    }

    /// Build a reactive controller bound to this context.
    pub fn reactive<F>(
        &self,
        runner: SharedRunner,
        options: QueryOptions,
        callback: F,
    ) -> ReactiveQuery
    where
        F: Fn(&QueryValue) + Send + Sync + 'static,
    {
        ReactiveQuery::new(self.clone(), runner, options, callback)
    }

    /// Empty the cache and forget in-flight bookkeeping.
    pub fn reset(&self) {
        self.shared.cache.clear();
        self.shared.tracker.reset();
    }

    /// Empty the cache. Existing handles keep working.
    pub fn empty_cache(&self) {
        self.shared.cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.shared.cache.len()
    }

    pub fn cache_score(&self) -> u64 {
        self.shared.cache.total_score()
    }

    pub fn is_cached(&self, value: &QueryValue) -> bool {
        self.shared
            .cache
            .get(&value.hash())
            .is_some_and(|cached| Arc::ptr_eq(&cached, value.query()))
    }

    pub fn queries_in_flight(&self) -> usize {
        self.shared.tracker.len()
    }

    pub fn add_event_listener<F>(&self, event: GlobalEvent, handler: F) -> HandlerId
    where
        F: Fn(&GlobalEvent, GlobalEvent) + Send + Sync + 'static,
    {
        self.shared.tracker.add_event_listener(event, handler)
    }

    pub fn remove_event_listener(&self, event: GlobalEvent, id: HandlerId) -> bool {
        self.shared.tracker.remove_event_listener(event, id)
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("cache_size", &self.cache_size())
            .field("in_flight", &self.queries_in_flight())
            .finish()
    }
}
