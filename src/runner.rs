//! Runner Abstraction
//!
//! The runner is the host-supplied function that executes query text against a
//! backend and returns rows. Failures propagate as the query's terminal error.

use crate::error::QueryError;
use crate::types::Rows;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Backend execution function
#[async_trait]
pub trait Runner: Send + Sync {
    /// Execute `query_text`. `query_name` identifies the query and facet
    /// (`<id>_data`, `<id>_length`, `<id>_columns`) for backend logging.
    async fn run(&self, query_text: &str, query_name: &str) -> Result<Rows, QueryError>;
}

pub type SharedRunner = Arc<dyn Runner>;

/// Runner backed by an async closure.
pub struct FnRunner<F> {
    f: F,
}

impl<F, Fut> FnRunner<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Rows, QueryError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Runner for FnRunner<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Rows, QueryError>> + Send,
{
    async fn run(&self, query_text: &str, query_name: &str) -> Result<Rows, QueryError> {
        (self.f)(query_text.to_string(), query_name.to_string()).await
    }
}

/// Runner backed by a synchronous closure, for backends that answer inline.
pub struct SyncFnRunner<F> {
    f: F,
}

impl<F> SyncFnRunner<F>
where
    F: Fn(&str, &str) -> Result<Rows, QueryError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Runner for SyncFnRunner<F>
where
    F: Fn(&str, &str) -> Result<Rows, QueryError> + Send + Sync,
{
    async fn run(&self, query_text: &str, query_name: &str) -> Result<Rows, QueryError> {
        (self.f)(query_text, query_name)
    }
}

/// Wrap an async closure as a shared runner.
pub fn runner_fn<F, Fut>(f: F) -> SharedRunner
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Rows, QueryError>> + Send + 'static,
{
    Arc::new(FnRunner::new(f))
}

/// Wrap a synchronous closure as a shared runner.
pub fn sync_runner_fn<F>(f: F) -> SharedRunner
where
    F: Fn(&str, &str) -> Result<Rows, QueryError> + Send + Sync + 'static,
{
    Arc::new(SyncFnRunner::new(f))
}
