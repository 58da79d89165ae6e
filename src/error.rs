//! Error types for the query cache and reactivity engine.

use thiserror::Error;

/// Query-level errors
///
/// A query holds at most one of these as its terminal error. The type is `Clone`
/// so the same settled outcome can be handed to every waiter of every facet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Refusing to create query: {0}")]
    Construction(String),

    #[error("Runner failed: {0}")]
    Runner(String),

    #[error("Malformed column metadata: {0}")]
    Schema(String),

    #[error("Unknown agg function: {0}")]
    UnknownAggregate(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueryError {
    /// Wrap any backend failure as a runner error.
    pub fn runner(err: impl std::fmt::Display) -> Self {
        QueryError::Runner(err.to_string())
    }
}

impl From<config::ConfigError> for QueryError {
    fn from(err: config::ConfigError) -> Self {
        QueryError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Schema(err.to_string())
    }
}
