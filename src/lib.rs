//! Lazyrows: Content-Addressed Lazy Query Results
//!
//! A client-side cache and reactivity layer for SQL query results. Queries are
//! identified by a hash of their construction arguments, so equal queries share
//! one instance. Each query exposes three independently fetched facets (rows,
//! row count, column schema) behind a lazy handle that only runs the expensive
//! data query when rows are actually read. A reactive controller binds a
//! consumer to the latest requested query with last-write-wins semantics.

pub mod builder;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod facet;
pub mod hash;
pub mod inflight;
pub mod logging;
pub mod query;
pub mod reactive;
pub mod runner;
pub mod score;
pub mod types;
pub mod value;

pub use builder::{Projection, SelectBuilder, SqlBuilder};
pub use config::{ConfigLoader, QueryConfig};
pub use context::QueryContext;
pub use error::QueryError;
pub use events::{GlobalEvent, HandlerId, QueryEvent, QueryEventKind};
pub use facet::{AsyncFacet, FacetState};
pub use query::{
    AggColumn, Aggregate, Query, QueryInput, QueryOptions, Subscription, DEFAULT_SEARCH_THRESHOLD,
};
pub use reactive::{ReactiveInput, ReactiveQuery, UpdateOutcome};
pub use runner::{runner_fn, sync_runner_fn, Runner, SharedRunner};
pub use types::{ColumnDescription, QueryHash, Row, Rows};
pub use value::{QueryValue, FETCH_TRIGGERS};
