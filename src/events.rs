//! In-process event emitters for per-query and context-wide events.
//!
//! Handlers receive the event payload together with the event kind, and are
//! removed by the [`HandlerId`] returned on registration.

use crate::error::QueryError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Token returned by [`EventEmitter::on`], used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// An event payload that knows which kind it belongs to.
pub trait Event: Debug {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync;

    fn kind(&self) -> Self::Kind;
}

pub type Handler<E> = Arc<dyn Fn(&E, <E as Event>::Kind) + Send + Sync>;

/// Per-query events.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    DataReady,
    Error(QueryError),
    HighScore(u64),
    LongRun(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryEventKind {
    DataReady,
    Error,
    HighScore,
    LongRun,
}

impl QueryEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryEventKind::DataReady => "dataReady",
            QueryEventKind::Error => "error",
            QueryEventKind::HighScore => "highScore",
            QueryEventKind::LongRun => "longRun",
        }
    }
}

impl Event for QueryEvent {
    type Kind = QueryEventKind;

    fn kind(&self) -> QueryEventKind {
        match self {
            QueryEvent::DataReady => QueryEventKind::DataReady,
            QueryEvent::Error(_) => QueryEventKind::Error,
            QueryEvent::HighScore(_) => QueryEventKind::HighScore,
            QueryEvent::LongRun(_) => QueryEventKind::LongRun,
        }
    }
}

/// Context-wide events, emitted by the in-flight tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalEvent {
    InFlightQueryStart,
    InFlightQueryEnd,
}

impl GlobalEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            GlobalEvent::InFlightQueryStart => "inFlightQueryStart",
            GlobalEvent::InFlightQueryEnd => "inFlightQueryEnd",
        }
    }
}

impl Event for GlobalEvent {
    type Kind = GlobalEvent;

    fn kind(&self) -> GlobalEvent {
        *self
    }
}

pub struct EventEmitter<E: Event> {
    handlers: Mutex<HashMap<E::Kind, Vec<(HandlerId, Handler<E>)>>>,
    next_id: AtomicU64,
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> HandlerId
    where
        F: Fn(&E, E::Kind) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: E::Kind, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        before != list.len()
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's kind.
    ///
    /// Handlers run outside the registry lock, so they may register or remove
    /// handlers themselves.
    pub fn emit(&self, event: &E) {
        let kind = event.kind();
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .lock()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in snapshot {
            handler(event, kind);
        }
    }
}
