//! Single-resolution async state holder.
//!
//! A facet moves `Init -> Loading -> Resolved` or `Init -> Loading -> Rejected`
//! and never leaves a terminal state. The state lives in a `watch` channel so
//! that the `Init -> Loading` claim is an atomic check-and-set and any number of
//! waiters, including late ones, observe the same settled outcome.

use crate::error::QueryError;
use tokio::sync::watch;

/// Observable state of a facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacetState {
    Init,
    Loading,
    Resolved,
    Rejected,
}

impl FacetState {
    pub fn is_settled(self) -> bool {
        matches!(self, FacetState::Resolved | FacetState::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FacetState::Init => "init",
            FacetState::Loading => "loading",
            FacetState::Resolved => "resolved",
            FacetState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone)]
enum Slot<T> {
    Init,
    Loading,
    Resolved(T),
    Rejected(QueryError),
}

impl<T> Slot<T> {
    fn state(&self) -> FacetState {
        match self {
            Slot::Init => FacetState::Init,
            Slot::Loading => FacetState::Loading,
            Slot::Resolved(_) => FacetState::Resolved,
            Slot::Rejected(_) => FacetState::Rejected,
        }
    }
}

pub struct AsyncFacet<T> {
    slot: watch::Sender<Slot<T>>,
}

impl<T: Clone> Default for AsyncFacet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> AsyncFacet<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(Slot::Init);
        Self { slot }
    }

    /// Claim the facet: `Init -> Loading`.
    ///
    /// Returns `true` for exactly one caller; that caller owns running the
    /// executor and settling the facet.
    pub fn start(&self) -> bool {
        self.slot.send_if_modified(|slot| {
            if matches!(slot, Slot::Init) {
                *slot = Slot::Loading;
                true
            } else {
                false
            }
        })
    }

    /// Settle as resolved. Ignored unless the facet is loading.
    pub fn resolve(&self, value: T) -> bool {
        self.slot.send_if_modified(|slot| {
            if matches!(slot, Slot::Loading) {
                *slot = Slot::Resolved(value);
                true
            } else {
                false
            }
        })
    }

    /// Settle as rejected. Ignored unless the facet is loading.
    pub fn reject(&self, err: QueryError) -> bool {
        self.slot.send_if_modified(|slot| {
            if matches!(slot, Slot::Loading) {
                *slot = Slot::Rejected(err);
                true
            } else {
                false
            }
        })
    }

    /// Start and resolve in one step, for values known without running anything.
    pub fn resolve_immediately(&self, value: T) -> bool {
        self.start() && self.resolve(value)
    }

    /// Start and reject in one step, for short-circuited fetches.
    pub fn reject_immediately(&self, err: QueryError) -> bool {
        self.start() && self.reject(err)
    }

    pub fn state(&self) -> FacetState {
        self.slot.borrow().state()
    }

    /// The resolved value, if any, without waiting.
    pub fn value(&self) -> Option<T> {
        match &*self.slot.borrow() {
            Slot::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection, if any, without waiting.
    pub fn error(&self) -> Option<QueryError> {
        match &*self.slot.borrow() {
            Slot::Rejected(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// The settled outcome, if settled.
    pub fn outcome(&self) -> Option<Result<T, QueryError>> {
        match &*self.slot.borrow() {
            Slot::Resolved(value) => Some(Ok(value.clone())),
            Slot::Rejected(err) => Some(Err(err.clone())),
            _ => None,
        }
    }

    /// Wait until the facet settles.
    ///
    /// Does not start the facet; waiting on a facet nobody starts never returns.
    pub async fn wait(&self) -> Result<T, QueryError> {
        let mut rx = self.slot.subscribe();
        let outcome = match rx.wait_for(|slot| slot.state().is_settled()).await {
            Ok(slot) => match &*slot {
                Slot::Resolved(value) => Some(Ok(value.clone())),
                Slot::Rejected(err) => Some(Err(err.clone())),
                _ => None,
            },
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(QueryError::Runner(
                "facet dropped before settling".to_string(),
            ))
        })
    }
}
