//! Reactive controller
//!
//! Binds a consumer callback to whichever query was most recently requested.
//! A new query is fetched before it replaces the active one, so the consumer
//! keeps seeing the previous result meanwhile. Every update takes a change
//! index; a fetch that settles after a newer update was requested is
//! discarded, so the last request always wins regardless of completion order.
//!
//! Fetches that outlast the grace period raise a loading signal observable
//! through [`ReactiveQuery::loading_signal`].

use crate::builder::SelectBuilder;
use crate::context::QueryContext;
use crate::query::{QueryInput, QueryOptions, Subscriber, Subscription};
use crate::runner::SharedRunner;
use crate::value::QueryValue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// What an update binds to.
pub enum ReactiveInput {
    /// An existing handle, used as-is.
    Value(QueryValue),
    /// Something to create through the controller's context.
    Query(QueryInput),
}

impl From<QueryValue> for ReactiveInput {
    fn from(value: QueryValue) -> Self {
        ReactiveInput::Value(value)
    }
}

impl From<&QueryValue> for ReactiveInput {
    fn from(value: &QueryValue) -> Self {
        ReactiveInput::Value(value.clone())
    }
}

impl From<QueryInput> for ReactiveInput {
    fn from(input: QueryInput) -> Self {
        ReactiveInput::Query(input)
    }
}

impl From<&str> for ReactiveInput {
    fn from(text: &str) -> Self {
        ReactiveInput::Query(text.into())
    }
}

impl From<String> for ReactiveInput {
    fn from(text: String) -> Self {
        ReactiveInput::Query(text.into())
    }
}

impl From<SelectBuilder> for ReactiveInput {
    fn from(builder: SelectBuilder) -> Self {
        ReactiveInput::Query(builder.into())
    }
}

/// How an update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The requested query is now active.
    Committed,
    /// The requested query has the same hash as the active one.
    Unchanged,
    /// A newer update was requested before this one settled.
    Superseded,
}

struct Binding {
    change_index: u64,
    /// Change index of the last update that committed or matched the active query
    settled_index: u64,
    subscription: Option<Subscription>,
}

pub struct ReactiveQuery {
    context: QueryContext,
    runner: SharedRunner,
    options: Mutex<QueryOptions>,
    callback: Subscriber,
    grace_period: Duration,
    binding: Mutex<Binding>,
    /// Kept outside `binding` so the callback may read it while being invoked
    active: Mutex<Option<QueryValue>>,
    loading: watch::Sender<bool>,
}

impl ReactiveQuery {
    pub fn new<F>(
        context: QueryContext,
        runner: SharedRunner,
        options: QueryOptions,
        callback: F,
    ) -> Self
    where
        F: Fn(&QueryValue) + Send + Sync + 'static,
    {
        let grace_period = context.config().load_grace_period();
        let (loading, _) = watch::channel(false);
        Self {
            context,
            runner,
            options: Mutex::new(options),
            callback: Arc::new(callback),
            grace_period,
            binding: Mutex::new(Binding {
                change_index: 0,
                settled_index: 0,
                subscription: None,
            }),
            active: Mutex::new(None),
            loading,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// The query currently bound to the callback.
    pub fn active(&self) -> Option<QueryValue> {
        self.active.lock().clone()
    }

    /// Observe the loading signal: `true` while an update has been loading for
    /// longer than the grace period.
    pub fn loading_signal(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Request `next` as the active query.
    ///
    /// `overrides` are layered over the controller's options when `next` is
    /// created here. Initial data and errors only apply to the first update,
    /// whether they come from the controller's options or from `overrides`.
    pub async fn update(
        &self,
        next: impl Into<ReactiveInput>,
        overrides: Option<QueryOptions>,
    ) -> UpdateOutcome {
        let target = {
            let mut binding = self.binding.lock();
            binding.change_index += 1;
            binding.change_index
        };

        let value = match next.into() {
            ReactiveInput::Value(value) => value,
            ReactiveInput::Query(input) => {
                let options = {
                    let base = self.options.lock();
                    let merged = match &overrides {
                        Some(overrides) => base.merged_with(overrides),
                        None => base.clone(),
                    };
                    if target > 1 {
                        merged.without_initial_state()
                    } else {
                        merged
                    }
                };
                self.context.create(input, self.runner.clone(), options)
            }
        };
        self.strip_initial_state();

        let first = {
            let mut binding = self.binding.lock();
            let current = self.active.lock().clone();
            match current {
                None if binding.change_index != target => return UpdateOutcome::Superseded,
                None => {
                    debug!(query = %value.id(), "Binding first reactive query");
                    self.commit(&mut binding, value.clone(), target);
                    true
                }
                Some(active) if active.hash() == value.hash() => {
                    debug!(query = %value.id(), "Hash unchanged, skipping update");
                    if binding.change_index == target {
                        binding.settled_index = target;
                        self.set_loading(false);
                    }
                    return UpdateOutcome::Unchanged;
                }
                Some(_) => false,
            }
        };
        if first {
            value.fetch().await;
            return if self.binding.lock().change_index == target {
                UpdateOutcome::Committed
            } else {
                UpdateOutcome::Superseded
            };
        }

        {
            let fetch = value.fetch();
            tokio::pin!(fetch);
            tokio::select! {
                _ = &mut fetch => {}
                _ = tokio::time::sleep(self.grace_period) => {
                    if self.binding.lock().change_index == target {
                        debug!(query = %value.id(), "Reactive update exceeded grace period");
                        self.set_loading(true);
                    }
                    (&mut fetch).await;
                }
            }
        }

        let mut binding = self.binding.lock();
        if binding.change_index != target {
            debug!(
                query = %value.id(),
                target,
                latest = binding.change_index,
                "Change index does not match, results are discarded"
            );
            if binding.settled_index == binding.change_index {
                self.set_loading(false);
            }
            return UpdateOutcome::Superseded;
        }
        self.commit(&mut binding, value, target);
        UpdateOutcome::Committed
    }

    /// Swap the active query. Called with the binding lock held.
    fn commit(&self, binding: &mut Binding, value: QueryValue, target: u64) {
        if let Some(previous) = binding.subscription.take() {
            previous.unsubscribe();
        }
        *self.active.lock() = Some(value.clone());
        binding.subscription = Some(value.subscribe_shared(self.callback.clone()));
        binding.settled_index = target;
        self.set_loading(false);
    }

    /// Notify watchers only when the flag actually flips.
    fn set_loading(&self, loading: bool) {
        self.loading
            .send_if_modified(|current| std::mem::replace(current, loading) != loading);
    }

    fn strip_initial_state(&self) {
        let mut options = self.options.lock();
        if options.initial_data.is_some() || options.initial_error.is_some() {
            *options = options.clone().without_initial_state();
        }
    }
}

impl Drop for ReactiveQuery {
    fn drop(&mut self) {
        if let Some(subscription) = self.binding.get_mut().subscription.take() {
            subscription.unsubscribe();
        }
    }
}
