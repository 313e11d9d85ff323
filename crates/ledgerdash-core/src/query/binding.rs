//! Per-consumer query orchestration.
//!
//! A [`QueryBinding`] decides whether to serve its key from the cache or the
//! network, retries failed fetches with exponential backoff, writes results
//! back to the shared store and mirrors writes made by anyone else into its
//! own [`QueryState`].
//!
//! Every fetch attempt carries a generation number. Starting a new fetch or
//! deactivating the binding retires the current generation; a continuation
//! that resumes after an await commits only if its generation is still the
//! current one of a live binding, checked under the same lock that performs
//! the commit.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::client::QueryClient;
use super::error::QueryError;
use super::key::QueryKey;
use super::lock::mutex_lock;
use super::options::{QueryData, QueryOptions};
use super::registry::Subscription;

const SOURCE: &str = "query::binding";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// What started a fetch; carried into logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    Mount,
    Refetch,
    Interval,
    Focus,
    Invalidate,
}

impl FetchReason {
    /// Explicit refetches always reach the network; the rest may share a
    /// request already in flight for the key.
    fn may_join_in_flight(self) -> bool {
        !matches!(self, FetchReason::Refetch | FetchReason::Invalidate)
    }
}

/// One consumer's view of its query.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<QueryError>,
    pub is_loading: bool,
    /// Write time of the cache entry `data` came from.
    pub last_fetch_time: Option<Instant>,
    /// Failed attempts in the current fetch, reset on success.
    pub failure_count: u32,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            last_fetch_time: None,
            failure_count: 0,
        }
    }
}

impl<T> QueryState<T> {
    pub fn status(&self) -> QueryStatus {
        if self.is_loading {
            QueryStatus::Loading
        } else if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        }
    }

    pub fn is_error(&self) -> bool {
        self.status() == QueryStatus::Error
    }

    pub fn is_success(&self) -> bool {
        self.status() == QueryStatus::Success
    }

    pub fn is_stale(&self, stale_time: Duration) -> bool {
        match self.last_fetch_time {
            Some(at) => at.elapsed() >= stale_time,
            None => true,
        }
    }
}

#[derive(Default)]
struct Control {
    active: bool,
    generation: u64,
    retry_count: u32,
    fetch: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    focus: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

impl Control {
    fn is_current(&self, generation: u64) -> bool {
        self.active && self.generation == generation
    }
}

struct BindingInner<T> {
    client: QueryClient,
    options: QueryOptions<T>,
    state: watch::Sender<QueryState<T>>,
    control: Mutex<Control>,
}

/// A live consumer of one query key.
///
/// Bindings spawn tokio tasks and must be activated inside a runtime.
/// Dropping the binding deactivates it.
pub struct QueryBinding<T: QueryData> {
    inner: Arc<BindingInner<T>>,
}

impl<T: QueryData> QueryBinding<T> {
    /// Create an idle binding. Nothing happens until [`activate`](Self::activate).
    pub fn new(client: QueryClient, options: QueryOptions<T>) -> Self {
        let initial = QueryState {
            data: options.initial_data.clone(),
            ..QueryState::default()
        };
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(BindingInner {
                client,
                options,
                state,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    /// Mark the consumer live: subscribe to the key, serve from cache or
    /// fetch, and start polling and focus listeners when configured.
    pub fn activate(&self) {
        let inner = &self.inner;
        let options = &inner.options;
        {
            let mut control = mutex_lock(&inner.control, SOURCE, "activate");
            if control.active {
                return;
            }
            control.active = true;

            let weak = Arc::downgrade(inner);
            control.subscription = Some(inner.client.subscribe(&options.query_key, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.sync_from_cache();
                }
            }));

            if !options.enabled {
                debug!(key = %options.query_key, "Binding activated while disabled");
                return;
            }

            if let Some(every) = options.refetch_interval {
                control.poll = Some(spawn_poller(Arc::downgrade(inner), every));
            }
            if options.refetch_on_window_focus {
                let rx = inner.client.focus().subscribe();
                control.focus = Some(spawn_focus_listener(Arc::downgrade(inner), rx));
            }
        }

        inner.load_or_fetch();
    }

    /// Tear down: cancel the outstanding fetch and every timer, unsubscribe.
    pub fn deactivate(&self) {
        self.inner.deactivate();
    }

    /// Fetch now even if the cached value is fresh.
    pub fn refetch(&self) {
        self.inner.start_fetch(FetchReason::Refetch);
    }

    /// Evict this key from the cache and refetch it from this binding.
    pub fn invalidate(&self) {
        let key = &self.inner.options.query_key;
        if self.inner.client.store().delete(key) {
            self.inner.client.registry().notify(key);
        }
        self.inner.start_fetch(FetchReason::Invalidate);
    }

    pub fn key(&self) -> &QueryKey {
        &self.inner.options.query_key
    }

    pub fn state(&self) -> QueryState<T> {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change of this binding.
    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    pub fn error(&self) -> Option<QueryError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.state.borrow().status()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    pub fn is_error(&self) -> bool {
        self.inner.state.borrow().is_error()
    }

    pub fn is_success(&self) -> bool {
        self.inner.state.borrow().is_success()
    }

    pub fn is_stale(&self) -> bool {
        self.inner
            .state
            .borrow()
            .is_stale(self.inner.options.stale_time)
    }

    pub fn is_active(&self) -> bool {
        mutex_lock(&self.inner.control, SOURCE, "is_active").active
    }
}

impl<T: QueryData> Drop for QueryBinding<T> {
    fn drop(&mut self) {
        self.inner.deactivate();
    }
}

impl<T: QueryData> BindingInner<T> {
    fn key(&self) -> &QueryKey {
        &self.options.query_key
    }

    /// Adopt a live cache entry; fetch unless it is still fresh.
    fn load_or_fetch(self: &Arc<Self>) {
        match self.client.store().get(self.key(), self.options.cache_time) {
            Some(entry) => {
                let fresh = !entry.is_stale(self.options.stale_time);
                self.adopt(entry.value, entry.error, entry.timestamp);
                if fresh {
                    debug!(key = %self.key(), "Serving fresh cache entry");
                    return;
                }
                self.start_fetch(FetchReason::Mount);
            }
            None => self.start_fetch(FetchReason::Mount),
        }
    }

    fn start_fetch(self: &Arc<Self>, reason: FetchReason) {
        let mut control = mutex_lock(&self.control, SOURCE, "start_fetch");
        self.spawn_fetch(&mut control, reason);
    }

    /// Interval tick: start a fetch unless one is running or backing off.
    fn poll(self: &Arc<Self>) {
        let mut control = mutex_lock(&self.control, SOURCE, "poll");
        if control.fetch.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(key = %self.key(), "Fetch still running, skipping poll");
            return;
        }
        self.spawn_fetch(&mut control, FetchReason::Interval);
    }

    fn spawn_fetch(self: &Arc<Self>, control: &mut Control, reason: FetchReason) {
        if !control.active {
            debug!(key = %self.key(), ?reason, "Ignoring fetch on inactive binding");
            return;
        }

        control.generation += 1;
        control.retry_count = 0;
        let generation = control.generation;
        if let Some(previous) = control.fetch.take() {
            if !previous.is_finished() {
                debug!(key = %self.key(), "Cancelling superseded fetch");
            }
            previous.abort();
        }

        self.state.send_modify(|state| {
            state.is_loading = true;
            state.failure_count = 0;
        });

        debug!(key = %self.key(), ?reason, generation, "Starting fetch");
        let this = Arc::clone(self);
        control.fetch = Some(tokio::spawn(async move {
            this.run_fetch(generation, reason).await;
        }));
    }

    async fn run_fetch(self: Arc<Self>, generation: u64, reason: FetchReason) {
        let key = self.key().clone();
        let join_in_flight = reason.may_join_in_flight();
        let mut attempt: u32 = 0;

        loop {
            self.client.observe_start(&key);
            let started = Instant::now();
            let result = self
                .client
                .fetch_json(&key, &self.options.query_fn, join_in_flight)
                .await;
            self.client.observe_finish(&key, started, result.is_ok());

            let err = match result {
                Ok(value) => {
                    self.commit_success(generation, value);
                    return;
                }
                Err(err) => err,
            };

            if attempt >= self.options.retry {
                self.commit_failure(generation, err);
                return;
            }

            let delay = self.options.backoff_delay(attempt);
            attempt += 1;
            if !self.record_retry(generation, attempt) {
                debug!(key = %key, "Dropping failure of cancelled fetch");
                return;
            }
            warn!(
                key = %key,
                retry = attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Fetch failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn record_retry(&self, generation: u64, attempt: u32) -> bool {
        let mut control = mutex_lock(&self.control, SOURCE, "record_retry");
        if !control.is_current(generation) {
            return false;
        }
        control.retry_count = attempt;
        self.state.send_modify(|state| state.failure_count = attempt);
        true
    }

    fn commit_success(&self, generation: u64, value: Value) {
        let data: T = match serde_json::from_value(value.clone()) {
            Ok(data) => data,
            Err(err) => {
                self.commit_failure(generation, QueryError::from(err));
                return;
            }
        };

        {
            let mut control = mutex_lock(&self.control, SOURCE, "commit_success");
            if !control.is_current(generation) {
                debug!(key = %self.key(), generation, "Discarding result of cancelled fetch");
                return;
            }
            control.retry_count = 0;
            control.fetch = None;

            self.client.store().set(self.key(), Some(value), None);
            let written_at = self.client.store().peek(self.key()).map(|e| e.timestamp);
            let data = data.clone();
            self.state.send_modify(move |state| {
                state.data = Some(data);
                state.error = None;
                state.is_loading = false;
                state.failure_count = 0;
                state.last_fetch_time = written_at;
            });
        }

        self.client.registry().notify(self.key());
        if let Some(on_success) = &self.options.on_success {
            on_success(&data);
        }
    }

    fn commit_failure(&self, generation: u64, err: QueryError) {
        {
            let mut control = mutex_lock(&self.control, SOURCE, "commit_failure");
            if !control.is_current(generation) {
                debug!(key = %self.key(), generation, "Discarding failure of cancelled fetch");
                return;
            }
            control.fetch = None;

            let last_known = self
                .client
                .store()
                .peek(self.key())
                .and_then(|entry| entry.value)
                .or_else(|| {
                    self.state
                        .borrow()
                        .data
                        .as_ref()
                        .and_then(|data| serde_json::to_value(data).ok())
                });
            self.client
                .store()
                .set(self.key(), last_known, Some(err.clone()));

            let failures = control.retry_count + 1;
            let stored = err.clone();
            self.state.send_modify(move |state| {
                state.error = Some(stored);
                state.is_loading = false;
                state.failure_count = failures;
            });
        }

        warn!(key = %self.key(), error = %err, "Fetch failed, retries exhausted");
        self.client.registry().notify(self.key());
        if let Some(on_error) = &self.options.on_error {
            on_error(&err);
        }
    }

    /// Mirror the shared cache entry into local state after a notification.
    fn sync_from_cache(&self) {
        match self.client.store().get(self.key(), self.options.cache_time) {
            Some(entry) => self.adopt(entry.value, entry.error, entry.timestamp),
            None => self.state.send_modify(|state| {
                state.data = None;
                state.error = None;
                state.last_fetch_time = None;
            }),
        }
    }

    fn adopt(&self, value: Option<Value>, error: Option<QueryError>, written_at: Instant) {
        let decoded = value.map(serde_json::from_value::<T>);
        self.state.send_modify(move |state| {
            match decoded {
                Some(Ok(data)) => {
                    state.data = Some(data);
                    state.error = error;
                }
                Some(Err(err)) => state.error = Some(QueryError::from(err)),
                // Failure entries keep whatever data we already had
                None => state.error = error,
            }
            state.last_fetch_time = Some(written_at);
        });
    }

    fn is_entry_stale(&self) -> bool {
        match self.client.store().get(self.key(), self.options.cache_time) {
            Some(entry) => entry.is_stale(self.options.stale_time),
            None => true,
        }
    }

    fn deactivate(&self) {
        let subscription = {
            let mut control = mutex_lock(&self.control, SOURCE, "deactivate");
            if !control.active {
                return;
            }
            control.active = false;
            control.generation += 1;
            for task in [control.fetch.take(), control.poll.take(), control.focus.take()]
                .into_iter()
                .flatten()
            {
                task.abort();
            }
            control.subscription.take()
        };
        drop(subscription);

        self.state.send_modify(|state| state.is_loading = false);
        debug!(key = %self.key(), "Binding deactivated");
    }
}

fn spawn_poller<T: QueryData>(binding: Weak<BindingInner<T>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = binding.upgrade() else {
                break;
            };
            inner.poll();
        }
    })
}

fn spawn_focus_listener<T: QueryData>(
    binding: Weak<BindingInner<T>>,
    mut rx: broadcast::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let focused = match rx.recv().await {
                Ok(focused) => focused,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !focused {
                continue;
            }
            let Some(inner) = binding.upgrade() else {
                break;
            };
            if inner.is_entry_stale() {
                inner.start_fetch(FetchReason::Focus);
            } else {
                debug!(key = %inner.key(), "Focus regained, entry still fresh");
            }
        }
    })
}
