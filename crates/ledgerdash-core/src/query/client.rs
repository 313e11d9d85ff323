//! The shared query client: cache store, subscriber registry and the
//! side-effecting utilities that operate on them directly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::binding::QueryBinding;
use super::error::QueryError;
use super::focus::FocusManager;
use super::key::QueryKey;
use super::lock::mutex_lock;
use super::mutation::{Mutation, MutationOptions};
use super::observer::{FetchObserver, FetchOutcome};
use super::options::{QueryData, QueryDefaults, QueryFn, QueryOptions};
use super::registry::{SubscriberRegistry, Subscription};
use super::store::{CacheEntry, CacheStore};

const SOURCE: &str = "query::client";

type SharedFetch = Shared<BoxFuture<'static, Result<Value, QueryError>>>;

/// Handle to one cache store and everything wired to it.
///
/// Construct one at application start and hand clones to every binding and
/// mutation runner; clones share state. Tests build a fresh client each.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    store: CacheStore,
    registry: SubscriberRegistry,
    focus: FocusManager,
    defaults: QueryDefaults,
    observer: Option<Arc<dyn FetchObserver>>,
    in_flight: Mutex<HashMap<String, (u64, SharedFetch)>>,
    next_flight_id: AtomicU64,
}

#[derive(Default)]
pub struct QueryClientBuilder {
    defaults: QueryDefaults,
    observer: Option<Arc<dyn FetchObserver>>,
    dedupe_in_flight: Option<bool>,
}

impl QueryClientBuilder {
    pub fn defaults(mut self, defaults: QueryDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Collapse concurrent fetches of the same key into one request.
    pub fn dedupe_in_flight(mut self, enabled: bool) -> Self {
        self.dedupe_in_flight = Some(enabled);
        self
    }

    pub fn build(self) -> QueryClient {
        let mut defaults = self.defaults;
        if let Some(dedupe) = self.dedupe_in_flight {
            defaults.dedupe_in_flight = dedupe;
        }
        QueryClient {
            inner: Arc::new(ClientInner {
                store: CacheStore::new(),
                registry: SubscriberRegistry::new(),
                focus: FocusManager::new(),
                defaults,
                observer: self.observer,
                in_flight: Mutex::new(HashMap::new()),
                next_flight_id: AtomicU64::new(0),
            }),
        }
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryDefaults::default())
    }
}

impl QueryClient {
    pub fn new(defaults: QueryDefaults) -> Self {
        Self::builder().defaults(defaults).build()
    }

    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder::default()
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.inner.registry
    }

    pub fn focus(&self) -> &FocusManager {
        &self.inner.focus
    }

    pub fn defaults(&self) -> &QueryDefaults {
        &self.inner.defaults
    }

    /// Options for `key` seeded with this client's defaults.
    pub fn query_options<T, F, Fut>(&self, key: QueryKey, query_fn: F) -> QueryOptions<T>
    where
        T: QueryData,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        QueryOptions::with_defaults(&self.inner.defaults, key, query_fn)
    }

    /// Create and activate a binding.
    pub fn watch_query<T: QueryData>(&self, options: QueryOptions<T>) -> QueryBinding<T> {
        let binding = QueryBinding::new(self.clone(), options);
        binding.activate();
        binding
    }

    pub fn mutation<V, R, C>(&self, options: MutationOptions<V, R, C>) -> Mutation<V, R, C>
    where
        V: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        Mutation::new(self.clone(), options)
    }

    pub fn subscribe<F>(&self, key: &QueryKey, callback: F) -> Subscription
    where
        F: Fn(&QueryKey) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(key, callback)
    }

    pub fn set_focused(&self, focused: bool) {
        self.inner.focus.set_focused(focused);
    }

    // ===== Prefetch / Invalidate =====

    /// Fetch `key` once, without retries, and cache the result.
    ///
    /// Failures are logged and leave the cache untouched.
    pub async fn prefetch_query<T, F, Fut>(&self, key: &QueryKey, fetch_fn: F)
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.observe_start(key);
        let started = Instant::now();
        let result = fetch_fn()
            .await
            .map_err(QueryError::failed)
            .and_then(|value| serde_json::to_value(value).map_err(QueryError::from));
        self.observe_finish(key, started, result.is_ok());

        match result {
            Ok(value) => {
                self.inner.store.set(key, Some(value), None);
                self.inner.registry.notify(key);
            }
            Err(err) => warn!(key = %key, error = %err, "Prefetch failed"),
        }
    }

    /// Evict every entry under `prefix`, or the whole cache when `None`.
    ///
    /// Subscribers of each removed key are notified; they are not made to
    /// refetch.
    pub fn invalidate_queries(&self, prefix: Option<&QueryKey>) {
        let removed = match prefix {
            Some(prefix) => self.inner.store.delete_by_prefix(prefix),
            None => self.inner.store.clear(),
        };
        debug!(
            prefix = prefix.map(QueryKey::canonical),
            removed = removed.len(),
            "Invalidated queries"
        );
        for key in &removed {
            self.inner.registry.notify(key);
        }
    }

    /// Decode the cached value for `key`, ignoring age.
    pub fn get_query_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let entry = self.inner.store.peek(key)?;
        serde_json::from_value(entry.value?).ok()
    }

    /// Write `value` for `key` as if it had just been fetched and notify
    /// subscribers.
    pub fn set_query_data<T: Serialize>(&self, key: &QueryKey, value: &T) -> Result<(), QueryError> {
        let value = serde_json::to_value(value)?;
        self.inner.store.set(key, Some(value), None);
        self.inner.registry.notify(key);
        Ok(())
    }

    pub fn cache_entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner.store.peek(key)
    }

    // ===== Fetch plumbing used by bindings =====

    /// Run `query_fn` and serialize its result.
    ///
    /// With de-duplication enabled, a fetch that may join shares the request
    /// already in flight for `key`; one that may not starts a new request and
    /// takes over the key from there on. A request nobody awaits any more is
    /// dropped together with its last waiter.
    pub(crate) fn fetch_json<T: QueryData>(
        &self,
        key: &QueryKey,
        query_fn: &QueryFn<T>,
        join_in_flight: bool,
    ) -> BoxFuture<'static, Result<Value, QueryError>> {
        let query_fn = Arc::clone(query_fn);
        let fetch = async move {
            let value = query_fn().await.map_err(QueryError::failed)?;
            serde_json::to_value(value).map_err(QueryError::from)
        }
        .boxed();

        if !self.inner.defaults.dedupe_in_flight {
            return fetch;
        }

        let canonical = key.canonical().to_string();
        let waiter = {
            let mut in_flight = mutex_lock(&self.inner.in_flight, SOURCE, "fetch_json");
            let (id, shared) = match in_flight.get(&canonical) {
                Some((id, shared)) if join_in_flight => {
                    debug!(key = %key, "Joining in-flight fetch");
                    (*id, shared.clone())
                }
                _ => {
                    let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                    let shared = fetch.shared();
                    in_flight.insert(canonical.clone(), (id, shared.clone()));
                    (id, shared)
                }
            };
            FlightWaiter {
                client: self.clone(),
                canonical,
                id,
                shared,
            }
        };

        async move {
            let mut waiter = waiter;
            (&mut waiter.shared).await
        }
        .boxed()
    }

    pub(crate) fn observe_start(&self, key: &QueryKey) {
        if let Some(observer) = &self.inner.observer {
            observer.fetch_started(key);
        }
    }

    pub(crate) fn observe_finish(&self, key: &QueryKey, started: Instant, ok: bool) {
        if let Some(observer) = &self.inner.observer {
            let outcome = if ok {
                FetchOutcome::Success
            } else {
                FetchOutcome::Failure
            };
            observer.fetch_finished(key, started.elapsed(), outcome);
        }
    }
}

/// One consumer of a shared in-flight request.
///
/// Dropping the last waiter, finished or cancelled, removes the request from
/// the in-flight map so later fetches never resume an abandoned one.
struct FlightWaiter {
    client: QueryClient,
    canonical: String,
    id: u64,
    shared: SharedFetch,
}

impl Drop for FlightWaiter {
    fn drop(&mut self) {
        let mut in_flight = mutex_lock(&self.client.inner.in_flight, SOURCE, "release_flight");
        if !in_flight
            .get(&self.canonical)
            .is_some_and(|(current, _)| *current == self.id)
        {
            return;
        }
        // The map and this waiter each hold a handle; None once it completed
        let others = self
            .shared
            .strong_count()
            .map_or(0, |handles| handles.saturating_sub(2));
        if others == 0 {
            in_flight.remove(&self.canonical);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_key;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_subscriber(client: &QueryClient, key: &QueryKey) -> (Subscription, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = client.subscribe(key, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (sub, hits)
    }

    #[tokio::test]
    async fn test_prefetch_populates_cache_and_notifies() {
        let client = QueryClient::default();
        let key = query_key!["accounts"];
        let (_sub, hits) = counting_subscriber(&client, &key);

        client
            .prefetch_query(&key, || async { Ok(vec![1, 2, 3]) })
            .await;

        assert_eq!(client.get_query_data::<Vec<i32>>(&key), Some(vec![1, 2, 3]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefetch_failure_leaves_cache_untouched() {
        let client = QueryClient::default();
        let key = query_key!["accounts"];
        client.set_query_data(&key, &vec![7]).unwrap();

        client
            .prefetch_query(&key, || async {
                Err::<Vec<i32>, _>(anyhow::anyhow!("503"))
            })
            .await;

        let entry = client.cache_entry(&key).unwrap();
        assert!(entry.error.is_none());
        assert_eq!(client.get_query_data::<Vec<i32>>(&key), Some(vec![7]));
    }

    #[test]
    fn test_invalidate_by_prefix_leaves_other_keys() {
        let client = QueryClient::default();
        client.set_query_data(&query_key!["account", 1], &1).unwrap();
        client.set_query_data(&query_key!["account", 2], &2).unwrap();
        client.set_query_data(&query_key!["card", 1], &3).unwrap();

        let (_sub, hits) = counting_subscriber(&client, &query_key!["account", 1]);
        let (_card_sub, card_hits) = counting_subscriber(&client, &query_key!["card", 1]);

        client.invalidate_queries(Some(&query_key!["account"]));

        assert_eq!(client.store().keys(), vec![query_key!["card", 1]]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(card_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalidate_missing_key_is_silent() {
        let client = QueryClient::default();
        let key = query_key!["loan", 9];
        let (_sub, hits) = counting_subscriber(&client, &key);

        client.invalidate_queries(Some(&key));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalidate_everything() {
        let client = QueryClient::default();
        client.set_query_data(&query_key!["account", 1], &1).unwrap();
        client.set_query_data(&query_key!["crypto"], &2).unwrap();

        client.invalidate_queries(None);
        assert!(client.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedupe_collapses_concurrent_fetches() {
        let client = QueryClient::builder().dedupe_in_flight(true).build();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let query_fn: QueryFn<u32> = Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(42)
            }
            .boxed()
        });
        let key = query_key!["balance"];

        let a = client.fetch_json(&key, &query_fn, true);
        let b = client.fetch_json(&key, &query_fn, true);
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.unwrap(), serde_json::json!(42));
        assert_eq!(b.unwrap(), serde_json::json!(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Completed fetches are forgotten
        client.fetch_json(&key, &query_fn, true).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
