//! Configuration for query bindings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::error::QueryError;
use super::key::QueryKey;

/// Default retry delay; doubled after every failed attempt.
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default number of retries after the first failed attempt.
const DEFAULT_RETRY: u32 = 3;

/// Default logical lifetime of a cache entry (5 minutes).
const DEFAULT_CACHE_TIME_MS: u64 = 5 * 60 * 1000;

/// Values a query can produce. Results are cached as JSON, so they must
/// round-trip through serde.
pub trait QueryData: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> QueryData for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

pub type QueryFn<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;
pub type SuccessFn<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type ErrorFn = Arc<dyn Fn(&QueryError) + Send + Sync>;

/// Client-wide defaults applied to every new [`QueryOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub stale_time_ms: u64,
    pub cache_time_ms: u64,
    pub retry: u32,
    pub retry_delay_ms: u64,
    pub refetch_on_window_focus: bool,
    pub refetch_interval_ms: Option<u64>,
    pub dedupe_in_flight: bool,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            stale_time_ms: 0,
            cache_time_ms: DEFAULT_CACHE_TIME_MS,
            retry: DEFAULT_RETRY,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            refetch_on_window_focus: true,
            refetch_interval_ms: None,
            dedupe_in_flight: false,
        }
    }
}

pub struct QueryOptions<T> {
    pub query_key: QueryKey,
    pub query_fn: QueryFn<T>,
    pub stale_time: Duration,
    pub cache_time: Duration,
    pub refetch_interval: Option<Duration>,
    pub refetch_on_window_focus: bool,
    pub retry: u32,
    pub retry_delay: Duration,
    pub on_success: Option<SuccessFn<T>>,
    pub on_error: Option<ErrorFn>,
    pub enabled: bool,
    pub initial_data: Option<T>,
}

impl<T: QueryData> QueryOptions<T> {
    pub fn new<F, Fut>(query_key: QueryKey, query_fn: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::with_defaults(&QueryDefaults::default(), query_key, query_fn)
    }

    pub fn with_defaults<F, Fut>(defaults: &QueryDefaults, query_key: QueryKey, query_fn: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            query_key,
            query_fn: Arc::new(move || query_fn().boxed()),
            stale_time: Duration::from_millis(defaults.stale_time_ms),
            cache_time: Duration::from_millis(defaults.cache_time_ms),
            refetch_interval: defaults.refetch_interval_ms.map(Duration::from_millis),
            refetch_on_window_focus: defaults.refetch_on_window_focus,
            retry: defaults.retry,
            retry_delay: Duration::from_millis(defaults.retry_delay_ms),
            on_success: None,
            on_error: None,
            enabled: true,
            initial_data: None,
        }
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }

    pub fn refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    pub fn refetch_on_window_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_window_focus = enabled;
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn on_success(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(data);
        self
    }

    /// Delay before retry number `attempt + 1`: `retry_delay * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_key;

    fn options() -> QueryOptions<u32> {
        QueryOptions::new(query_key!["n"], || async { Ok(1) })
    }

    #[test]
    fn test_defaults() {
        let opts = options();
        assert_eq!(opts.stale_time, Duration::ZERO);
        assert_eq!(opts.cache_time, Duration::from_secs(300));
        assert_eq!(opts.retry, 3);
        assert!(opts.enabled);
        assert!(opts.refetch_on_window_focus);
        assert!(opts.refetch_interval.is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let opts = options().retry_delay(Duration::from_millis(1000));
        assert_eq!(opts.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(opts.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(opts.backoff_delay(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_saturates() {
        let opts = options().retry_delay(Duration::from_secs(1));
        assert!(opts.backoff_delay(64) >= opts.backoff_delay(31));
    }

    #[test]
    fn test_defaults_deserialize_partial() {
        let defaults: QueryDefaults = serde_json::from_str(r#"{"stale_time_ms": 5000}"#).unwrap();
        assert_eq!(defaults.stale_time_ms, 5000);
        assert_eq!(defaults.retry, 3);
    }
}
