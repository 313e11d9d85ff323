//! Per-key fan-out of cache change notifications.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use super::key::QueryKey;
use super::lock::mutex_lock;

const SOURCE: &str = "query::registry";

pub type SubscriberFn = Arc<dyn Fn(&QueryKey) + Send + Sync>;

type SubscriberMap = HashMap<String, Vec<(u64, SubscriberFn)>>;

/// Registered callbacks, grouped by canonical query key.
///
/// Callbacks for one key run in registration order. They are invoked with no
/// registry lock held, so a callback may subscribe or unsubscribe freely.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<Mutex<SubscriberMap>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, key: &QueryKey, callback: F) -> Subscription
    where
        F: Fn(&QueryKey) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let canonical = key.canonical().to_string();

        mutex_lock(&self.subscribers, SOURCE, "subscribe")
            .entry(canonical.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            subscribers: Arc::downgrade(&self.subscribers),
            canonical,
            id,
        }
    }

    /// Invoke every callback registered for `key`.
    ///
    /// A panicking callback is logged and skipped; the rest still run.
    pub fn notify(&self, key: &QueryKey) {
        let callbacks: Vec<SubscriberFn> = mutex_lock(&self.subscribers, SOURCE, "notify")
            .get(key.canonical())
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        debug!(key = %key, subscribers = callbacks.len(), "Notifying subscribers");

        for (index, callback) in callbacks.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(key))).is_err() {
                warn!(key = %key, subscriber = index, "Subscriber panicked during notify");
            }
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        mutex_lock(&self.subscribers, SOURCE, "count")
            .get(key.canonical())
            .map_or(0, Vec::len)
    }
}

/// Handle to one registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    subscribers: Weak<Mutex<SubscriberMap>>,
    canonical: String,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return;
        };
        let mut map = mutex_lock(&subscribers, SOURCE, "unsubscribe");
        if let Some(subs) = map.get_mut(&self.canonical) {
            subs.retain(|(id, _)| *id != self.id);
            if subs.is_empty() {
                map.remove(&self.canonical);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_key;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_runs_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let key = query_key!["account", 1];
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                registry.subscribe(&key, move |_| order.lock().unwrap().push(i))
            })
            .collect();

        registry.notify(&key);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn test_notify_only_reaches_matching_key() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = registry.subscribe(&query_key!["card", 1], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&query_key!["card", 2]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        registry.notify(&query_key!["card", 1]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let registry = SubscriberRegistry::new();
        let key = query_key!["loan"];
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let sub = registry.subscribe(&key, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.subscriber_count(&key), 1);

        sub.unsubscribe();
        assert_eq!(registry.subscriber_count(&key), 0);

        registry.notify(&key);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let registry = SubscriberRegistry::new();
        let key = query_key!["crypto"];
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = registry.subscribe(&key, |_| panic!("render failed"));
        let counter = Arc::clone(&hits);
        let _good = registry.subscribe(&key, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&key);
        registry.notify(&key);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_may_unsubscribe_during_notify() {
        let registry = Arc::new(SubscriberRegistry::new());
        let key = query_key!["account"];
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner_slot = Arc::clone(&slot);
        let sub = registry.subscribe(&key, move |_| {
            inner_slot.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        registry.notify(&key);
        assert_eq!(registry.subscriber_count(&key), 0);
    }
}
