//! In-memory cache of query results.
//!
//! The store keeps at most one [`CacheEntry`] per canonical query key. Entries
//! are replaced wholesale on every write and are never bounded automatically;
//! they accumulate until invalidated or pruned.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::error::QueryError;
use super::key::QueryKey;
use super::lock::mutex_lock;

const SOURCE: &str = "query::store";

/// One cached query result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: QueryKey,
    /// Most recent successful value, kept across later failures.
    pub value: Option<Value>,
    /// Most recent terminal failure, if the last write recorded one.
    pub error: Option<QueryError>,
    /// Monotonic write time; drives staleness and expiry.
    pub timestamp: Instant,
    /// Wall-clock write time, for display.
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(key: QueryKey, value: Option<Value>, error: Option<QueryError>) -> Self {
        Self {
            key,
            value,
            error,
            timestamp: Instant::now(),
            fetched_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// An entry is stale once its age reaches `stale_time`.
    pub fn is_stale(&self, stale_time: Duration) -> bool {
        self.age() >= stale_time
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.fetched_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        format_age_minutes(self.age_minutes())
    }
}

/// Render an age in minutes as "just now", "5m ago", "2h ago" or "3d ago".
pub fn format_age_minutes(minutes: i64) -> String {
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

#[derive(Default)]
pub struct CacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `key` if it was written less than `cache_time` ago.
    pub fn get(&self, key: &QueryKey, cache_time: Duration) -> Option<CacheEntry> {
        let entries = mutex_lock(&self.entries, SOURCE, "get");
        entries
            .get(key.canonical())
            .filter(|entry| entry.age() < cache_time)
            .cloned()
    }

    /// Entry for `key` regardless of age.
    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        mutex_lock(&self.entries, SOURCE, "peek")
            .get(key.canonical())
            .cloned()
    }

    /// Overwrite the entry for `key`, stamping the current time.
    pub fn set(&self, key: &QueryKey, value: Option<Value>, error: Option<QueryError>) {
        let entry = CacheEntry::new(key.clone(), value, error);
        debug!(key = %key, has_error = entry.error.is_some(), "Cache entry written");
        mutex_lock(&self.entries, SOURCE, "set").insert(key.canonical().to_string(), entry);
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn delete(&self, key: &QueryKey) -> bool {
        mutex_lock(&self.entries, SOURCE, "delete")
            .remove(key.canonical())
            .is_some()
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn delete_by_prefix(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "delete_by_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.key.starts_with(prefix))
            .map(|(canonical, _)| canonical.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|canonical| entries.remove(&canonical))
            .map(|entry| entry.key)
            .collect()
    }

    pub fn clear(&self) -> Vec<QueryKey> {
        mutex_lock(&self.entries, SOURCE, "clear")
            .drain()
            .map(|(_, entry)| entry.key)
            .collect()
    }

    /// Evict entries written more than `max_age` ago. Returns how many were removed.
    pub fn prune_older_than(&self, max_age: Duration) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "prune");
        let before = entries.len();
        entries.retain(|_, entry| entry.age() <= max_age);
        before - entries.len()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        mutex_lock(&self.entries, SOURCE, "keys")
            .values()
            .map(|entry| entry.key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_key;
    use serde_json::json;

    const CACHE_TIME: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_until_cache_time_elapses() {
        let store = CacheStore::new();
        let key = query_key!["account", 1];

        store.set(&key, Some(json!({"balance": 100})), None);
        let entry = store.get(&key, CACHE_TIME).expect("fresh entry");
        assert_eq!(entry.value, Some(json!({"balance": 100})));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(store.get(&key, CACHE_TIME).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get(&key, CACHE_TIME).is_none());
        // Still physically present
        assert!(store.peek(&key).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_replaces_entry_wholesale() {
        let store = CacheStore::new();
        let key = query_key!["card", 1];

        store.set(&key, Some(json!("first")), None);
        store.set(&key, None, Some(QueryError::Cancelled));

        let entry = store.get(&key, CACHE_TIME).unwrap();
        assert!(entry.value.is_none());
        assert!(entry.error.is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_reports_presence() {
        let store = CacheStore::new();
        let key = query_key!["loan"];
        assert!(!store.delete(&key));
        store.set(&key, Some(json!([])), None);
        assert!(store.delete(&key));
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_by_prefix() {
        let store = CacheStore::new();
        store.set(&query_key!["account", 1], Some(json!(1)), None);
        store.set(&query_key!["account", 2], Some(json!(2)), None);
        store.set(&query_key!["card", 1], Some(json!(3)), None);

        let mut removed: Vec<String> = store
            .delete_by_prefix(&query_key!["account"])
            .iter()
            .map(|k| k.canonical().to_string())
            .collect();
        removed.sort();

        assert_eq!(removed, vec![r#"["account",1]"#, r#"["account",2]"#]);
        assert_eq!(store.keys(), vec![query_key!["card", 1]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_older_than() {
        let store = CacheStore::new();
        store.set(&query_key!["old"], Some(json!(1)), None);
        tokio::time::advance(Duration::from_secs(120)).await;
        store.set(&query_key!["new"], Some(json!(2)), None);

        assert_eq!(store.prune_older_than(Duration::from_secs(60)), 1);
        assert_eq!(store.keys(), vec![query_key!["new"]]);
    }

    #[test]
    fn test_format_age_minutes() {
        assert_eq!(format_age_minutes(-3), "just now");
        assert_eq!(format_age_minutes(0), "just now");
        assert_eq!(format_age_minutes(5), "5m ago");
        assert_eq!(format_age_minutes(90), "2h ago");
        assert_eq!(format_age_minutes(80), "1h ago");
        assert_eq!(format_age_minutes(1440 + 13 * 60), "2d ago");
    }

    #[test]
    fn test_entry_age_display_just_now() {
        let store = CacheStore::new();
        let key = query_key!["crypto"];
        store.set(&key, Some(json!([])), None);
        assert_eq!(store.peek(&key).unwrap().age_display(), "just now");
    }
}
