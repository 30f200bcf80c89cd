use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::query::ParsedQuery;
use crate::config::CacheConfig;
use crate::util::text::{collapse_whitespace, short_hash};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

/// TTL-bounded LRU cache of resolved answers.
pub struct ResponseCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.max_entries, Duration::from_secs(config.ttl_secs))
    }

    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        let size = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(size)),
            ttl,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Key for a question and its parsed form. The question is case and
    /// whitespace insensitive; any difference in the parsed form, language
    /// included, gives a different key.
    pub fn key_for(question: &str, parsed: &ParsedQuery) -> String {
        let normalized = collapse_whitespace(question).to_lowercase();
        let canonical = serde_json::to_string(parsed).unwrap_or_default();
        short_hash(&format!("{}\u{1f}{}", normalized, canonical))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.lock().put(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::query::{Intent, Language, TimeRange};

    #[test]
    fn set_then_get_round_trips() {
        let cache = ResponseCache::with_ttl(10, Duration::from_secs(60));
        cache.set("k", vec![1, 2, 3]);
        assert_eq!(cache.get("k"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get("other"), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let cache = ResponseCache::with_ttl(10, Duration::from_millis(30));
        cache.set("k", "v".to_string());
        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ResponseCache::with_ttl(2, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn key_ignores_case_and_spacing_but_not_language() {
        let en = ParsedQuery::new(Intent::Count);
        let ar = ParsedQuery::new(Intent::Count).with_language(Language::Ar);
        let a = ResponseCache::<u8>::key_for("How many  violations?", &en);
        let b = ResponseCache::<u8>::key_for("how many violations?", &en);
        let c = ResponseCache::<u8>::key_for("how many violations?", &ar);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn key_follows_the_parsed_query_for_one_question() {
        let question = "what about that year?";
        let y2024 = ParsedQuery::new(Intent::Count)
            .with_metric("violations")
            .with_time_range(TimeRange::year(2024).unwrap());
        let y2023 = ParsedQuery::new(Intent::Count)
            .with_metric("violations")
            .with_time_range(TimeRange::year(2023).unwrap());
        assert_ne!(
            ResponseCache::<u8>::key_for(question, &y2024),
            ResponseCache::<u8>::key_for(question, &y2023)
        );
        assert_eq!(
            ResponseCache::<u8>::key_for(question, &y2024),
            ResponseCache::<u8>::key_for(question, &y2024.clone())
        );
    }

    #[test]
    fn purge_drops_only_expired() {
        let cache = ResponseCache::with_ttl(10, Duration::from_millis(30));
        cache.set("old", 1);
        std::thread::sleep(Duration::from_millis(50));
        cache.set("new", 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("new"), Some(2));
    }
}
