//! Bounded TTL cache for search results. Keyed by a SHA-256 of the
//! normalised query plus search parameters; eviction is oldest-insert
//! first once capacity is reached. Scope is the process.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use axon_core::types::{Domain, Source};

struct Entry {
    sources: Vec<Source>,
    expires_at: Instant,
}

pub struct SearchCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
}

struct CacheInner {
    map: HashMap<String, Entry>,
    order: VecDeque<String>,
}

impl SearchCache {
    pub fn new(ttl_secs: u64, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl: Duration::from_secs(ttl_secs),
            capacity: capacity.max(1),
        }
    }

    /// Collapse whitespace and lowercase so trivially different phrasings
    /// share a cache slot.
    pub fn normalise(query: &str) -> String {
        query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    pub fn key(query: &str, domain: Domain, top_k: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Self::normalise(query).as_bytes());
        hasher.update(b"|");
        hasher.update(domain.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(top_k.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<Source>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.sources.clone()),
            Some(_) => {
                inner.map.remove(key);
                inner.order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, sources: Vec<Source>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.map.len() >= self.capacity && !inner.map.contains_key(&key) {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }
        if !inner.map.contains_key(&key) {
            inner.order.push_back(key.clone());
        }
        inner.map.insert(
            key,
            Entry {
                sources,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::make_source;

    #[test]
    fn key_ignores_whitespace_and_case() {
        let a = SearchCache::key("연차  휴가\n규정", Domain::Policy, 5);
        let b = SearchCache::key("연차 휴가 규정", Domain::Policy, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn key_varies_with_parameters() {
        let a = SearchCache::key("q", Domain::Policy, 5);
        let b = SearchCache::key("q", Domain::Policy, 3);
        let c = SearchCache::key("q", Domain::Education, 5);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hit_returns_stored_sources() {
        let cache = SearchCache::new(60, 8);
        let key = SearchCache::key("q", Domain::Policy, 5);
        cache.put(key.clone(), vec![make_source("d1", 0.9)]);
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit[0].doc_id, "d1");
    }

    #[test]
    fn capacity_evicts_oldest_insert() {
        let cache = SearchCache::new(60, 2);
        cache.put("k1".into(), vec![]);
        cache.put("k2".into(), vec![]);
        cache.put("k3".into(), vec![]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("k1").is_none());
        assert!(cache.get("k3").is_some());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = SearchCache::new(0, 8);
        cache.put("k".into(), vec![make_source("d", 0.5)]);
        assert!(cache.get("k").is_none());
    }
}
