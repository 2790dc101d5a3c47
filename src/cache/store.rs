//! In-memory fingerprint → URL store.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use super::eviction::EvictionPolicy;
use super::keys::ContentFingerprint;
use super::lock::{rw_read, rw_write};
use super::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS};

const SOURCE: &str = "cache::store";

/// A published artifact URL plus the ticks eviction policies rank by.
#[derive(Debug)]
pub struct CacheEntry {
    url: String,
    inserted_at: u64,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn new(url: String, tick: u64) -> Self {
        Self {
            url,
            inserted_at: tick,
            last_access: AtomicU64::new(tick),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn inserted_at(&self) -> u64 {
        self.inserted_at
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }
}

/// Bounded cache of published artifacts keyed by content fingerprint.
///
/// Lookups share a read lock; recency is recorded through per-entry atomics so
/// the LRU policy works without upgrading to the write lock.
pub struct FingerprintCache {
    entries: RwLock<HashMap<ContentFingerprint, CacheEntry>>,
    policy: Box<dyn EvictionPolicy>,
    max_items: NonZeroUsize,
    clock: AtomicU64,
}

impl FingerprintCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_policy(config.max_items, config.eviction.build())
    }

    pub fn with_policy(max_items: NonZeroUsize, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(max_items.get())),
            policy,
            max_items,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn lookup(&self, fingerprint: &ContentFingerprint) -> Option<String> {
        let entries = rw_read(&self.entries, SOURCE, "lookup");
        match entries.get(fingerprint) {
            Some(entry) => {
                entry.touch(self.tick());
                counter!(METRIC_CACHE_HIT).increment(1);
                Some(entry.url.clone())
            }
            None => {
                counter!(METRIC_CACHE_MISS).increment(1);
                None
            }
        }
    }

    pub fn store(&self, fingerprint: ContentFingerprint, url: String) {
        let tick = self.tick();
        let mut entries = rw_write(&self.entries, SOURCE, "store");

        if let Some(existing) = entries.get_mut(&fingerprint) {
            existing.url = url;
            existing.touch(tick);
            return;
        }

        if entries.len() >= self.max_items.get()
            && let Some(victim) = self.policy.choose_victim(&entries)
        {
            entries.remove(&victim);
            counter!(METRIC_CACHE_EVICT, "policy" => self.policy.name()).increment(1);
            debug!(
                target = SOURCE,
                op = "store",
                policy = self.policy.name(),
                evicted = %victim,
                "evicted fingerprint cache entry"
            );
        }

        entries.insert(fingerprint, CacheEntry::new(url, tick));
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::EvictionKind;
    use crate::domain::page_format::PageFormat;
    use serde_json::{Map, Value};

    fn fp(n: usize) -> ContentFingerprint {
        let mut payload = Map::new();
        payload.insert("n".to_string(), Value::from(n));
        ContentFingerprint::compute("content", &payload, PageFormat::A4)
    }

    fn cache(max: usize, eviction: EvictionKind) -> FingerprintCache {
        FingerprintCache::new(&CacheConfig {
            max_items: NonZeroUsize::new(max).unwrap(),
            eviction,
        })
    }

    #[test]
    fn lookup_returns_stored_url() {
        let cache = cache(4, EvictionKind::Arbitrary);
        assert_eq!(cache.lookup(&fp(1)), None);
        cache.store(fp(1), "https://cdn/1.pdf".to_string());
        assert_eq!(cache.lookup(&fp(1)).as_deref(), Some("https://cdn/1.pdf"));
    }

    #[test]
    fn never_exceeds_max_items() {
        for kind in [EvictionKind::Arbitrary, EvictionKind::Lru, EvictionKind::Fifo] {
            let cache = cache(3, kind);
            for n in 0..20 {
                cache.store(fp(n), format!("url-{n}"));
                assert!(cache.len() <= 3, "{kind} overflowed");
            }
            assert_eq!(cache.len(), 3);
        }
    }

    #[test]
    fn replacing_existing_fingerprint_does_not_evict() {
        let cache = cache(2, EvictionKind::Fifo);
        cache.store(fp(1), "a".to_string());
        cache.store(fp(2), "b".to_string());
        cache.store(fp(1), "a2".to_string());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&fp(1)).as_deref(), Some("a2"));
        assert_eq!(cache.lookup(&fp(2)).as_deref(), Some("b"));
    }

    #[test]
    fn fifo_drops_oldest_insertion() {
        let cache = cache(2, EvictionKind::Fifo);
        cache.store(fp(1), "a".to_string());
        cache.store(fp(2), "b".to_string());
        cache.lookup(&fp(1));
        cache.store(fp(3), "c".to_string());
        assert_eq!(cache.lookup(&fp(1)), None);
        assert!(cache.lookup(&fp(2)).is_some());
        assert!(cache.lookup(&fp(3)).is_some());
    }

    #[test]
    fn lru_keeps_recently_read_entries() {
        let cache = cache(2, EvictionKind::Lru);
        cache.store(fp(1), "a".to_string());
        cache.store(fp(2), "b".to_string());
        cache.lookup(&fp(1));
        cache.store(fp(3), "c".to_string());
        assert!(cache.lookup(&fp(1)).is_some());
        assert_eq!(cache.lookup(&fp(2)), None);
        assert!(cache.lookup(&fp(3)).is_some());
    }

    #[test]
    fn concurrent_readers_and_writers_stay_bounded() {
        let cache = std::sync::Arc::new(cache(8, EvictionKind::Lru));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let key = fp(worker * 1000 + n % 16);
                        if cache.lookup(&key).is_none() {
                            cache.store(key, format!("url-{worker}-{n}"));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 8);
    }
}
