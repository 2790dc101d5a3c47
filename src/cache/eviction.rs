//! Eviction strategies for the fingerprint cache.

use std::collections::HashMap;

use super::keys::ContentFingerprint;
use super::store::CacheEntry;

/// Picks the entry to drop when the cache is full. Called under the write lock.
pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn choose_victim(
        &self,
        entries: &HashMap<ContentFingerprint, CacheEntry>,
    ) -> Option<ContentFingerprint>;
}

/// Drops whichever entry the map iterates first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArbitraryEviction;

impl EvictionPolicy for ArbitraryEviction {
    fn name(&self) -> &'static str {
        "arbitrary"
    }

    fn choose_victim(
        &self,
        entries: &HashMap<ContentFingerprint, CacheEntry>,
    ) -> Option<ContentFingerprint> {
        entries.keys().next().cloned()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LruEviction;

impl EvictionPolicy for LruEviction {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn choose_victim(
        &self,
        entries: &HashMap<ContentFingerprint, CacheEntry>,
    ) -> Option<ContentFingerprint> {
        entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access())
            .map(|(key, _)| key.clone())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FifoEviction;

impl EvictionPolicy for FifoEviction {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn choose_victim(
        &self,
        entries: &HashMap<ContentFingerprint, CacheEntry>,
    ) -> Option<ContentFingerprint> {
        entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at())
            .map(|(key, _)| key.clone())
    }
}
