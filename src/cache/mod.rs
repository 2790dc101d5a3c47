//! Fingerprint cache for published artifacts.
//!
//! Maps a [`ContentFingerprint`] (template content, payload and page format)
//! to the URL of an already published PDF so identical requests skip the
//! render, export and upload stages.
//!
//! ```toml
//! [cache]
//! max_items = 100
//! eviction = "arbitrary"   # or "lru", "fifo"
//! ```

mod config;
mod eviction;
mod keys;
mod lock;
mod store;

pub use config::{CacheConfig, EvictionKind};
pub use eviction::{ArbitraryEviction, EvictionPolicy, FifoEviction, LruEviction};
pub use keys::ContentFingerprint;
pub use store::{CacheEntry, FingerprintCache};

pub(crate) const METRIC_CACHE_HIT: &str = "designmypdf_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "designmypdf_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "designmypdf_cache_evict_total";
