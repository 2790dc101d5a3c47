//! Cache configuration.

use std::fmt::{Display, Formatter};
use std::num::NonZeroUsize;
use std::str::FromStr;

use super::eviction::{ArbitraryEviction, EvictionPolicy, FifoEviction, LruEviction};

const DEFAULT_MAX_ITEMS: usize = 100;

/// Which entry leaves the cache when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionKind {
    /// Whatever the map yields first.
    #[default]
    Arbitrary,
    /// Least recently looked up or stored.
    Lru,
    /// Oldest insertion.
    Fifo,
}

impl EvictionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arbitrary => "arbitrary",
            Self::Lru => "lru",
            Self::Fifo => "fifo",
        }
    }

    pub fn build(self) -> Box<dyn EvictionPolicy> {
        match self {
            Self::Arbitrary => Box::new(ArbitraryEviction),
            Self::Lru => Box::new(LruEviction),
            Self::Fifo => Box::new(FifoEviction),
        }
    }
}

impl Display for EvictionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arbitrary" => Ok(Self::Arbitrary),
            "lru" => Ok(Self::Lru),
            "fifo" => Ok(Self::Fifo),
            other => Err(format!(
                "unknown eviction policy `{other}` (expected arbitrary, lru or fifo)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_items: NonZeroUsize,
    pub eviction: EvictionKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: NonZeroUsize::new(DEFAULT_MAX_ITEMS).unwrap_or(NonZeroUsize::MIN),
            eviction: EvictionKind::default(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_items: settings.max_items,
            eviction: settings.eviction,
        }
    }
}
