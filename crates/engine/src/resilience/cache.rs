//! TTL + LRU key-value cache.
//!
//! Entries expire lazily on read and are swept periodically by
//! [`Cache::spawn_sweeper`]. At capacity the least-recently-accessed entry is
//! evicted. One instance is owned per engine; nothing here is global.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{CacheConfig, CacheTiers};

/// TTL class for a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Quotes and anything refreshed every few seconds.
    Realtime,
    /// Intraday candles.
    Short,
    /// Higher-timeframe candles and derived analysis.
    Medium,
    /// Reference data.
    Long,
}

impl CacheTier {
    #[must_use]
    pub fn ttl(&self, tiers: &CacheTiers) -> Duration {
        let secs = match self {
            Self::Realtime => tiers.realtime_secs,
            Self::Short => tiers.short_secs,
            Self::Medium => tiers.medium_secs,
            Self::Long => tiers.long_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_access: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_access: now,
            expires_at: now + ttl,
        }
    }

    fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
}

pub struct Cache<V: Clone> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    tiers: CacheTiers,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> Cache<V> {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize, tiers: CacheTiers) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            tiers,
            capacity: cap.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.tiers.clone())
    }

    /// Get a live value, refreshing its recency. Expired entries are removed
    /// and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");

        let lookup = entries.get_mut(key).map(|entry| {
            if entry.is_valid_at(now) {
                entry.last_access = now;
                Some(entry.value.clone())
            } else {
                None
            }
        });

        match lookup {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key, "cache HIT");
                Some(value)
            }
            Some(None) => {
                entries.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key, "cache EXPIRED");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key, "cache MISS");
                None
            }
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V, tier: CacheTier) {
        let ttl = tier.ttl(&self.tiers);
        self.insert_with_ttl(key, value, ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if let Some((evicted_key, _)) = entries.push(key.clone(), CacheEntry::new(value, ttl)) {
            if evicted_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(key = %evicted_key, "cache EVICT (lru)");
            }
        }
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| !e.is_valid_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.capacity,
        }
    }
}

impl<V: Clone + Send + 'static> Cache<V> {
    /// Sweep expired entries every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = self.len(), "cache sweep");
                        }
                    }
                }
            }
        })
    }
}
