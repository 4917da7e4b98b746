//! Duplicate suppression for `prevent_duplicates` triggers

use super::TriggerId;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Statistics of the dedup cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Fires allowed through
    pub admitted: u64,
    /// Fires suppressed as duplicates
    pub suppressed: u64,
    /// Keys currently remembered
    pub size: usize,
}

struct Inner {
    entries: LruCache<(TriggerId, String), Instant>,
    stats: DedupStats,
}

/// Bounded, expiring record of recent trigger fires
///
/// Entries expire after the TTL; when the cache is full the least recently
/// used key is evicted first.
pub struct RecentFires {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl std::fmt::Debug for RecentFires {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecentFires").field("ttl", &self.ttl).finish()
    }
}

impl RecentFires {
    /// Create a cache remembering up to `capacity` keys for `ttl`
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: DedupStats::default(),
            }),
            ttl,
        }
    }

    /// Atomically check whether a fire is new and record it
    ///
    /// Returns `true` when the fire is admitted, `false` when the same key
    /// fired for the same trigger within the TTL.
    pub fn check_and_record(&self, trigger_id: &TriggerId, key: &str) -> bool {
        self.check_and_record_at(trigger_id, key, Instant::now())
    }

    fn check_and_record_at(&self, trigger_id: &TriggerId, key: &str, now: Instant) -> bool {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cache_key = (trigger_id.clone(), key.to_string());

        let fresh = match inner.entries.get(&cache_key) {
            Some(recorded) => now.saturating_duration_since(*recorded) >= self.ttl,
            None => true,
        };
        if fresh {
            inner.entries.put(cache_key, now);
            inner.stats.admitted += 1;
        } else {
            inner.stats.suppressed += 1;
        }
        inner.stats.size = inner.entries.len();
        fresh
    }

    /// Current statistics
    pub fn stats(&self) -> DedupStats {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stats
            .clone()
    }
}
