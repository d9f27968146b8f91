//! Per-partition sent-idempotency cache (§4.5 step 1, §8 testable
//! property 5).
//!
//! An LRU of bounded size keyed by idempotency key; a hit within TTL
//! short-circuits dispatch entirely and returns the cached result instead
//! of performing a second external side effect.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::DispatchOutcome;

struct CachedEntry {
    outcome: DispatchOutcome,
    expires_at: Instant,
}

pub struct SentCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<IndexMap<String, CachedEntry>>,
}

impl SentCache {
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self { capacity, ttl: Duration::from_millis(ttl_ms), entries: Mutex::new(IndexMap::new()) }
    }

    /// `None` on miss or expiry (an expired entry is dropped on read).
    pub fn get(&self, key: &str) -> Option<DispatchOutcome> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let outcome = entry.outcome.clone();
                let expires_at = entry.expires_at;
                // Touch for LRU recency without sliding the TTL forward —
                // expiry is measured from the original dispatch, not the read.
                entries.shift_remove(key);
                entries.insert(key.to_string(), CachedEntry { outcome: outcome.clone(), expires_at });
                Some(outcome)
            }
            Some(_) => {
                entries.shift_remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, outcome: DispatchOutcome) {
        let mut entries = self.entries.lock();
        entries.insert(key, CachedEntry { outcome, expires_at: Instant::now() + self.ttl });
        while entries.len() > self.capacity {
            entries.shift_remove_index(0);
        }
    }
}
