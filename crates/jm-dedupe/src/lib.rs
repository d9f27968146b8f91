//! TTL-bounded dedupe set (§4.2, §6.5).
//!
//! Canonical key is `(channel, bridge_id, external_message_id)` so the same
//! `external_message_id` across different bridges never collides (§6.5);
//! callers compose that tuple into the opaque string key this set stores.
//! Expiration is lazy on read, with `sweep()` available for periodic
//! cleanup so an idle set doesn't grow unbounded between lookups.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeOutcome {
    New,
    Duplicate,
}

pub struct DedupeSet {
    entries: DashMap<String, Instant>,
}

impl DedupeSet {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Atomic on the target key: a `New` result iff the key was absent or
    /// its previous mark had already expired.
    pub fn check_and_mark(&self, key: &str, ttl_ms: u64) -> DedupeOutcome {
        let now = Instant::now();
        let expires_at = now + Duration::from_millis(ttl_ms);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() <= now {
                    occupied.insert(expires_at);
                    DedupeOutcome::New
                } else {
                    DedupeOutcome::Duplicate
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(expires_at);
                DedupeOutcome::New
            }
        }
    }

    pub fn seen(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(expires_at) => *expires_at > Instant::now(),
            None => false,
        }
    }

    pub fn mark_seen(&self, key: &str, ttl_ms: u64) {
        self.entries.insert(key.to_string(), Instant::now() + Duration::from_millis(ttl_ms));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Count of entries not yet expired. Does not itself remove expired
    /// entries — call `sweep()` for that.
    pub fn count(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|entry| *entry.value() > now).count()
    }

    /// Removes all expired entries. Intended to be called on a periodic
    /// tick; never required for correctness since lookups treat an expired
    /// entry as absent regardless.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }
}

impl Default for DedupeSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Composes the canonical §6.5 dedupe key.
pub fn dedupe_key(channel: &str, bridge_id: &str, external_message_id: &str) -> String {
    format!("{channel}\u{1f}{bridge_id}\u{1f}{external_message_id}")
}
