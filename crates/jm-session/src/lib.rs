//! Partitioned, TTL-bounded session route cache (§4.7).
//!
//! `partition_count` partitions, each owning an ETS-like map plus a FIFO
//! insertion order and a monotonic `seq` — a single-writer worker in
//! spirit even though writes here are cheap enough to run inline under a
//! lock rather than through a queued worker loop (contrast
//! `jm-outbound`, where the dispatch itself is the expensive part).
//!
//! A session key and its room-scoped fallback always land on the same
//! partition (hashing ignores `thread_id`), so `resolve`'s thread → room
//! fallback never crosses a partition boundary.

mod partition;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use jm_core::entities::{SessionKey, SessionRoute, SessionRouteEntry};
use jm_core::signals::SignalBus;

use partition::SessionPartition;

#[derive(Debug, Clone, Copy)]
pub struct SessionManagerConfig {
    pub partition_count: usize,
    pub max_entries_per_partition: usize,
    pub default_ttl_ms: i64,
    pub prune_interval_ms: u64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self { partition_count: 16, max_entries_per_partition: 10_000, default_ttl_ms: 86_400_000, prune_interval_ms: 60_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveSource {
    StateHit,
    PartitionFallback,
    ProvidedFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    Stale,
    ThreadScopeMiss,
    Miss,
}

#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub route: SessionRoute,
    pub source: ResolveSource,
    pub fallback: bool,
    pub stale: bool,
    pub fallback_reason: Option<FallbackReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    NoRoute,
}

pub struct SessionManager {
    config: SessionManagerConfig,
    partitions: Vec<Arc<SessionPartition>>,
    signals: SignalBus,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, signals: SignalBus) -> Self {
        let partition_count = config.partition_count.max(1);
        let partitions: Vec<Arc<SessionPartition>> = (0..partition_count)
            .map(|id| Arc::new(SessionPartition::new(id, config.max_entries_per_partition.max(1), signals.clone())))
            .collect();
        for partition in &partitions {
            let partition = partition.clone();
            let interval = Duration::from_millis(config.prune_interval_ms.max(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // first tick fires immediately; skip it
                loop {
                    ticker.tick().await;
                    partition.prune();
                }
            });
        }
        Self { config, partitions, signals }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition_for(&self, key: &SessionKey) -> &Arc<SessionPartition> {
        let mut hasher = DefaultHasher::new();
        key.channel_type.hash(&mut hasher);
        key.instance_id.hash(&mut hasher);
        key.room_id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.partitions.len();
        &self.partitions[idx]
    }

    pub fn set(&self, key: SessionKey, route: SessionRoute, ttl_ms: i64) {
        self.partition_for(&key).set(key, route, ttl_ms);
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionRouteEntry> {
        self.partition_for(key).get(key)
    }

    pub fn resolve(&self, key: &SessionKey, fallback_routes: &[SessionRoute]) -> Result<ResolveOutcome, ResolveError> {
        self.partition_for(key).resolve(key, fallback_routes, self.config.default_ttl_ms)
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }
}
