use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use dashmap::DashMap;
use jm_core::entities::{SessionKey, SessionRoute, SessionRouteEntry};
use jm_core::signals::{measurements, metadata, SignalBus};
use parking_lot::Mutex;

use crate::{FallbackReason, ResolveError, ResolveOutcome, ResolveSource};

fn clock_start() -> &'static Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now)
}

fn now_ms() -> i64 {
    clock_start().elapsed().as_millis() as i64
}

pub struct SessionPartition {
    id: usize,
    map: DashMap<SessionKey, SessionRouteEntry>,
    order: Mutex<VecDeque<(u64, SessionKey)>>,
    seq: AtomicU64,
    max_entries: usize,
    signals: SignalBus,
}

impl SessionPartition {
    pub fn new(id: usize, max_entries: usize, signals: SignalBus) -> Self {
        Self { id, map: DashMap::new(), order: Mutex::new(VecDeque::new()), max_entries, signals }
    }

    pub fn set(&self, key: SessionKey, route: SessionRoute, ttl_ms: i64) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let now = now_ms();
        let entry = SessionRouteEntry { route, updated_at_ms: now, expires_at_ms: now + ttl_ms.max(0), seq };
        self.map.insert(key.clone(), entry);
        self.order.lock().push_back((seq, key));
        self.evict_if_over_capacity();
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionRouteEntry> {
        let now = now_ms();
        let hit = self.map.get(key).map(|entry| entry.clone());
        match hit {
            Some(entry) if entry.expires_at_ms > now => Some(entry),
            Some(_) => {
                self.map.remove(key);
                None
            }
            None => None,
        }
    }

    /// §4.7 `resolve`: exact lookup, then room-scope fallback (with
    /// promotion), then caller-provided fallback routes, else `NoRoute`.
    pub fn resolve(&self, key: &SessionKey, fallback_routes: &[SessionRoute], default_ttl_ms: i64) -> Result<ResolveOutcome, ResolveError> {
        let now = now_ms();
        let mut stale_any = false;

        if let Some(entry) = self.map.get(key).map(|e| e.clone()) {
            if entry.expires_at_ms > now {
                return Ok(ResolveOutcome { route: entry.route, source: ResolveSource::StateHit, fallback: false, stale: false, fallback_reason: None });
            }
            self.map.remove(key);
            stale_any = true;
        }

        let room_scope_key = key.room_scope();
        if &room_scope_key != key {
            if let Some(entry) = self.map.get(&room_scope_key).map(|e| e.clone()) {
                if entry.expires_at_ms > now {
                    self.set(key.clone(), entry.route.clone(), entry.expires_at_ms - now);
                    let fallback_reason = if stale_any { FallbackReason::Stale } else { FallbackReason::ThreadScopeMiss };
                    self.emit_resolve("partition_fallback", key);
                    return Ok(ResolveOutcome {
                        route: entry.route,
                        source: ResolveSource::PartitionFallback,
                        fallback: true,
                        stale: stale_any,
                        fallback_reason: Some(fallback_reason),
                    });
                }
                self.map.remove(&room_scope_key);
                stale_any = true;
            }
        }

        if let Some(route) = fallback_routes.iter().find(|route| !route.external_room_id.is_empty()) {
            self.set(key.clone(), route.clone(), default_ttl_ms);
            let fallback_reason = if stale_any { FallbackReason::Stale } else { FallbackReason::Miss };
            self.emit_resolve("provided_fallback", key);
            return Ok(ResolveOutcome {
                route: route.clone(),
                source: ResolveSource::ProvidedFallback,
                fallback: true,
                stale: stale_any,
                fallback_reason: Some(fallback_reason),
            });
        }

        Err(ResolveError::NoRoute)
    }

    /// Removes every entry whose TTL has elapsed. Run on a timer per
    /// partition rather than only lazily on read, so cold keys are
    /// reclaimed even without traffic.
    pub fn prune(&self) -> usize {
        let now = now_ms();
        let expired: Vec<SessionKey> = self.map.iter().filter(|entry| entry.expires_at_ms <= now).map(|entry| entry.key().clone()).collect();
        let count = expired.len();
        for key in &expired {
            self.map.remove(key);
        }
        if count > 0 {
            let mut meta = metadata();
            meta.insert("partition".into(), (self.id as u64).into());
            meta.insert("count".into(), (count as u64).into());
            self.signals.emit("session_route.pruned", measurements(), meta);
        }
        count
    }

    fn evict_if_over_capacity(&self) {
        let mut evicted = 0u64;
        loop {
            if self.map.len() <= self.max_entries {
                break;
            }
            let next = {
                let mut order = self.order.lock();
                order.pop_front()
            };
            let Some((seq, key)) = next else { break };
            // A later `set` on this key bumped its seq — this order entry
            // is a stale tombstone, not the live value; skip without
            // removing the (still current) map entry.
            let is_tombstone = self.map.get(&key).map(|entry| entry.seq != seq).unwrap_or(true);
            if is_tombstone {
                continue;
            }
            self.map.remove(&key);
            evicted += 1;
        }
        if evicted > 0 {
            let mut meta = metadata();
            meta.insert("partition".into(), (self.id as u64).into());
            meta.insert("count".into(), evicted.into());
            meta.insert("reason".into(), "capacity".into());
            self.signals.emit("session_route.evicted", measurements(), meta);
        }
    }

    fn emit_resolve(&self, outcome: &'static str, key: &SessionKey) {
        let mut meta = metadata();
        meta.insert("partition".into(), (self.id as u64).into());
        meta.insert("outcome".into(), outcome.into());
        meta.insert("room_id".into(), key.room_id.clone().into());
        self.signals.emit("session_route.resolved", measurements(), meta);
    }
}
