//! Per-instance bridge supervisor (§4.10): starts the adapter's listener
//! tasks, runs a health prober, and drives reconnect backoff on failure.
//!
//! Modeled as a single-writer worker like the rest of the fabric: all
//! state lives behind one lock owned by this supervisor, mutated only by
//! its own background tasks or by callers going through `notify_*`. A
//! crash here is isolated to this instance — nothing here restarts a
//! sibling bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jm_core::adapter::{BridgeAdapter, Capability};
use jm_core::signals::{measurements, metadata, SignalBus};
use parking_lot::Mutex;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Starting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct InstanceManagerConfig {
    pub reconnect_base_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
    pub reconnect_jitter_ratio: f64,
    pub max_reconnect_attempts: u32,
    pub max_consecutive_failures: u32,
}

impl Default for InstanceManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_base_backoff_ms: 500,
            reconnect_max_backoff_ms: 60_000,
            reconnect_jitter_ratio: 0.2,
            max_reconnect_attempts: 20,
            max_consecutive_failures: 10,
        }
    }
}

struct InstanceState {
    status: InstanceStatus,
    consecutive_failures: u32,
    reconnect_attempt: u32,
    last_error: Option<String>,
    connected_at: Option<DateTime<Utc>>,
}

pub struct InstanceSupervisor {
    instance_id: String,
    adapter: Arc<dyn BridgeAdapter>,
    config: InstanceManagerConfig,
    signals: SignalBus,
    state: Mutex<InstanceState>,
    listeners: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl InstanceSupervisor {
    pub fn new(instance_id: impl Into<String>, adapter: Arc<dyn BridgeAdapter>, config: InstanceManagerConfig, signals: SignalBus) -> Arc<Self> {
        Arc::new(Self {
            instance_id: instance_id.into(),
            adapter,
            config,
            signals,
            state: Mutex::new(InstanceState { status: InstanceStatus::Starting, consecutive_failures: 0, reconnect_attempt: 0, last_error: None, connected_at: None }),
            listeners: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// §4.10 on-start sequence: resolve and start listener tasks, then
    /// either start the health prober (capability declared) or treat the
    /// instance as connected on the strength of the listeners alone.
    pub fn start(self: &Arc<Self>) {
        *self.listeners.lock() = self.adapter.spawn_listeners(&self.instance_id);
        if self.adapter.has_capability(Capability::CheckHealth) {
            self.spawn_health_prober();
        } else {
            self.notify_success();
        }
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.state.lock().status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().connected_at
    }

    /// On the first successful health check, transitions `:starting` ->
    /// `:connected` and records `connected_at`. Resets the failure streak
    /// and reconnect-attempt counter regardless of prior status.
    pub fn notify_success(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.reconnect_attempt = 0;
        if state.status != InstanceStatus::Connected {
            state.status = InstanceStatus::Connected;
            state.connected_at = Some(Utc::now());
        }
    }

    /// §4.10 failure handling: bump the streak, and either trip to
    /// `:error` at the configured threshold or schedule a reconnect.
    pub fn notify_failure(self: &Arc<Self>, reason: &str) {
        let schedule = {
            let mut state = self.state.lock();
            state.consecutive_failures += 1;
            state.last_error = Some(reason.to_string());
            if state.consecutive_failures >= self.config.max_consecutive_failures {
                state.status = InstanceStatus::Error;
                false
            } else {
                true
            }
        };
        if schedule {
            self.schedule_reconnect();
        }
    }

    fn spawn_health_prober(self: &Arc<Self>) {
        let this = self.clone();
        let interval_ms = this.adapter.probe_interval_ms().max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                if this.stopped.load(Ordering::SeqCst) || this.status() == InstanceStatus::Error {
                    return;
                }
                if this.adapter.check_health().await {
                    this.notify_success();
                } else {
                    this.notify_failure("health_check_failed");
                }
            }
        });
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let attempt = {
                let mut state = this.state.lock();
                state.reconnect_attempt += 1;
                state.reconnect_attempt
            };
            if attempt > this.config.max_reconnect_attempts {
                this.emit("instance.reconnect_exhausted", attempt, None);
                return;
            }

            let delay_ms = reconnect_delay_ms(attempt, this.config.reconnect_base_backoff_ms, this.config.reconnect_max_backoff_ms, this.config.reconnect_jitter_ratio);
            this.emit("instance.reconnect_scheduled", attempt, Some(delay_ms));
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            if this.stopped.load(Ordering::SeqCst) {
                return;
            }
            this.emit("instance.reconnect_attempt", attempt, None);
            if this.adapter.check_health().await {
                this.notify_success();
            } else {
                this.notify_failure("reconnect_attempt_failed");
            }
        });
    }

    fn emit(&self, event: &'static str, attempt: u32, delay_ms: Option<u64>) {
        let mut meta = metadata();
        meta.insert("instance_id".into(), self.instance_id.clone().into());
        meta.insert("attempt".into(), (attempt as u64).into());
        if let Some(delay_ms) = delay_ms {
            meta.insert("delay_ms".into(), delay_ms.into());
        }
        self.signals.emit(event, measurements(), meta);
    }
}

/// Exponential backoff bounded by `[base_ms, max_ms]`, jittered by
/// `± jitter_ratio` of the bounded value (§4.10) — distinct from the
/// outbound gateway's full-jitter scheme, which picks uniformly from zero.
fn reconnect_delay_ms(attempt: u32, base_ms: u64, max_ms: u64, jitter_ratio: f64) -> u64 {
    let shift = attempt.saturating_sub(1).min(32);
    let exponential = base_ms.saturating_mul(1u64 << shift);
    let bounded = exponential.min(max_ms.max(base_ms));
    let span = (bounded as f64 * jitter_ratio).round() as i64;
    let jitter = if span > 0 { rand::thread_rng().gen_range(-span..=span) } else { 0 };
    (bounded as i64 + jitter).max(0) as u64
}
