//! Signal bus — the "uniform event bus" design note from §9.
//!
//! Every subsystem emits `(event_name, measurements, metadata)` triples
//! through a shared [`SignalBus`]. Handlers register against an event-name
//! prefix (e.g. `"outbound."`) and are invoked for every matching event.
//! Event names are stable strings, all under the `jido_messaging` prefix
//! per §6.3.
//!
//! This is deliberately synchronous and in-process: the spec's non-goals
//! exclude audit/telemetry consumers, only the emission contract is in
//! scope. A handler that wants to ship events elsewhere (metrics exporter,
//! log sink) is free to do non-blocking work internally.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::trace;

pub type Measurements = Map<String, Value>;
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct Signal {
    pub event_name: &'static str,
    pub measurements: Measurements,
    pub metadata: Metadata,
}

pub trait SignalHandler: Send + Sync {
    fn handle(&self, signal: &Signal);
}

struct RegisteredHandler {
    prefix: &'static str,
    handler: Arc<dyn SignalHandler>,
}

/// Process-wide event dispatcher. Cheap to clone (it's an `Arc` inside);
/// construct one per process and thread it through every subsystem that
/// needs to emit telemetry.
#[derive(Clone)]
pub struct SignalBus {
    handlers: Arc<RwLock<Vec<RegisteredHandler>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self { handlers: Arc::new(RwLock::new(Vec::new())) }
    }

    /// Register a handler for every event whose name starts with `prefix`.
    /// Pass `""` to receive everything.
    pub fn register(&self, prefix: &'static str, handler: Arc<dyn SignalHandler>) {
        self.handlers.write().push(RegisteredHandler { prefix, handler });
    }

    pub fn emit(&self, event_name: &'static str, measurements: Measurements, metadata: Metadata) {
        let signal = Signal { event_name, measurements, metadata };
        trace!(event = event_name, "signal emitted");
        for registered in self.handlers.read().iter() {
            if event_name.starts_with(registered.prefix) {
                registered.handler.handle(&signal);
            }
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every signal at debug level via `tracing`. Registered by default
/// so a fresh `SignalBus` is never silently inert.
pub struct TracingSignalHandler;

impl SignalHandler for TracingSignalHandler {
    fn handle(&self, signal: &Signal) {
        tracing::debug!(
            event = signal.event_name,
            measurements = %Value::Object(signal.measurements.clone()),
            metadata = %Value::Object(signal.metadata.clone()),
            "signal"
        );
    }
}

pub fn measurements() -> Measurements {
    Map::new()
}

pub fn metadata() -> Metadata {
    Map::new()
}
