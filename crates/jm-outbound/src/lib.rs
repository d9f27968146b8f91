//! Partitioned outbound gateway (§4.5) and outbound router (§4.6).
//!
//! A `partition_count`-way single-writer worker set. Routing is by
//! `hash(instance_id, external_room_id) mod partition_count`: the same
//! pair always lands on the same partition for the process's lifetime
//! (§5, §8 S5), which is what gives FIFO ordering per external room.

pub mod gateway;
pub mod idempotency;
pub mod partition;
pub mod pressure;
pub mod router;

pub use gateway::{DegradedAction, GatewayConfig, OutboundGateway, ShedAction, UnsupportedMediaPolicy};
pub use pressure::{pressure_level, PressureLevel, PressureThresholds};
pub use router::{route_outbound, route_outbound_for_message, RouteOutcome, RouteOutboundError, RoutedAttempt};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use jm_core::adapter::BridgeAdapter;
use jm_core::entities::DeadLetter;
use serde::{Deserialize, Serialize};

/// Everything a partition needs to identify where a request is bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundContext {
    pub channel: String,
    pub instance_id: String,
    pub external_room_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    SendMessage,
    EditMessage,
    SendMedia,
    EditMedia,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::SendMessage => "send_message",
            Operation::EditMessage => "edit_message",
            Operation::SendMedia => "send_media",
            Operation::EditMedia => "edit_media",
        }
    }

    pub fn is_edit(self) -> bool {
        matches!(self, Operation::EditMessage | Operation::EditMedia)
    }

    pub fn is_media(self) -> bool {
        matches!(self, Operation::SendMedia | Operation::EditMedia)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    File,
}

impl MediaKind {
    pub fn capability(self) -> jm_core::adapter::Capability {
        jm_core::adapter::Capability::SendMedia
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::File => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutboundPayload {
    Text(String),
    Media { kind: MediaKind, url: String, size_bytes: Option<u64>, fallback_text: Option<String> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundOptions {
    pub idempotency_key: Option<String>,
    /// Lower sorts first for priority-based load shedding; default 5.
    pub priority: u8,
    /// Required for `EditMessage` / `EditMedia`.
    pub external_message_id: Option<String>,
}

/// A full request snapshot, as captured into a [`DeadLetter`]'s `request`
/// field so replay can re-submit it unchanged (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub operation: Operation,
    pub context: OutboundContext,
    pub payload: OutboundPayload,
    pub options: OutboundOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub external_message_id: String,
    pub media_fallback: bool,
    pub fallback_mode: Option<String>,
}

/// Resolves the adapter that owns a given `instance_id` (bridge). The
/// registry (`jm-registry`) implements this directly; kept as a narrow
/// trait here so `jm-outbound` doesn't depend on the registry crate.
pub trait AdapterResolver: Send + Sync {
    fn resolve(&self, instance_id: &str) -> Option<Arc<dyn BridgeAdapter>>;
}

/// Captures a terminally-failed request as a [`DeadLetter`] and returns
/// its id. `jm-deadletter`'s store implements this, wrapping its
/// `max_records` eviction policy around `jm-storage`.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn capture(&self, dead_letter: DeadLetter) -> String;
}

pub(crate) fn partition_index(instance_id: &str, external_room_id: &str, partition_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    instance_id.hash(&mut hasher);
    external_room_id.hash(&mut hasher);
    (hasher.finish() as usize) % partition_count.max(1)
}
