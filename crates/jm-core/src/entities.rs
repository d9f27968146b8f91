//! Canonical entities that flow through the messaging fabric.
//!
//! All identifiers are opaque strings, stable across an entity's lifetime.
//! Timestamps are UTC with millisecond resolution; durations are
//! milliseconds unless otherwise noted.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// `(channel, instance_id|bridge_id, external_room_id)` — how an external
/// chat corresponds to an internal room.
pub type Channel = String;
pub type BridgeId = String;
pub type InstanceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Direct,
    Group,
    Channel,
    Thread,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Room {
    pub id: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub name: Option<String>,
    /// channel -> instance_id -> external_room_id
    #[serde(default)]
    pub external_bindings: HashMap<Channel, HashMap<InstanceId, String>>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(id: impl Into<String>, room_type: RoomType, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            room_type,
            name,
            external_bindings: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    Human,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Online,
    Offline,
    Away,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Participant {
    pub id: String,
    pub participant_type: ParticipantType,
    #[serde(default)]
    pub identity: Identity,
    /// channel -> external_user_id
    #[serde(default)]
    pub external_ids: HashMap<Channel, String>,
    pub presence: Presence,
}

impl Participant {
    pub fn new(id: impl Into<String>, participant_type: ParticipantType) -> Self {
        Self {
            id: id.into(),
            participant_type,
            identity: Identity::default(),
            external_ids: HashMap::new(),
            presence: Presence::Offline,
        }
    }
}

/// A single block of message content. Messages carry an ordered sequence
/// of these rather than a single text field, so that mixed-media or
/// tool-call payloads normalize the same way regardless of origin bridge.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { url: String, caption: Option<String> },
    Audio { url: String },
    Video { url: String },
    File { url: String, filename: Option<String> },
    ToolUse { name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, output: serde_json::Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Receipt {
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    pub external_id: Option<String>,
    pub reply_to_id: Option<String>,
    pub thread_root_id: Option<String>,
    pub status: MessageStatus,
    #[serde(default)]
    pub reactions: HashMap<String, HashSet<String>>,
    #[serde(default)]
    pub receipts: HashMap<String, Receipt>,
    /// Open map: channel, bridge_id, timestamp, policy decisions, security
    /// decisions, outbound gateway outcome summaries, ...
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub inserted_at: DateTime<Utc>,
}

impl Message {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BindingDirection {
    Inbound,
    Outbound,
    Both,
}

impl BindingDirection {
    pub fn participates_in_ingest(self) -> bool {
        matches!(self, BindingDirection::Inbound | BindingDirection::Both)
    }

    pub fn participates_in_outbound(self) -> bool {
        matches!(self, BindingDirection::Outbound | BindingDirection::Both)
    }
}

/// `instance_id` is the legacy field; `bridge_id`, when present, takes
/// precedence everywhere a caller must pick one.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoomBinding {
    pub id: String,
    pub room_id: String,
    pub channel: Channel,
    pub instance_id: InstanceId,
    pub bridge_id: Option<BridgeId>,
    pub external_room_id: String,
    pub direction: BindingDirection,
}

impl RoomBinding {
    /// The effective bridge id honoring the `bridge_id` > `instance_id`
    /// precedence rule.
    pub fn effective_bridge_id(&self) -> &str {
        self.bridge_id.as_deref().unwrap_or(&self.instance_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BridgeConfig {
    pub id: BridgeId,
    pub adapter_module: String,
    pub enabled: bool,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    #[serde(default)]
    pub opts: serde_json::Map<String, serde_json::Value>,
    pub delivery_policy: Option<String>,
    /// Monotonic, starts at 1 on first successful write.
    pub revision: u64,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Primary,
    Broadcast,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPolicy {
    NextAvailable,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoutingPolicy {
    pub room_id: String,
    pub delivery_mode: DeliveryMode,
    pub failover_policy: FailoverPolicy,
    #[serde(default)]
    pub fallback_order: Vec<BridgeId>,
    pub dedupe_scope: Option<String>,
    pub revision: u64,
}

impl RoutingPolicy {
    pub fn default_for_room(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            delivery_mode: DeliveryMode::BestEffort,
            failover_policy: FailoverPolicy::NextAvailable,
            fallback_order: Vec::new(),
            dedupe_scope: None,
            revision: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Never,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplayState {
    pub status: ReplayStatus,
    pub attempts: u32,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self { status: ReplayStatus::Never, attempts: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeadLetterDiagnostics {
    pub queue_capacity: u32,
    pub pressure_level: String,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeadLetter {
    pub id: String,
    pub bridge_id: BridgeId,
    pub reason: String,
    pub category: String,
    pub disposition: String,
    pub correlation_id: Option<String>,
    /// The captured outbound request, so that replay can re-submit it
    /// unchanged.
    pub request: serde_json::Value,
    pub replay: ReplayState,
    pub diagnostics: DeadLetterDiagnostics,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    Started,
    DirectoryResolved,
    Paired,
    Completed,
    Cancelled,
}

impl OnboardingStatus {
    /// The fixed transition DAG from §4.9: source -> allowed target
    /// transition names.
    pub fn allowed_transitions(self) -> &'static [&'static str] {
        match self {
            OnboardingStatus::Started => &["cancel", "resolve_directory"],
            OnboardingStatus::DirectoryResolved => &["cancel", "pair_identity"],
            OnboardingStatus::Paired => &["cancel", "complete"],
            OnboardingStatus::Completed | OnboardingStatus::Cancelled => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OnboardingStatus::Completed | OnboardingStatus::Cancelled)
    }

    /// The status a transition name leads to, given the current status.
    /// Only meaningful for `transition`s in `allowed_transitions()`.
    pub fn apply(self, transition: &str) -> Option<OnboardingStatus> {
        match (self, transition) {
            (OnboardingStatus::Started, "cancel") => Some(OnboardingStatus::Cancelled),
            (OnboardingStatus::Started, "resolve_directory") => Some(OnboardingStatus::DirectoryResolved),
            (OnboardingStatus::DirectoryResolved, "cancel") => Some(OnboardingStatus::Cancelled),
            (OnboardingStatus::DirectoryResolved, "pair_identity") => Some(OnboardingStatus::Paired),
            (OnboardingStatus::Paired, "cancel") => Some(OnboardingStatus::Cancelled),
            (OnboardingStatus::Paired, "complete") => Some(OnboardingStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OnboardingTransition {
    pub transition: String,
    pub status: OnboardingStatus,
    pub idempotency_key: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OnboardingFlow {
    pub onboarding_id: String,
    pub status: OnboardingStatus,
    pub transitions: Vec<OnboardingTransition>,
    #[serde(default)]
    pub side_effects: Vec<serde_json::Value>,
    pub completion_metadata: Option<serde_json::Value>,
}

impl OnboardingFlow {
    pub fn new(onboarding_id: impl Into<String>) -> Self {
        Self {
            onboarding_id: onboarding_id.into(),
            status: OnboardingStatus::Started,
            transitions: Vec::new(),
            side_effects: Vec::new(),
            completion_metadata: None,
        }
    }
}

/// `(channel_type, instance_id, room_id, thread_id?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct SessionKey {
    pub channel_type: String,
    pub instance_id: InstanceId,
    pub room_id: String,
    pub thread_id: Option<String>,
}

impl SessionKey {
    pub fn new(channel_type: impl Into<String>, instance_id: impl Into<String>, room_id: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            instance_id: instance_id.into(),
            room_id: room_id.into(),
            thread_id,
        }
    }

    /// The room-scoped key obtained by dropping the thread component —
    /// used as the first fallback lookup in `resolve`.
    pub fn room_scope(&self) -> SessionKey {
        SessionKey {
            channel_type: self.channel_type.clone(),
            instance_id: self.instance_id.clone(),
            room_id: self.room_id.clone(),
            thread_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionRoute {
    pub external_room_id: String,
    pub bridge_id: Option<BridgeId>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SessionRouteEntry {
    pub route: SessionRoute,
    pub updated_at_ms: i64,
    pub expires_at_ms: i64,
    pub seq: u64,
}
