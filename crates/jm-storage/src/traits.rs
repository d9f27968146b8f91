//! The storage contract (§4.1): a durable-looking abstraction over every
//! persisted entity. Implementations never raise on a missing key — they
//! return `None`/empty, and callers surface `not_found`/`ambiguous` from
//! the taxonomy in `jm_core::error`.

use async_trait::async_trait;
use jm_core::entities::{
    BridgeConfig, DeadLetter, Message, OnboardingFlow, Participant, Room, RoomBinding, RoomType,
    RoutingPolicy,
};

/// A directory lookup predicate (§4.1 "directory search"). At least one of
/// the two filters should be set; both may apply together.
#[derive(Debug, Clone, Default)]
pub struct DirectoryQuery {
    pub name_substring: Option<String>,
    pub channel_external_id: Option<(String, String)>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    // -- rooms --------------------------------------------------------
    async fn get_room(&self, id: &str) -> Option<Room>;
    async fn save_room(&self, room: Room) -> Room;
    /// Idempotent under concurrent callers (§5): only one caller's insert
    /// wins the race; the rest observe and return the winner's room.
    async fn get_or_create_room_by_external_binding(
        &self,
        channel: &str,
        instance_id: &str,
        external_room_id: &str,
        room_type: RoomType,
        name: Option<String>,
    ) -> Room;
    /// Ordered by `id` for determinism.
    async fn search_rooms(&self, query: &DirectoryQuery) -> Vec<Room>;

    // -- participants ---------------------------------------------------
    async fn get_participant(&self, id: &str) -> Option<Participant>;
    async fn save_participant(&self, participant: Participant) -> Participant;
    async fn get_or_create_participant_by_external_id(&self, channel: &str, external_user_id: &str) -> Participant;
    async fn search_participants(&self, query: &DirectoryQuery) -> Vec<Participant>;

    // -- messages ---------------------------------------------------------
    /// Additionally indexes by `(channel, bridge_id, external_id)` when
    /// both `message.metadata` carries a channel and `message.external_id`
    /// is present.
    async fn save_message(&self, message: Message) -> Message;
    async fn get_message(&self, id: &str) -> Option<Message>;
    async fn find_message_by_external_id(&self, channel: &str, bridge_id: &str, external_id: &str) -> Option<Message>;
    /// Most-recent-first internally, then reversed to chronological order
    /// before returning, capped at `limit`.
    async fn get_messages(&self, room_id: &str, limit: usize) -> Vec<Message>;

    // -- room bindings ----------------------------------------------------
    /// Enforces the `(room_id, channel, instance_id, external_room_id)`
    /// unique tuple — a duplicate create returns the existing binding.
    async fn create_room_binding(&self, binding: RoomBinding) -> RoomBinding;
    async fn list_room_bindings(&self, room_id: &str) -> Vec<RoomBinding>;
    async fn delete_room_binding(&self, id: &str) -> bool;

    // -- bridge config & routing policy -----------------------------------
    /// Raw read/write with no revision enforcement — optimistic
    /// concurrency is the config store's (`jm-registry`) responsibility,
    /// layered on top of this storage contract.
    async fn get_bridge_config(&self, id: &str) -> Option<BridgeConfig>;
    async fn put_bridge_config_raw(&self, config: BridgeConfig) -> BridgeConfig;
    async fn list_bridge_configs(&self, enabled: Option<bool>) -> Vec<BridgeConfig>;

    async fn get_routing_policy(&self, room_id: &str) -> Option<RoutingPolicy>;
    async fn put_routing_policy_raw(&self, policy: RoutingPolicy) -> RoutingPolicy;

    // -- dead letters -------------------------------------------------------
    async fn save_dead_letter(&self, dead_letter: DeadLetter) -> DeadLetter;
    async fn get_dead_letter(&self, id: &str) -> Option<DeadLetter>;
    async fn update_dead_letter(&self, dead_letter: DeadLetter) -> DeadLetter;
    /// Used by the dead-letter store's `max_records` eviction (§4.8).
    async fn delete_dead_letter(&self, id: &str) -> bool;

    // -- onboarding ----------------------------------------------------------
    async fn save_onboarding(&self, flow: OnboardingFlow) -> OnboardingFlow;
    async fn get_onboarding(&self, onboarding_id: &str) -> Option<OnboardingFlow>;
}

/// Forwards every method to the pointee, so a single shared
/// `Arc<InMemoryStorage>` can back both direct `Arc<dyn Storage>`
/// consumers (ingest, the webhook surface) and `jm-registry`'s
/// `ConfigStore<S: Storage>`, which takes its storage by value.
#[async_trait]
impl<T: Storage + ?Sized> Storage for std::sync::Arc<T> {
    async fn get_room(&self, id: &str) -> Option<Room> {
        (**self).get_room(id).await
    }
    async fn save_room(&self, room: Room) -> Room {
        (**self).save_room(room).await
    }
    async fn get_or_create_room_by_external_binding(
        &self,
        channel: &str,
        instance_id: &str,
        external_room_id: &str,
        room_type: RoomType,
        name: Option<String>,
    ) -> Room {
        (**self).get_or_create_room_by_external_binding(channel, instance_id, external_room_id, room_type, name).await
    }
    async fn search_rooms(&self, query: &DirectoryQuery) -> Vec<Room> {
        (**self).search_rooms(query).await
    }

    async fn get_participant(&self, id: &str) -> Option<Participant> {
        (**self).get_participant(id).await
    }
    async fn save_participant(&self, participant: Participant) -> Participant {
        (**self).save_participant(participant).await
    }
    async fn get_or_create_participant_by_external_id(&self, channel: &str, external_user_id: &str) -> Participant {
        (**self).get_or_create_participant_by_external_id(channel, external_user_id).await
    }
    async fn search_participants(&self, query: &DirectoryQuery) -> Vec<Participant> {
        (**self).search_participants(query).await
    }

    async fn save_message(&self, message: Message) -> Message {
        (**self).save_message(message).await
    }
    async fn get_message(&self, id: &str) -> Option<Message> {
        (**self).get_message(id).await
    }
    async fn find_message_by_external_id(&self, channel: &str, bridge_id: &str, external_id: &str) -> Option<Message> {
        (**self).find_message_by_external_id(channel, bridge_id, external_id).await
    }
    async fn get_messages(&self, room_id: &str, limit: usize) -> Vec<Message> {
        (**self).get_messages(room_id, limit).await
    }

    async fn create_room_binding(&self, binding: RoomBinding) -> RoomBinding {
        (**self).create_room_binding(binding).await
    }
    async fn list_room_bindings(&self, room_id: &str) -> Vec<RoomBinding> {
        (**self).list_room_bindings(room_id).await
    }
    async fn delete_room_binding(&self, id: &str) -> bool {
        (**self).delete_room_binding(id).await
    }

    async fn get_bridge_config(&self, id: &str) -> Option<BridgeConfig> {
        (**self).get_bridge_config(id).await
    }
    async fn put_bridge_config_raw(&self, config: BridgeConfig) -> BridgeConfig {
        (**self).put_bridge_config_raw(config).await
    }
    async fn list_bridge_configs(&self, enabled: Option<bool>) -> Vec<BridgeConfig> {
        (**self).list_bridge_configs(enabled).await
    }

    async fn get_routing_policy(&self, room_id: &str) -> Option<RoutingPolicy> {
        (**self).get_routing_policy(room_id).await
    }
    async fn put_routing_policy_raw(&self, policy: RoutingPolicy) -> RoutingPolicy {
        (**self).put_routing_policy_raw(policy).await
    }

    async fn save_dead_letter(&self, dead_letter: DeadLetter) -> DeadLetter {
        (**self).save_dead_letter(dead_letter).await
    }
    async fn get_dead_letter(&self, id: &str) -> Option<DeadLetter> {
        (**self).get_dead_letter(id).await
    }
    async fn update_dead_letter(&self, dead_letter: DeadLetter) -> DeadLetter {
        (**self).update_dead_letter(dead_letter).await
    }
    async fn delete_dead_letter(&self, id: &str) -> bool {
        (**self).delete_dead_letter(id).await
    }

    async fn save_onboarding(&self, flow: OnboardingFlow) -> OnboardingFlow {
        (**self).save_onboarding(flow).await
    }
    async fn get_onboarding(&self, onboarding_id: &str) -> Option<OnboardingFlow> {
        (**self).get_onboarding(onboarding_id).await
    }
}

/// Directory lookups that expect at most one match use this to turn the
/// raw `Vec` into the `not_found` / `ambiguous` taxonomy.
pub fn require_unique<T>(mut matches: Vec<T>) -> Result<T, jm_core::error::Reason> {
    if matches.is_empty() {
        return Err(jm_core::error::Reason::NotFound);
    }
    if matches.len() > 1 {
        return Err(jm_core::error::Reason::Ambiguous);
    }
    Ok(matches.remove(0))
}
