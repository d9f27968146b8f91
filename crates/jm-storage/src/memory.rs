//! In-memory reference implementation of [`crate::traits::Storage`].
//!
//! Primary maps keyed by id; secondary `DashMap`s for the external-binding
//! lookups. `get_or_create_*` race resolution (§5) is the entry API's
//! shard-locked `or_insert_with`: concurrent callers racing the same key
//! serialize on that shard, so exactly one insert wins and the rest observe
//! it.

use dashmap::DashMap;
use jm_core::entities::{
    BridgeConfig, DeadLetter, Message, OnboardingFlow, Participant, Room, RoomBinding, RoomType,
    RoutingPolicy,
};
use parking_lot::Mutex;

use crate::traits::{DirectoryQuery, Storage};

type BindingKey = (String, String, String);
type ExternalIdKey = (String, String);
type MessageExternalKey = (String, String, String);

pub struct InMemoryStorage {
    rooms: DashMap<String, Room>,
    rooms_by_binding: DashMap<BindingKey, String>,
    participants: DashMap<String, Participant>,
    participants_by_external: DashMap<ExternalIdKey, String>,
    messages: DashMap<String, Message>,
    messages_by_external: DashMap<MessageExternalKey, String>,
    room_message_order: DashMap<String, Mutex<Vec<String>>>,
    room_bindings: DashMap<String, RoomBinding>,
    room_bindings_by_room: DashMap<String, Mutex<Vec<String>>>,
    room_bindings_by_tuple: DashMap<(String, String, String, String), String>,
    bridge_configs: DashMap<String, BridgeConfig>,
    routing_policies: DashMap<String, RoutingPolicy>,
    dead_letters: DashMap<String, DeadLetter>,
    onboarding_flows: DashMap<String, OnboardingFlow>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            rooms_by_binding: DashMap::new(),
            participants: DashMap::new(),
            participants_by_external: DashMap::new(),
            messages: DashMap::new(),
            messages_by_external: DashMap::new(),
            room_message_order: DashMap::new(),
            room_bindings: DashMap::new(),
            room_bindings_by_room: DashMap::new(),
            room_bindings_by_tuple: DashMap::new(),
            bridge_configs: DashMap::new(),
            routing_policies: DashMap::new(),
            dead_letters: DashMap::new(),
            onboarding_flows: DashMap::new(),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for InMemoryStorage {
    async fn get_room(&self, id: &str) -> Option<Room> {
        self.rooms.get(id).map(|r| r.clone())
    }

    async fn save_room(&self, room: Room) -> Room {
        self.rooms.insert(room.id.clone(), room.clone());
        room
    }

    async fn get_or_create_room_by_external_binding(
        &self,
        channel: &str,
        instance_id: &str,
        external_room_id: &str,
        room_type: RoomType,
        name: Option<String>,
    ) -> Room {
        let key = (channel.to_string(), instance_id.to_string(), external_room_id.to_string());
        let room_id = self
            .rooms_by_binding
            .entry(key)
            .or_insert_with(|| {
                let mut room = Room::new(uuid::Uuid::new_v4().to_string(), room_type, name);
                room.external_bindings
                    .entry(channel.to_string())
                    .or_default()
                    .insert(instance_id.to_string(), external_room_id.to_string());
                let id = room.id.clone();
                self.rooms.insert(id.clone(), room);
                id
            })
            .clone();
        self.rooms.get(&room_id).map(|r| r.clone()).expect("room inserted alongside its binding index")
    }

    async fn search_rooms(&self, query: &DirectoryQuery) -> Vec<Room> {
        let mut matches: Vec<Room> = self
            .rooms
            .iter()
            .filter(|entry| {
                let room = entry.value();
                let name_ok = match &query.name_substring {
                    Some(needle) => room
                        .name
                        .as_deref()
                        .map(|n| n.to_lowercase().contains(&needle.to_lowercase()))
                        .unwrap_or(false),
                    None => true,
                };
                let external_ok = match &query.channel_external_id {
                    Some((channel, external_id)) => room
                        .external_bindings
                        .get(channel)
                        .map(|by_instance| by_instance.values().any(|v| v == external_id))
                        .unwrap_or(false),
                    None => true,
                };
                name_ok && external_ok
            })
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    async fn get_participant(&self, id: &str) -> Option<Participant> {
        self.participants.get(id).map(|p| p.clone())
    }

    async fn save_participant(&self, participant: Participant) -> Participant {
        self.participants.insert(participant.id.clone(), participant.clone());
        participant
    }

    async fn get_or_create_participant_by_external_id(&self, channel: &str, external_user_id: &str) -> Participant {
        let key = (channel.to_string(), external_user_id.to_string());
        let participant_id = self
            .participants_by_external
            .entry(key)
            .or_insert_with(|| {
                let mut participant =
                    Participant::new(uuid::Uuid::new_v4().to_string(), jm_core::entities::ParticipantType::Human);
                participant.external_ids.insert(channel.to_string(), external_user_id.to_string());
                let id = participant.id.clone();
                self.participants.insert(id.clone(), participant);
                id
            })
            .clone();
        self.participants.get(&participant_id).map(|p| p.clone()).expect("participant inserted alongside its index")
    }

    async fn search_participants(&self, query: &DirectoryQuery) -> Vec<Participant> {
        let mut matches: Vec<Participant> = self
            .participants
            .iter()
            .filter(|entry| {
                let participant = entry.value();
                let name_ok = match &query.name_substring {
                    Some(needle) => participant
                        .identity
                        .name
                        .as_deref()
                        .map(|n| n.to_lowercase().contains(&needle.to_lowercase()))
                        .unwrap_or(false),
                    None => true,
                };
                let external_ok = match &query.channel_external_id {
                    Some((channel, external_id)) => {
                        participant.external_ids.get(channel).map(|v| v == external_id).unwrap_or(false)
                    }
                    None => true,
                };
                name_ok && external_ok
            })
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    async fn save_message(&self, message: Message) -> Message {
        if let Some(external_id) = &message.external_id {
            if let Some(channel) = message.metadata_str("channel") {
                if let Some(bridge_id) = message.metadata_str("bridge_id") {
                    self.messages_by_external.insert(
                        (channel.to_string(), bridge_id.to_string(), external_id.clone()),
                        message.id.clone(),
                    );
                }
            }
        }
        self.room_message_order
            .entry(message.room_id.clone())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(message.id.clone());
        self.messages.insert(message.id.clone(), message.clone());
        message
    }

    async fn get_message(&self, id: &str) -> Option<Message> {
        self.messages.get(id).map(|m| m.clone())
    }

    async fn find_message_by_external_id(&self, channel: &str, bridge_id: &str, external_id: &str) -> Option<Message> {
        let key = (channel.to_string(), bridge_id.to_string(), external_id.to_string());
        let message_id = self.messages_by_external.get(&key)?.clone();
        self.messages.get(&message_id).map(|m| m.clone())
    }

    async fn get_messages(&self, room_id: &str, limit: usize) -> Vec<Message> {
        let Some(order) = self.room_message_order.get(room_id) else {
            return Vec::new();
        };
        let order = order.lock();
        let recent_first: Vec<String> = order.iter().rev().take(limit).cloned().collect();
        let mut chronological: Vec<Message> =
            recent_first.into_iter().rev().filter_map(|id| self.messages.get(&id).map(|m| m.clone())).collect();
        chronological.sort_by_key(|m| m.inserted_at);
        chronological
    }

    async fn create_room_binding(&self, binding: RoomBinding) -> RoomBinding {
        let tuple_key = (
            binding.room_id.clone(),
            binding.channel.clone(),
            binding.instance_id.clone(),
            binding.external_room_id.clone(),
        );
        if let Some(existing_id) = self.room_bindings_by_tuple.get(&tuple_key) {
            return self.room_bindings.get(existing_id.value()).map(|b| b.clone()).expect("binding index consistent");
        }
        self.room_bindings_by_tuple.insert(tuple_key, binding.id.clone());
        self.room_bindings_by_room
            .entry(binding.room_id.clone())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(binding.id.clone());
        self.room_bindings.insert(binding.id.clone(), binding.clone());
        binding
    }

    async fn list_room_bindings(&self, room_id: &str) -> Vec<RoomBinding> {
        let Some(ids) = self.room_bindings_by_room.get(room_id) else {
            return Vec::new();
        };
        ids.lock().iter().filter_map(|id| self.room_bindings.get(id).map(|b| b.clone())).collect()
    }

    async fn delete_room_binding(&self, id: &str) -> bool {
        let Some((_, binding)) = self.room_bindings.remove(id) else {
            return false;
        };
        let tuple_key = (binding.room_id.clone(), binding.channel.clone(), binding.instance_id.clone(), binding.external_room_id.clone());
        self.room_bindings_by_tuple.remove(&tuple_key);
        if let Some(ids) = self.room_bindings_by_room.get(&binding.room_id) {
            ids.lock().retain(|existing| existing != id);
        }
        true
    }

    async fn get_bridge_config(&self, id: &str) -> Option<BridgeConfig> {
        self.bridge_configs.get(id).map(|c| c.clone())
    }

    async fn put_bridge_config_raw(&self, config: BridgeConfig) -> BridgeConfig {
        self.bridge_configs.insert(config.id.clone(), config.clone());
        config
    }

    async fn list_bridge_configs(&self, enabled: Option<bool>) -> Vec<BridgeConfig> {
        let mut configs: Vec<BridgeConfig> = self
            .bridge_configs
            .iter()
            .filter(|entry| enabled.map(|want| entry.value().enabled == want).unwrap_or(true))
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    async fn get_routing_policy(&self, room_id: &str) -> Option<RoutingPolicy> {
        self.routing_policies.get(room_id).map(|p| p.clone())
    }

    async fn put_routing_policy_raw(&self, policy: RoutingPolicy) -> RoutingPolicy {
        self.routing_policies.insert(policy.room_id.clone(), policy.clone());
        policy
    }

    async fn save_dead_letter(&self, dead_letter: DeadLetter) -> DeadLetter {
        self.dead_letters.insert(dead_letter.id.clone(), dead_letter.clone());
        dead_letter
    }

    async fn get_dead_letter(&self, id: &str) -> Option<DeadLetter> {
        self.dead_letters.get(id).map(|d| d.clone())
    }

    async fn update_dead_letter(&self, dead_letter: DeadLetter) -> DeadLetter {
        self.dead_letters.insert(dead_letter.id.clone(), dead_letter.clone());
        dead_letter
    }

    async fn delete_dead_letter(&self, id: &str) -> bool {
        self.dead_letters.remove(id).is_some()
    }

    async fn save_onboarding(&self, flow: OnboardingFlow) -> OnboardingFlow {
        self.onboarding_flows.insert(flow.onboarding_id.clone(), flow.clone());
        flow
    }

    async fn get_onboarding(&self, onboarding_id: &str) -> Option<OnboardingFlow> {
        self.onboarding_flows.get(onboarding_id).map(|f| f.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jm_core::entities::{BindingDirection, MessageRole, MessageStatus};
    use std::collections::HashSet;

    fn message_fixture(id: &str, room_id: &str) -> Message {
        Message {
            id: id.to_string(),
            room_id: room_id.to_string(),
            sender_id: "participant-1".to_string(),
            role: MessageRole::User,
            content: vec![],
            external_id: None,
            reply_to_id: None,
            thread_root_id: None,
            status: MessageStatus::Sent,
            reactions: Default::default(),
            receipts: Default::default(),
            metadata: Default::default(),
            inserted_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_or_create_room_is_idempotent_for_repeated_calls() {
        let storage = InMemoryStorage::new();
        let first = storage
            .get_or_create_room_by_external_binding("telegram", "bridge_tg", "chat_42", RoomType::Direct, None)
            .await;
        let second = storage
            .get_or_create_room_by_external_binding("telegram", "bridge_tg", "chat_42", RoomType::Direct, None)
            .await;
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_resolves_to_one_room() {
        let storage = std::sync::Arc::new(InMemoryStorage::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .get_or_create_room_by_external_binding("telegram", "bridge_tg", "chat_race", RoomType::Direct, None)
                    .await
                    .id
            }));
        }
        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn get_messages_returns_chronological_order_capped_at_limit() {
        let storage = InMemoryStorage::new();
        for i in 0..5 {
            let mut message = message_fixture(&format!("m{i}"), "room-1");
            message.inserted_at = chrono::Utc::now() + chrono::Duration::milliseconds(i);
            storage.save_message(message).await;
        }
        let page = storage.get_messages("room-1", 3).await;
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].id, "m2");
        assert_eq!(page[2].id, "m4");
    }

    #[tokio::test]
    async fn duplicate_room_binding_tuple_returns_existing() {
        let storage = InMemoryStorage::new();
        let binding = RoomBinding {
            id: "b1".into(),
            room_id: "room-1".into(),
            channel: "telegram".into(),
            instance_id: "bridge_tg".into(),
            bridge_id: None,
            external_room_id: "chat_42".into(),
            direction: BindingDirection::Both,
        };
        let first = storage.create_room_binding(binding.clone()).await;
        let mut duplicate = binding;
        duplicate.id = "b2".into();
        let second = storage.create_room_binding(duplicate).await;
        assert_eq!(first.id, second.id);
        assert_eq!(storage.list_room_bindings("room-1").await.len(), 1);
    }
}
