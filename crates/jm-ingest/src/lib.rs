//! External payload → canonical `Message` pipeline (§4.4).
//!
//! `ingest_incoming` is the single entry point: upsert room/participant,
//! build the canonical message, run gating → moderation → verify_sender,
//! persist, and emit `message.received`. Any denial along the way leaves
//! the message unpersisted and unsignaled; the room/participant upserts
//! that already ran stay in place since they're idempotent by
//! construction (§4.4).

use std::sync::Arc;

use jm_core::adapter::{chat_type_to_room_type, Incoming};
use jm_core::entities::{ContentBlock, Message, MessageRole, MessageStatus, Participant, Room};
use jm_core::error::FabricError;
use jm_core::signals::{measurements, metadata, SignalBus};
use jm_policy::gating::{run_gating, GatingContext, GatingModule};
use jm_policy::moderation::{run_moderation, ModerationModule};
use jm_policy::PolicyTimeoutFallback;
use jm_security::{verify_sender, SenderVerifier, VerifyTimeoutPolicy};
use jm_storage::Storage;
use serde_json::json;

#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub gating_timeout_ms: u64,
    pub moderation_timeout_ms: u64,
    pub verify_sender_timeout_ms: u64,
    pub policy_timeout_fallback: PolicyTimeoutFallback,
    pub verify_timeout_fallback: VerifyTimeoutPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            gating_timeout_ms: 2_000,
            moderation_timeout_ms: 2_000,
            verify_sender_timeout_ms: 2_000,
            policy_timeout_fallback: PolicyTimeoutFallback::Deny,
            verify_timeout_fallback: VerifyTimeoutPolicy::Deny,
        }
    }
}

/// Everything resolved while handling one incoming event, returned
/// alongside the persisted `Message` on success (§4.4).
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub room: Room,
    pub participant: Participant,
    pub channel: String,
    pub instance_id: String,
    pub external_room_id: String,
    pub bridge_id: String,
    pub chat_type: Option<String>,
    pub was_mentioned: Option<bool>,
}

pub struct IngestPipeline {
    storage: Arc<dyn Storage>,
    gating_modules: Vec<Arc<dyn GatingModule>>,
    moderation_modules: Vec<Arc<dyn ModerationModule>>,
    verifier: Option<Arc<dyn SenderVerifier>>,
    config: IngestConfig,
    signals: SignalBus,
}

impl IngestPipeline {
    pub fn new(
        storage: Arc<dyn Storage>,
        gating_modules: Vec<Arc<dyn GatingModule>>,
        moderation_modules: Vec<Arc<dyn ModerationModule>>,
        verifier: Option<Arc<dyn SenderVerifier>>,
        config: IngestConfig,
        signals: SignalBus,
    ) -> Self {
        Self { storage, gating_modules, moderation_modules, verifier, config, signals }
    }

    /// The §4.4 pipeline, in its documented order.
    pub async fn ingest_incoming(
        &self,
        channel: &str,
        instance_id: &str,
        incoming: &Incoming,
        raw_payload: &serde_json::Value,
    ) -> Result<(Message, IngestContext), FabricError> {
        let room_type = chat_type_to_room_type(incoming.chat_type.as_deref());
        let room = self
            .storage
            .get_or_create_room_by_external_binding(channel, instance_id, &incoming.external_room_id, room_type, None)
            .await;
        let participant = self.storage.get_or_create_participant_by_external_id(channel, &incoming.external_user_id).await;

        let reply_to_id = match incoming.external_reply_to_id.as_deref() {
            Some(external_reply_to_id) => {
                self.storage.find_message_by_external_id(channel, instance_id, external_reply_to_id).await.map(|m| m.id)
            }
            None => None,
        };

        let content = match incoming.text.as_deref() {
            Some(text) => vec![ContentBlock::Text { text: text.to_string() }],
            None => Vec::new(),
        };

        let mut message_metadata = serde_json::Map::new();
        message_metadata.insert("channel".to_string(), json!(channel));
        message_metadata.insert("bridge_id".to_string(), json!(instance_id));
        if let Some(timestamp) = incoming.timestamp {
            message_metadata.insert("timestamp".to_string(), json!(timestamp));
        }

        let mut message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room.id.clone(),
            sender_id: participant.id.clone(),
            role: MessageRole::User,
            content,
            external_id: incoming.external_message_id.clone(),
            reply_to_id,
            thread_root_id: None,
            status: MessageStatus::Sent,
            reactions: Default::default(),
            receipts: Default::default(),
            metadata: message_metadata,
            inserted_at: chrono::Utc::now(),
        };

        let gating_context = GatingContext {
            channel: channel.to_string(),
            instance_id: instance_id.to_string(),
            room_id: room.id.clone(),
            participant_id: participant.id.clone(),
            external_user_id: incoming.external_user_id.clone(),
            chat_type: incoming.chat_type.clone(),
        };
        run_gating(&self.gating_modules, &gating_context, self.config.gating_timeout_ms, self.config.policy_timeout_fallback, &self.signals).await?;

        message = run_moderation(&self.moderation_modules, message, self.config.moderation_timeout_ms, self.config.policy_timeout_fallback, &self.signals).await?;

        verify_sender(
            self.verifier.as_deref(),
            incoming,
            raw_payload,
            self.config.verify_sender_timeout_ms,
            self.config.verify_timeout_fallback,
            &self.signals,
        )
        .await?;
        message.set_metadata("security", json!({"verify": {"decision": "ok"}}));

        let saved = self.storage.save_message(message).await;

        let mut meta = metadata();
        meta.insert("room_id".into(), saved.room_id.clone().into());
        meta.insert("message_id".into(), saved.id.clone().into());
        meta.insert("channel".into(), channel.into());
        meta.insert("bridge_id".into(), instance_id.into());
        self.signals.emit("message.received", measurements(), meta);

        let context = IngestContext {
            room,
            participant,
            channel: channel.to_string(),
            instance_id: instance_id.to_string(),
            external_room_id: incoming.external_room_id.clone(),
            bridge_id: instance_id.to_string(),
            chat_type: incoming.chat_type.clone(),
            was_mentioned: None,
        };

        Ok((saved, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use jm_policy::gating::GatingDecision;
    use jm_policy::moderation::ModerationDecision;
    use jm_security::VerifyOutcome;
    use jm_storage::InMemoryStorage;

    fn sample_incoming(room: &str, user: &str, msg_id: &str, text: &str) -> Incoming {
        Incoming {
            external_room_id: room.to_string(),
            external_user_id: user.to_string(),
            external_message_id: Some(msg_id.to_string()),
            external_reply_to_id: None,
            text: Some(text.to_string()),
            username: None,
            display_name: None,
            chat_type: Some("group".to_string()),
            timestamp: Some(Utc::now()),
            raw: json!({}),
        }
    }

    fn pipeline(
        storage: Arc<dyn Storage>,
        gating: Vec<Arc<dyn GatingModule>>,
        moderation: Vec<Arc<dyn ModerationModule>>,
        verifier: Option<Arc<dyn SenderVerifier>>,
    ) -> IngestPipeline {
        IngestPipeline::new(storage, gating, moderation, verifier, IngestConfig::default(), SignalBus::new())
    }

    #[tokio::test]
    async fn happy_path_persists_and_resolves_context() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let pipe = pipeline(storage, vec![], vec![], None);

        let incoming = sample_incoming("chat_42", "u_1", "msg_100", "hello");
        let (message, context) = pipe.ingest_incoming("telegram", "bridge_tg", &incoming, &json!({})).await.unwrap();

        assert_eq!(message.external_id.as_deref(), Some("msg_100"));
        assert_eq!(context.bridge_id, "bridge_tg");
        assert_eq!(context.room.id, message.room_id);
    }

    #[tokio::test]
    async fn reply_resolves_when_the_parent_external_id_exists_in_scope() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let pipe = pipeline(storage.clone(), vec![], vec![], None);

        let first = sample_incoming("chat_42", "u_1", "msg_100", "hello");
        let (parent, _) = pipe.ingest_incoming("telegram", "bridge_tg", &first, &json!({})).await.unwrap();

        let mut reply = sample_incoming("chat_42", "u_2", "msg_101", "hi back");
        reply.external_reply_to_id = Some("msg_100".to_string());
        let (child, _) = pipe.ingest_incoming("telegram", "bridge_tg", &reply, &json!({})).await.unwrap();

        assert_eq!(child.reply_to_id.as_deref(), Some(parent.id.as_str()));
    }

    #[tokio::test]
    async fn reply_to_unknown_external_id_is_nil_not_an_error() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let pipe = pipeline(storage, vec![], vec![], None);

        let mut incoming = sample_incoming("chat_42", "u_1", "msg_100", "hello");
        incoming.external_reply_to_id = Some("missing".to_string());
        let (message, _) = pipe.ingest_incoming("telegram", "bridge_tg", &incoming, &json!({})).await.unwrap();
        assert!(message.reply_to_id.is_none());
    }

    struct AlwaysDenyGating;
    #[async_trait]
    impl GatingModule for AlwaysDenyGating {
        fn name(&self) -> &str {
            "deny_all"
        }
        async fn check(&self, _context: &GatingContext) -> GatingDecision {
            GatingDecision::Deny { reason: "blocked".to_string(), description: None }
        }
    }

    #[tokio::test]
    async fn gating_denial_leaves_message_unpersisted() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let gating: Vec<Arc<dyn GatingModule>> = vec![Arc::new(AlwaysDenyGating)];
        let pipe = pipeline(storage.clone(), gating, vec![], None);

        let incoming = sample_incoming("chat_42", "u_1", "msg_100", "hello");
        let err = pipe.ingest_incoming("telegram", "bridge_tg", &incoming, &json!({})).await.unwrap_err();
        assert!(matches!(err, FabricError::PolicyDenied(_)));
        assert!(storage.find_message_by_external_id("telegram", "bridge_tg", "msg_100").await.is_none());
    }

    struct RejectAll;
    #[async_trait]
    impl ModerationModule for RejectAll {
        fn name(&self) -> &str {
            "reject_all"
        }
        async fn moderate(&self, _message: &Message) -> ModerationDecision {
            ModerationDecision::Reject { reason: "banned_content".to_string(), description: None }
        }
    }

    #[tokio::test]
    async fn moderation_rejection_short_circuits() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let moderation: Vec<Arc<dyn ModerationModule>> = vec![Arc::new(RejectAll)];
        let pipe = pipeline(storage, vec![], moderation, None);

        let incoming = sample_incoming("chat_42", "u_1", "msg_100", "hello");
        let err = pipe.ingest_incoming("telegram", "bridge_tg", &incoming, &json!({})).await.unwrap_err();
        assert!(matches!(err, FabricError::PolicyDenied(_)));
    }

    struct MismatchVerifier;
    #[async_trait]
    impl SenderVerifier for MismatchVerifier {
        async fn verify(&self, _incoming: &Incoming, _raw: &serde_json::Value) -> VerifyOutcome {
            VerifyOutcome::Mismatch { claimed: "someone_else".to_string() }
        }
    }

    #[tokio::test]
    async fn sender_mismatch_denies_via_security() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let pipe = pipeline(storage, vec![], vec![], Some(Arc::new(MismatchVerifier)));

        let incoming = sample_incoming("chat_42", "u_1", "msg_100", "hello");
        let err = pipe.ingest_incoming("telegram", "bridge_tg", &incoming, &json!({})).await.unwrap_err();
        assert!(matches!(err, FabricError::SecurityDenied(_)));
    }

    #[tokio::test]
    async fn room_type_mapping_from_chat_type() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let pipe = pipeline(storage, vec![], vec![], None);

        let mut incoming = sample_incoming("chat_1", "u_1", "m_1", "hi");
        incoming.chat_type = Some("private".to_string());
        let (_, context) = pipe.ingest_incoming("telegram", "bridge_tg", &incoming, &json!({})).await.unwrap();
        assert_eq!(context.room.room_type, jm_core::entities::RoomType::Direct);
    }
}
