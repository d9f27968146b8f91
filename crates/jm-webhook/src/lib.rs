//! Webhook entry (§4.11): `route_payload` / `route_webhook` resolve a
//! bridge, run it through the adapter's event parsing, dedupe, and hand
//! anything message-shaped to ingest.
//!
//! `route_webhook` is `route_payload` plus the signature-verification step
//! that only applies to a raw inbound HTTP request; both converge on
//! `route_event` once a `ParsedEvent` has been produced.

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use jm_core::adapter::ParsedEvent;
use jm_core::entities::Message;
use jm_core::error::{FabricError, Reason};
use jm_dedupe::{dedupe_key, DedupeOutcome, DedupeSet};
use jm_ingest::{IngestContext, IngestPipeline};
use jm_registry::BridgeRegistry;
use jm_storage::Storage;

#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Noop,
    Event(serde_json::Value),
    Duplicate(serde_json::Value),
    Message { message: Message, context: IngestContext },
}

#[derive(Debug)]
pub enum WebhookError {
    BridgeNotFound,
    BridgeDisabled,
    MissingInstanceModule,
    InvalidSignature,
    Ingest(FabricError),
}

impl From<FabricError> for WebhookError {
    fn from(err: FabricError) -> Self {
        WebhookError::Ingest(err)
    }
}

pub struct WebhookDeps {
    pub registry: Arc<BridgeRegistry>,
    pub storage: Arc<dyn Storage>,
    pub dedupe: Arc<DedupeSet>,
    pub ingest: Arc<IngestPipeline>,
    pub dedupe_ttl_ms: u64,
}

/// §4.11 step 1: resolve the bridge config and its adapter, or fail with
/// the reasons the webhook surface maps to HTTP (§6.4).
async fn resolve_bridge(deps: &WebhookDeps, bridge_id: &str) -> Result<Arc<dyn jm_core::adapter::BridgeAdapter>, WebhookError> {
    let config = deps.storage.get_bridge_config(bridge_id).await.ok_or(WebhookError::BridgeNotFound)?;
    if !config.enabled {
        return Err(WebhookError::BridgeDisabled);
    }
    deps.registry.get_adapter(bridge_id).ok_or(WebhookError::MissingInstanceModule)
}

/// `route_payload(instance_module, bridge_id, payload, opts)` (§4.11): the
/// non-webhook entry point, used when a caller already has a normalized
/// payload and no raw request to verify (e.g. a replay or an internal
/// re-submission).
pub async fn route_payload(deps: &WebhookDeps, bridge_id: &str, payload: &serde_json::Value) -> Result<WebhookOutcome, WebhookError> {
    let adapter = resolve_bridge(deps, bridge_id).await?;
    route_event(deps, bridge_id, adapter, payload).await
}

/// `route_webhook(instance_module, bridge_id, request, opts)` (§4.11): the
/// HTTP webhook entry point. Identical to `route_payload` except it runs
/// `verify_webhook` against the raw request first.
pub async fn route_webhook(
    deps: &WebhookDeps,
    bridge_id: &str,
    raw_body: &[u8],
    headers: &HashMap<String, String>,
    payload: &serde_json::Value,
) -> Result<WebhookOutcome, WebhookError> {
    let adapter = resolve_bridge(deps, bridge_id).await?;
    if adapter.has_capability(jm_core::adapter::Capability::VerifyWebhook) {
        adapter.verify_webhook(raw_body, headers).map_err(|reason| match reason {
            Reason::InvalidSignature => WebhookError::InvalidSignature,
            _ => WebhookError::InvalidSignature,
        })?;
    }
    route_event(deps, bridge_id, adapter, payload).await
}

async fn route_event(
    deps: &WebhookDeps,
    bridge_id: &str,
    adapter: Arc<dyn jm_core::adapter::BridgeAdapter>,
    payload: &serde_json::Value,
) -> Result<WebhookOutcome, WebhookError> {
    let parsed = adapter.parse_event(payload).map_err(|_| WebhookError::MissingInstanceModule)?;

    let incoming = match parsed {
        ParsedEvent::Noop => return Ok(WebhookOutcome::Noop),
        ParsedEvent::Event(envelope) => return Ok(WebhookOutcome::Event(envelope)),
        ParsedEvent::Message(incoming) => incoming,
    };

    let channel = adapter.channel_type().to_string();

    if let Some(external_message_id) = incoming.external_message_id.as_deref() {
        let key = dedupe_key(&channel, bridge_id, external_message_id);
        if deps.dedupe.check_and_mark(&key, deps.dedupe_ttl_ms) == DedupeOutcome::Duplicate {
            return Ok(WebhookOutcome::Duplicate(payload.clone()));
        }
    }

    let (message, context) = deps.ingest.ingest_incoming(&channel, bridge_id, &incoming, payload).await?;
    Ok(WebhookOutcome::Message { message, context })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jm_core::adapter::{BridgeAdapter, Capability, Incoming, SendResult};
    use jm_core::entities::BridgeConfig;
    use jm_core::signals::SignalBus;
    use jm_ingest::IngestConfig;
    use jm_registry::BridgeManifest;
    use jm_storage::InMemoryStorage;
    use std::collections::HashSet;

    struct StubAdapter {
        verify_ok: bool,
        declare_verify: bool,
    }

    #[async_trait]
    impl BridgeAdapter for StubAdapter {
        fn channel_type(&self) -> &str {
            "telegram"
        }

        fn capabilities(&self) -> Vec<Capability> {
            if self.declare_verify {
                vec![Capability::VerifyWebhook]
            } else {
                Vec::new()
            }
        }

        fn transform_incoming(&self, payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Ok(Incoming {
                external_room_id: payload["room"].as_str().unwrap_or("room-1").to_string(),
                external_user_id: payload["user"].as_str().unwrap_or("user-1").to_string(),
                external_message_id: payload["id"].as_str().map(str::to_string),
                external_reply_to_id: None,
                text: payload["text"].as_str().map(str::to_string),
                username: None,
                display_name: None,
                chat_type: Some("group".to_string()),
                timestamp: Some(chrono::Utc::now()),
                raw: payload.clone(),
            })
        }

        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<SendResult, Reason> {
            Ok(SendResult { message_id: "sent-1".to_string() })
        }

        fn verify_webhook(&self, _raw_body: &[u8], _headers: &HashMap<String, String>) -> Result<(), Reason> {
            if self.verify_ok {
                Ok(())
            } else {
                Err(Reason::InvalidSignature)
            }
        }
    }

    fn bridge_config(id: &str, enabled: bool) -> BridgeConfig {
        BridgeConfig {
            id: id.to_string(),
            adapter_module: "stub".to_string(),
            enabled,
            capabilities: HashSet::new(),
            opts: serde_json::Map::new(),
            delivery_policy: None,
            revision: 1,
            label: None,
        }
    }

    async fn deps_with(adapter: StubAdapter, bridge_id: &str, enabled: bool) -> WebhookDeps {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.put_bridge_config_raw(bridge_config(bridge_id, enabled)).await;

        let registry = Arc::new(BridgeRegistry::new());
        registry.register(
            BridgeManifest { id: bridge_id.to_string(), adapter_module: "stub".to_string(), label: None, capabilities: vec![], secondary_adapters: Default::default() },
            Arc::new(adapter),
        );

        let ingest = Arc::new(IngestPipeline::new(storage.clone(), vec![], vec![], None, IngestConfig::default(), SignalBus::new()));

        WebhookDeps { registry, storage, dedupe: Arc::new(DedupeSet::new()), ingest, dedupe_ttl_ms: 60_000 }
    }

    #[tokio::test]
    async fn unknown_bridge_is_bridge_not_found() {
        let deps = deps_with(StubAdapter { verify_ok: true, declare_verify: false }, "bridge_a", true).await;
        let err = route_payload(&deps, "bridge_missing", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, WebhookError::BridgeNotFound));
    }

    #[tokio::test]
    async fn disabled_bridge_is_bridge_disabled() {
        let deps = deps_with(StubAdapter { verify_ok: true, declare_verify: false }, "bridge_a", false).await;
        let err = route_payload(&deps, "bridge_a", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, WebhookError::BridgeDisabled));
    }

    #[tokio::test]
    async fn message_payload_ingests_and_returns_message() {
        let deps = deps_with(StubAdapter { verify_ok: true, declare_verify: false }, "bridge_a", true).await;
        let outcome = route_payload(&deps, "bridge_a", &serde_json::json!({"room": "r1", "user": "u1", "id": "m1", "text": "hi"})).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Message { .. }));
    }

    #[tokio::test]
    async fn repeated_external_message_id_is_a_duplicate() {
        let deps = deps_with(StubAdapter { verify_ok: true, declare_verify: false }, "bridge_a", true).await;
        let payload = serde_json::json!({"room": "r1", "user": "u1", "id": "m1", "text": "hi"});
        route_payload(&deps, "bridge_a", &payload).await.unwrap();
        let second = route_payload(&deps, "bridge_a", &payload).await.unwrap();
        assert!(matches!(second, WebhookOutcome::Duplicate(_)));
    }

    #[tokio::test]
    async fn failed_signature_verification_surfaces_as_invalid_signature() {
        let deps = deps_with(StubAdapter { verify_ok: false, declare_verify: true }, "bridge_a", true).await;
        let err = route_webhook(&deps, "bridge_a", b"{}", &HashMap::new(), &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[tokio::test]
    async fn verify_webhook_is_skipped_when_not_declared() {
        let deps = deps_with(StubAdapter { verify_ok: false, declare_verify: false }, "bridge_a", true).await;
        let outcome = route_webhook(&deps, "bridge_a", b"{}", &HashMap::new(), &serde_json::json!({"room": "r1", "user": "u1", "id": "m2", "text": "hi"})).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Message { .. }));
    }
}
