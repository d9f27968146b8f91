//! jido-messaging development monolith.
//!
//! Wires every crate in the workspace into one process: in-memory
//! storage, dedupe, bridge registry (with a reference `EchoAdapter`
//! registered under `bridge_echo`), the ingest pipeline, the outbound
//! gateway + router, the session manager, dead-letter store + replay
//! workers, the onboarding FSM, and the webhook HTTP surface. Unlike the
//! other two binaries, this one also runs a short self-test on startup
//! that exercises inbound -> outbound end to end, purely for manual
//! smoke testing (§2 non-goals: no concrete platform codec backs any of
//! this in production).

mod echo_adapter;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use echo_adapter::EchoAdapter;
use jm_config::AppConfig;
use jm_core::adapter::BridgeAdapter;
use jm_core::entities::{BindingDirection, BridgeConfig, RoomBinding};
use jm_core::signals::{SignalBus, TracingSignalHandler};
use jm_deadletter::DeadLetterStore;
use jm_dedupe::DedupeSet;
use jm_ingest::{IngestConfig, IngestPipeline};
use jm_onboarding::OnboardingManager;
use jm_outbound::{
    AdapterResolver, DegradedAction, GatewayConfig, Operation, OutboundGateway, OutboundOptions,
    OutboundPayload, PressureThresholds, ShedAction, UnsupportedMediaPolicy,
};
use jm_policy::PolicyTimeoutFallback;
use jm_registry::{BridgeManifest, BridgeRegistry};
use jm_security::{ReferenceSanitizer, SanitizeTimeoutPolicy, VerifyTimeoutPolicy};
use jm_session::{SessionManager, SessionManagerConfig};
use jm_storage::{InMemoryStorage, Storage};
use jm_webhook::http::create_router;
use jm_webhook::WebhookDeps;
use tracing::info;

const DEMO_BRIDGE_ID: &str = "bridge_echo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jm_core::logging::init_logging("jm-dev");
    info!("starting jido-messaging dev monolith");

    let config = AppConfig::load()?;

    let signals = SignalBus::new();
    signals.register("", Arc::new(TracingSignalHandler));

    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let dedupe = Arc::new(DedupeSet::new());

    let registry = Arc::new(BridgeRegistry::new());
    registry.register(
        BridgeManifest {
            id: DEMO_BRIDGE_ID.to_string(),
            adapter_module: "echo_adapter".to_string(),
            label: Some("Reference echo bridge".to_string()),
            capabilities: EchoAdapter.capabilities(),
            secondary_adapters: Default::default(),
        },
        Arc::new(EchoAdapter),
    );
    storage
        .put_bridge_config_raw(BridgeConfig {
            id: DEMO_BRIDGE_ID.to_string(),
            adapter_module: "echo_adapter".to_string(),
            enabled: true,
            capabilities: HashSet::from(["check_health".to_string()]),
            opts: Default::default(),
            delivery_policy: None,
            revision: 1,
            label: Some("Reference echo bridge".to_string()),
        })
        .await;

    let ingest = Arc::new(IngestPipeline::new(
        storage.clone(),
        Vec::new(),
        Vec::new(),
        None,
        IngestConfig {
            gating_timeout_ms: config.policy.gating_timeout_ms,
            moderation_timeout_ms: config.policy.moderation_timeout_ms,
            verify_sender_timeout_ms: config.policy.security_timeout_ms,
            policy_timeout_fallback: PolicyTimeoutFallback::parse(&config.policy.policy_timeout_fallback).unwrap_or(PolicyTimeoutFallback::Deny),
            verify_timeout_fallback: VerifyTimeoutPolicy::parse(&config.policy.policy_timeout_fallback).unwrap_or(VerifyTimeoutPolicy::Deny),
        },
        signals.clone(),
    ));

    let dead_letters = Arc::new(DeadLetterStore::new(storage.clone(), config.deadletter.max_records, signals.clone()));

    let gateway_config = GatewayConfig {
        partition_count: config.outbound.partition_count,
        queue_capacity: config.outbound.queue_capacity,
        thresholds: PressureThresholds {
            warn_ratio: config.outbound.warn_ratio,
            degraded_ratio: config.outbound.degraded_ratio,
            shed_ratio: config.outbound.shed_ratio,
        },
        degraded_throttle_ms: config.outbound.degraded_throttle_ms,
        shed_action: ShedAction::parse(&config.outbound.shed_action).unwrap_or(ShedAction::Reject),
        degraded_action: DegradedAction::parse(&config.outbound.degraded_action).unwrap_or(DegradedAction::Throttle),
        sent_cache_capacity: config.outbound.sent_cache_capacity,
        sent_cache_ttl_ms: config.outbound.sent_cache_ttl_ms,
        max_attempts: config.outbound.max_attempts,
        base_backoff_ms: config.outbound.base_backoff_ms,
        max_backoff_ms: config.outbound.max_backoff_ms,
        adapter_timeout_ms: config.outbound.adapter_timeout_ms,
        unsupported_media_policy: UnsupportedMediaPolicy::parse(&config.outbound.unsupported_media_policy).unwrap_or(UnsupportedMediaPolicy::FallbackText),
        sanitize_timeout_fallback: SanitizeTimeoutPolicy::parse(&config.policy.sanitize_timeout_fallback).unwrap_or(SanitizeTimeoutPolicy::AllowOriginal),
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(OutboundGateway::with_sanitizer_and_dead_letters(
        gateway_config,
        registry.clone() as Arc<dyn AdapterResolver>,
        Arc::new(ReferenceSanitizer),
        Some(dead_letters.clone() as Arc<dyn jm_outbound::DeadLetterSink>),
        signals.clone(),
    ));

    let _replay_pool = jm_deadletter::ReplayWorkerPool::new(
        jm_deadletter::ReplayWorkerPoolConfig { partition_count: config.deadletter.replay_partition_count, queue_capacity: 1000 },
        dead_letters.clone(),
        gateway.clone(),
        signals.clone(),
    );

    let sessions = Arc::new(SessionManager::new(
        SessionManagerConfig {
            partition_count: config.session.partition_count,
            max_entries_per_partition: config.session.max_entries_per_partition,
            default_ttl_ms: config.session.default_ttl_ms as i64,
            prune_interval_ms: config.session.prune_interval_ms,
        },
        signals.clone(),
    ));

    let onboarding = Arc::new(OnboardingManager::new(storage.clone(), signals.clone()));

    let webhook_deps = Arc::new(WebhookDeps {
        registry: registry.clone(),
        storage: storage.clone(),
        dedupe: dedupe.clone(),
        ingest: ingest.clone(),
        dedupe_ttl_ms: config.dedupe.default_ttl_ms,
    });

    tokio::spawn(run_self_test(webhook_deps.clone(), storage.clone(), gateway.clone(), sessions.clone(), onboarding.clone()));

    let app = create_router(webhook_deps, config.http.request_timeout_ms, config.http.max_body_bytes, &config.http.cors_origins);
    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    info!(%addr, "webhook surface listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("jm-dev stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Exercises the fabric end to end once, a few seconds after startup:
/// ingest a message through `bridge_echo`, bind its room for outbound
/// delivery, route a reply back out, cache the route in the session
/// manager, and drive a short onboarding flow. Purely illustrative.
async fn run_self_test(
    deps: Arc<WebhookDeps>,
    storage: Arc<dyn Storage>,
    gateway: Arc<OutboundGateway>,
    sessions: Arc<SessionManager>,
    onboarding: Arc<OnboardingManager>,
) {
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let payload = serde_json::json!({"room": "demo-room", "user": "demo-user", "id": "demo-msg-1", "text": "hello from jm-dev"});
    let outcome = match jm_webhook::route_payload(&deps, DEMO_BRIDGE_ID, &payload).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(?err, "self-test ingest failed");
            return;
        }
    };

    let jm_webhook::WebhookOutcome::Message { message, .. } = outcome else {
        tracing::warn!("self-test ingest produced a non-message outcome");
        return;
    };
    info!(message_id = %message.id, room_id = %message.room_id, "self-test: ingested demo message");

    storage
        .create_room_binding(RoomBinding {
            id: format!("binding-{}", message.room_id),
            room_id: message.room_id.clone(),
            channel: "echo".to_string(),
            instance_id: DEMO_BRIDGE_ID.to_string(),
            bridge_id: Some(DEMO_BRIDGE_ID.to_string()),
            external_room_id: "demo-room".to_string(),
            direction: BindingDirection::Both,
        })
        .await;

    match jm_outbound::route_outbound(&message.room_id, Operation::SendMessage, OutboundPayload::Text("echo: hello back".to_string()), OutboundOptions::default(), storage.as_ref(), gateway.as_ref()).await
    {
        Ok(route_outcome) => info!(delivered = ?route_outcome.delivered, failed = ?route_outcome.failed, "self-test: routed reply"),
        Err(err) => tracing::warn!(?err, "self-test: outbound routing failed"),
    }

    let session_key = jm_core::entities::SessionKey::new("echo", DEMO_BRIDGE_ID, message.room_id.clone(), None);
    sessions.set(session_key.clone(), jm_core::entities::SessionRoute { external_room_id: "demo-room".to_string(), bridge_id: Some(DEMO_BRIDGE_ID.to_string()), extra: Default::default() }, 60_000);
    if let Ok(resolved) = sessions.resolve(&session_key, &[]) {
        info!(external_room_id = %resolved.route.external_room_id, "self-test: session route resolved");
    }

    let flow = onboarding.start("demo-onboarding").await;
    info!(status = ?flow.status, "self-test: onboarding started");
    if let Ok(outcome) = onboarding.advance("demo-onboarding", "resolve_directory", serde_json::json!({}), Some("demo-key-1".to_string())).await {
        info!(status = ?outcome.flow.status, idempotent = outcome.transition_idempotent, "self-test: onboarding advanced");
    }

    // Sending the same external message id again demonstrates dedupe.
    match jm_webhook::route_payload(&deps, DEMO_BRIDGE_ID, &payload).await {
        Ok(jm_webhook::WebhookOutcome::Duplicate(_)) => info!("self-test: second ingest correctly reported as a duplicate"),
        other => tracing::warn!(?other, "self-test: expected a duplicate on re-ingest"),
    }
}
