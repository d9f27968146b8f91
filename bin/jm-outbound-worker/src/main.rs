//! Standalone outbound process (§4.5, §4.6, §4.8).
//!
//! Runs the partitioned outbound gateway and the dead-letter replay worker
//! pool with no inbound HTTP surface — `jm-webhook-server` owns ingest and
//! instance supervision; this process only needs read access to shared
//! storage and a registry of adapters capable of sending. As with the
//! webhook entry, no concrete platform codec ships here (§2 non-goals):
//! with an empty adapter factory map every bridge manifest degrades and
//! outbound dispatch fails closed with `unknown_adapter_module` per
//! attempt, which is safe but not useful standalone — real deployments
//! relink this binary against their own adapter crates.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use jm_config::AppConfig;
use jm_core::signals::{SignalBus, TracingSignalHandler};
use jm_deadletter::{DeadLetterStore, ReplayWorkerPool, ReplayWorkerPoolConfig};
use jm_outbound::{
    AdapterResolver, DegradedAction, GatewayConfig, OutboundGateway, PressureThresholds, ShedAction,
    UnsupportedMediaPolicy,
};
use jm_registry::{AdapterFactory, BootstrapInput, BridgeRegistry, CollisionPolicy};
use jm_security::{ReferenceSanitizer, SanitizeTimeoutPolicy};
use jm_storage::{InMemoryStorage, Storage};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jm_core::logging::init_logging("jm-outbound-worker");
    info!("starting jido-messaging outbound worker");

    let config = AppConfig::load()?;

    let signals = SignalBus::new();
    signals.register("", Arc::new(TracingSignalHandler));

    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let registry = Arc::new(BridgeRegistry::new());

    let factories: HashMap<String, AdapterFactory> = HashMap::new();
    let collision_policy = CollisionPolicy::parse(&config.registry.collision_policy).unwrap_or(CollisionPolicy::PreferLast);
    let report = jm_registry::bootstrap(
        &registry,
        &factories,
        BootstrapInput {
            manifest_paths: config.registry.manifest_paths.clone(),
            collision_policy,
            required_bridges: config.registry.required_bridges.iter().cloned().collect(),
            clear_existing: config.registry.clear_existing,
        },
        &signals,
    )?;
    info!(loaded = ?report.loaded, collisions = report.collisions.len(), "bridge manifests bootstrapped");
    for diagnostic in &report.diagnostics {
        warn!(?diagnostic, "bridge manifest degraded");
    }

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
    info!(partitions = gateway.partition_count(), "outbound gateway started");

    let replay_pool = Arc::new(ReplayWorkerPool::new(
        ReplayWorkerPoolConfig { partition_count: config.deadletter.replay_partition_count, queue_capacity: 1000 },
        dead_letters.clone(),
        gateway.clone(),
        signals.clone(),
    ));
    info!(partitions = replay_pool.partition_count(), "dead-letter replay pool started");

    let health_addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let health_app = axum::Router::new()
        .route("/healthz", axum::routing::get(healthz))
        .with_state(gateway.clone());
    let listener = tokio::net::TcpListener::bind(health_addr).await?;
    info!(%health_addr, "health endpoint listening");

    axum::serve(listener, health_app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("jm-outbound-worker stopped");
    Ok(())
}

async fn healthz(axum::extract::State(gateway): axum::extract::State<Arc<OutboundGateway>>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "up",
        "partitions": gateway.partition_count(),
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
