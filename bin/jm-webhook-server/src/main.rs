//! Webhook entry process (§4.11, §6.4, §4.10).
//!
//! Hosts the HTTP webhook surface and, for every bridge the manifest
//! bootstrap loads, an [`jm_instance::InstanceSupervisor`]. No concrete
//! platform codec ships with this binary (§2 non-goals) — `adapter_module`
//! names in the manifests listed under `[registry] manifest_paths` are
//! resolved against a factory map that callers of this binary populate by
//! rebuilding it with their own adapter crates linked in. With an empty
//! factory map (the default), every manifest degrades to "unknown adapter
//! module" and the process still starts with zero bridges, exposing only
//! `/healthz` — useful as a liveness check while platform adapters are
//! rolled out bridge by bridge.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use jm_config::AppConfig;
use jm_core::adapter::BridgeAdapter;
use jm_core::signals::{SignalBus, TracingSignalHandler};
use jm_dedupe::DedupeSet;
use jm_ingest::{IngestConfig, IngestPipeline};
use jm_instance::{InstanceManagerConfig, InstanceSupervisor};
use jm_policy::PolicyTimeoutFallback;
use jm_registry::{AdapterFactory, BootstrapInput, BridgeRegistry, CollisionPolicy};
use jm_security::VerifyTimeoutPolicy;
use jm_storage::{InMemoryStorage, Storage};
use jm_webhook::http::create_router;
use jm_webhook::WebhookDeps;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jm_core::logging::init_logging("jm-webhook-server");
    info!("starting jido-messaging webhook entry");

    let config = AppConfig::load()?;

    let signals = SignalBus::new();
    signals.register("", Arc::new(TracingSignalHandler));

    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let dedupe = Arc::new(DedupeSet::new());
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

    let instance_config = InstanceManagerConfig {
        reconnect_base_backoff_ms: config.instance.reconnect_base_backoff_ms,
        reconnect_max_backoff_ms: config.instance.reconnect_max_backoff_ms,
        reconnect_jitter_ratio: config.instance.reconnect_jitter_ratio,
        max_reconnect_attempts: config.instance.max_reconnect_attempts,
        max_consecutive_failures: config.instance.max_consecutive_failures,
    };
    let mut supervisors = Vec::new();
    for bridge_id in &report.loaded {
        let Some(config_entry) = storage.get_bridge_config(bridge_id).await else { continue };
        if !config_entry.enabled {
            continue;
        }
        let Some(adapter): Option<Arc<dyn BridgeAdapter>> = registry.get_adapter(bridge_id) else { continue };
        let supervisor = InstanceSupervisor::new(bridge_id.clone(), adapter, instance_config, signals.clone());
        supervisor.start();
        supervisors.push(supervisor);
    }
    info!(count = supervisors.len(), "instance supervisors started");

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

    let webhook_deps = Arc::new(WebhookDeps {
        registry: registry.clone(),
        storage: storage.clone(),
        dedupe: dedupe.clone(),
        ingest: ingest.clone(),
        dedupe_ttl_ms: config.dedupe.default_ttl_ms,
    });

    let app = create_router(webhook_deps, config.http.request_timeout_ms, config.http.max_body_bytes, &config.http.cors_origins);
    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    info!(%addr, "webhook surface listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    for supervisor in &supervisors {
        supervisor.shutdown();
    }
    info!("jm-webhook-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
