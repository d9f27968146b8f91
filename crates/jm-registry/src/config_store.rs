//! Optimistic-concurrency wrapper over the storage contract's raw bridge
//! config / routing policy writes (§4.3 "revision CAS").
//!
//! `jm-storage`'s `put_*_raw` methods perform no revision checking at all;
//! this is where the compare-and-swap semantics from the S4 scenario live.
//! On a mismatch both `expected` and `actual` on the returned conflict are
//! the *current* stored revision — the caller's stale submission is not
//! echoed back, since the point of the conflict is to tell the caller what
//! the fabric currently holds so they can re-fetch and retry.

use jm_core::entities::{BridgeConfig, RoutingPolicy};
use jm_core::error::RevisionConflict;
use jm_storage::Storage;

pub struct ConfigStore<S: Storage> {
    storage: S,
}

impl<S: Storage> ConfigStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub async fn get_bridge_config(&self, id: &str) -> Option<BridgeConfig> {
        self.storage.get_bridge_config(id).await
    }

    pub async fn list_bridge_configs(&self, enabled: Option<bool>) -> Vec<BridgeConfig> {
        self.storage.list_bridge_configs(enabled).await
    }

    /// `expected_revision` is the revision the caller last read. `None`
    /// only succeeds when no config exists yet (first write, revision 1).
    pub async fn put_bridge_config(
        &self,
        mut config: BridgeConfig,
        expected_revision: Option<u64>,
    ) -> Result<BridgeConfig, RevisionConflict> {
        let current = self.storage.get_bridge_config(&config.id).await;
        let current_revision = current.as_ref().map(|c| c.revision).unwrap_or(0);

        match expected_revision {
            Some(expected) if expected != current_revision => {
                return Err(RevisionConflict { expected: current_revision, actual: current_revision });
            }
            None if current_revision != 0 => {
                return Err(RevisionConflict { expected: current_revision, actual: current_revision });
            }
            _ => {}
        }

        config.revision = current_revision + 1;
        Ok(self.storage.put_bridge_config_raw(config).await)
    }

    pub async fn get_routing_policy(&self, room_id: &str) -> Option<RoutingPolicy> {
        self.storage.get_routing_policy(room_id).await
    }

    pub async fn put_routing_policy(
        &self,
        mut policy: RoutingPolicy,
        expected_revision: Option<u64>,
    ) -> Result<RoutingPolicy, RevisionConflict> {
        let current = self.storage.get_routing_policy(&policy.room_id).await;
        let current_revision = current.as_ref().map(|p| p.revision).unwrap_or(0);

        match expected_revision {
            Some(expected) if expected != current_revision => {
                return Err(RevisionConflict { expected: current_revision, actual: current_revision });
            }
            None if current_revision != 0 => {
                return Err(RevisionConflict { expected: current_revision, actual: current_revision });
            }
            _ => {}
        }

        policy.revision = current_revision + 1;
        Ok(self.storage.put_routing_policy_raw(policy).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jm_core::entities::{DeliveryMode, FailoverPolicy};
    use jm_storage::InMemoryStorage;
    use std::collections::HashSet;

    fn sample_config(id: &str) -> BridgeConfig {
        BridgeConfig {
            id: id.to_string(),
            adapter_module: "telegram".to_string(),
            enabled: true,
            capabilities: HashSet::new(),
            opts: serde_json::Map::new(),
            delivery_policy: None,
            revision: 0,
            label: None,
        }
    }

    #[tokio::test]
    async fn first_write_succeeds_with_no_expected_revision() {
        let store = ConfigStore::new(InMemoryStorage::default());
        let written = store.put_bridge_config(sample_config("bridge_a"), None).await.unwrap();
        assert_eq!(written.revision, 1);
    }

    #[tokio::test]
    async fn second_write_without_current_revision_conflicts() {
        let store = ConfigStore::new(InMemoryStorage::default());
        store.put_bridge_config(sample_config("bridge_a"), None).await.unwrap();
        let err = store.put_bridge_config(sample_config("bridge_a"), None).await.unwrap_err();
        assert_eq!(err.expected, 1);
        assert_eq!(err.actual, 1);
    }

    #[tokio::test]
    async fn matching_expected_revision_advances_by_one() {
        let store = ConfigStore::new(InMemoryStorage::default());
        store.put_bridge_config(sample_config("bridge_a"), None).await.unwrap();
        let written = store.put_bridge_config(sample_config("bridge_a"), Some(1)).await.unwrap();
        assert_eq!(written.revision, 2);
    }

    #[tokio::test]
    async fn stale_expected_revision_conflicts_with_current_on_both_sides() {
        let store = ConfigStore::new(InMemoryStorage::default());
        store.put_bridge_config(sample_config("bridge_a"), None).await.unwrap();
        store.put_bridge_config(sample_config("bridge_a"), Some(1)).await.unwrap();
        let err = store.put_bridge_config(sample_config("bridge_a"), Some(1)).await.unwrap_err();
        assert_eq!(err.expected, 2);
        assert_eq!(err.actual, 2);
    }

    #[tokio::test]
    async fn routing_policy_follows_the_same_cas_rule() {
        let store = ConfigStore::new(InMemoryStorage::default());
        let policy = RoutingPolicy {
            room_id: "room_1".to_string(),
            delivery_mode: DeliveryMode::Broadcast,
            failover_policy: FailoverPolicy::NextAvailable,
            fallback_order: vec![],
            dedupe_scope: None,
            revision: 0,
        };
        let written = store.put_routing_policy(policy, None).await.unwrap();
        assert_eq!(written.revision, 1);
    }
}
