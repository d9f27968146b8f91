//! Per-`onboarding_id` FSM worker with persisted transitions (§4.9).
//!
//! Each flow is a single-writer task holding its own `OnboardingFlow`,
//! mirroring the fabric's other per-entity workers (outbound partition,
//! session partition). A worker is spawned lazily on first access and
//! rebuilds its state from storage, so `resume` after a process restart
//! (a fresh `OnboardingManager` over the same storage) is just "spawn
//! again and read back what was persisted".

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use jm_core::entities::{OnboardingFlow, OnboardingTransition};
use jm_core::error::{FabricError, InvalidTransition};
use jm_core::signals::{measurements, metadata, SignalBus};
use jm_storage::Storage;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub flow: OnboardingFlow,
    pub transition_idempotent: bool,
}

enum Command {
    Advance { transition: String, attrs: serde_json::Value, idempotency_key: Option<String>, reply: oneshot::Sender<Result<AdvanceOutcome, FabricError>> },
    Snapshot { reply: oneshot::Sender<OnboardingFlow> },
}

pub struct OnboardingManager {
    storage: Arc<dyn Storage>,
    signals: SignalBus,
    workers: DashMap<String, mpsc::Sender<Command>>,
}

impl OnboardingManager {
    pub fn new(storage: Arc<dyn Storage>, signals: SignalBus) -> Self {
        Self { storage, signals, workers: DashMap::new() }
    }

    fn worker(&self, onboarding_id: &str) -> mpsc::Sender<Command> {
        if let Some(existing) = self.workers.get(onboarding_id) {
            return existing.clone();
        }
        self.workers
            .entry(onboarding_id.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(32);
                tokio::spawn(run(onboarding_id.to_string(), self.storage.clone(), self.signals.clone(), rx));
                tx
            })
            .clone()
    }

    /// Idempotent: if a flow already exists for `onboarding_id`, returns it
    /// unchanged rather than resetting it to `started`.
    pub async fn start(&self, onboarding_id: &str) -> OnboardingFlow {
        self.snapshot(onboarding_id).await
    }

    /// Rebuilds in-memory worker state from the persisted flow — the only
    /// difference from `start` is the name; both spawn-if-absent and read
    /// back, which is exactly what "resume after restart" means for a
    /// worker whose canonical state always lives in storage.
    pub async fn resume(&self, onboarding_id: &str) -> OnboardingFlow {
        self.snapshot(onboarding_id).await
    }

    async fn snapshot(&self, onboarding_id: &str) -> OnboardingFlow {
        let tx = self.worker(onboarding_id);
        let (reply, recv) = oneshot::channel();
        let _ = tx.send(Command::Snapshot { reply }).await;
        recv.await.expect("onboarding worker task dropped its sender")
    }

    pub async fn advance(
        &self,
        onboarding_id: &str,
        transition: &str,
        attrs: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<AdvanceOutcome, FabricError> {
        let tx = self.worker(onboarding_id);
        let (reply, recv) = oneshot::channel();
        tx.send(Command::Advance { transition: transition.to_string(), attrs, idempotency_key, reply })
            .await
            .map_err(|_| FabricError::NotFound)?;
        recv.await.map_err(|_| FabricError::NotFound)?
    }
}

async fn run(onboarding_id: String, storage: Arc<dyn Storage>, signals: SignalBus, mut rx: mpsc::Receiver<Command>) {
    let mut flow = storage.get_onboarding(&onboarding_id).await.unwrap_or_else(|| OnboardingFlow::new(onboarding_id.clone()));

    while let Some(command) = rx.recv().await {
        match command {
            Command::Snapshot { reply } => {
                let _ = reply.send(flow.clone());
            }
            Command::Advance { transition, attrs, idempotency_key, reply } => {
                let result = apply_advance(&mut flow, &transition, attrs, idempotency_key);
                match result {
                    Ok(transition_idempotent) => {
                        if !transition_idempotent {
                            flow = storage.save_onboarding(flow.clone()).await;
                        }
                        emit(&signals, &onboarding_id, &transition, if transition_idempotent { "idempotent" } else { "applied" });
                        let _ = reply.send(Ok(AdvanceOutcome { flow: flow.clone(), transition_idempotent }));
                    }
                    Err(err) => {
                        emit(&signals, &onboarding_id, &transition, "invalid_transition");
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
    }
}

/// Returns `Ok(true)` when the call was an idempotent no-op (same
/// `idempotency_key` already recorded), `Ok(false)` when a new transition
/// was appended, `Err` on a disallowed transition from the current state.
fn apply_advance(
    flow: &mut OnboardingFlow,
    transition: &str,
    attrs: serde_json::Value,
    idempotency_key: Option<String>,
) -> Result<bool, FabricError> {
    if let Some(key) = idempotency_key.as_deref() {
        if flow.transitions.iter().any(|t| t.idempotency_key.as_deref() == Some(key)) {
            return Ok(true);
        }
    }

    let allowed = flow.status.allowed_transitions();
    if !allowed.contains(&transition) {
        return Err(FabricError::InvalidTransition(InvalidTransition {
            from: format!("{:?}", flow.status),
            transition: transition.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            class: "fatal".to_string(),
        }));
    }

    let new_status = flow.status.apply(transition).expect("transition already validated against allowed()");
    flow.status = new_status;
    flow.transitions.push(OnboardingTransition { transition: transition.to_string(), status: new_status, idempotency_key, at: Utc::now() });
    flow.side_effects.push(json!({ "transition": transition, "attrs": attrs }));
    if new_status.is_terminal() {
        flow.completion_metadata = Some(json!({ "completed_via": transition }));
    }
    Ok(false)
}

fn emit(signals: &SignalBus, onboarding_id: &str, transition: &str, outcome: &str) {
    let mut meta = metadata();
    meta.insert("onboarding_id".into(), onboarding_id.into());
    meta.insert("transition".into(), transition.into());
    meta.insert("outcome".into(), outcome.into());
    signals.emit("onboarding.transition", measurements(), meta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use jm_core::entities::OnboardingStatus;
    use jm_storage::InMemoryStorage;

    fn manager(storage: Arc<dyn Storage>) -> OnboardingManager {
        OnboardingManager::new(storage, SignalBus::new())
    }

    #[tokio::test]
    async fn start_creates_a_fresh_flow_in_started_status() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let mgr = manager(storage);
        let flow = mgr.start("o1").await;
        assert_eq!(flow.status, OnboardingStatus::Started);
        assert!(flow.transitions.is_empty());
    }

    #[tokio::test]
    async fn disallowed_transition_is_rejected_with_allowed_list() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let mgr = manager(storage);
        mgr.start("o1").await;

        let err = mgr.advance("o1", "pair_identity", json!({}), Some("p1".to_string())).await.unwrap_err();
        match err {
            FabricError::InvalidTransition(invalid) => {
                assert_eq!(invalid.transition, "pair_identity");
                assert_eq!(invalid.allowed, vec!["cancel", "resolve_directory"]);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn allowed_transition_advances_status_and_appends_one_transition() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let mgr = manager(storage);
        mgr.start("o1").await;

        let outcome = mgr.advance("o1", "resolve_directory", json!({}), Some("d1".to_string())).await.unwrap();
        assert_eq!(outcome.flow.status, OnboardingStatus::DirectoryResolved);
        assert_eq!(outcome.flow.transitions.len(), 1);
        assert!(!outcome.transition_idempotent);
    }

    #[tokio::test]
    async fn repeating_the_same_idempotency_key_is_a_no_op() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let mgr = manager(storage);
        mgr.start("o1").await;

        mgr.advance("o1", "resolve_directory", json!({}), Some("d1".to_string())).await.unwrap();
        let second = mgr.advance("o1", "resolve_directory", json!({}), Some("d1".to_string())).await.unwrap();

        assert!(second.transition_idempotent);
        assert_eq!(second.flow.transitions.len(), 1);
        assert_eq!(second.flow.side_effects.len(), 1);
    }

    #[tokio::test]
    async fn full_path_to_completion() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let mgr = manager(storage);
        mgr.start("o1").await;
        mgr.advance("o1", "resolve_directory", json!({}), Some("d1".to_string())).await.unwrap();
        mgr.advance("o1", "pair_identity", json!({}), Some("p1".to_string())).await.unwrap();
        let outcome = mgr.advance("o1", "complete", json!({}), Some("c1".to_string())).await.unwrap();

        assert_eq!(outcome.flow.status, OnboardingStatus::Completed);
        assert_eq!(outcome.flow.transitions.len(), 3);
        assert!(outcome.flow.completion_metadata.is_some());
    }

    #[tokio::test]
    async fn resume_after_restart_rebuilds_from_persisted_state() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        {
            let mgr = manager(storage.clone());
            mgr.start("o1").await;
            mgr.advance("o1", "resolve_directory", json!({}), Some("d1".to_string())).await.unwrap();
        }
        // A brand new manager over the same storage simulates a restart.
        let resumed = manager(storage);
        let flow = resumed.resume("o1").await;
        assert_eq!(flow.status, OnboardingStatus::DirectoryResolved);
        assert_eq!(flow.transitions.len(), 1);

        // The idempotency key survives the "restart" too.
        let again = resumed.advance("o1", "resolve_directory", json!({}), Some("d1".to_string())).await.unwrap();
        assert!(again.transition_idempotent);
    }
}
