//! Partitioned replay workers (§4.8): `replay_partition_count` queues,
//! hashed by `dead_letter_id` so repeated enqueues of the same record
//! serialize through the same worker. Crashes restart independently per
//! partition, mirroring the outbound gateway's own partition isolation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use jm_core::signals::{measurements, metadata, SignalBus};
use jm_outbound::OutboundGateway;
use tokio::sync::mpsc;
use tracing::error;

use crate::store::DeadLetterStore;

#[derive(Debug, Clone, Copy)]
pub struct ReplayWorkerPoolConfig {
    pub partition_count: usize,
    pub queue_capacity: usize,
}

impl Default for ReplayWorkerPoolConfig {
    fn default() -> Self {
        Self { partition_count: 8, queue_capacity: 1000 }
    }
}

pub struct ReplayWorkerPool {
    senders: Vec<mpsc::Sender<String>>,
}

impl ReplayWorkerPool {
    pub fn new(config: ReplayWorkerPoolConfig, store: Arc<DeadLetterStore>, gateway: Arc<OutboundGateway>, signals: SignalBus) -> Self {
        let partition_count = config.partition_count.max(1);
        let mut senders = Vec::with_capacity(partition_count);
        for id in 0..partition_count {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            tokio::spawn(Self::run(id, rx, store.clone(), gateway.clone(), signals.clone()));
            senders.push(tx);
        }
        Self { senders }
    }

    async fn run(id: usize, mut rx: mpsc::Receiver<String>, store: Arc<DeadLetterStore>, gateway: Arc<OutboundGateway>, signals: SignalBus) {
        while let Some(dead_letter_id) = rx.recv().await {
            match store.replay(&dead_letter_id, gateway.as_ref()).await {
                Ok(outcome) => {
                    let mut meta = metadata();
                    meta.insert("partition".into(), (id as u64).into());
                    meta.insert("dead_letter_id".into(), dead_letter_id.clone().into());
                    meta.insert("outcome".into(), outcome_label(&outcome).into());
                    signals.emit("deadletter.replay.worker_completed", measurements(), meta);
                }
                Err(err) => {
                    error!(partition = id, dead_letter_id = %dead_letter_id, ?err, "replay worker could not resolve dead-letter record");
                }
            }
        }
    }

    /// Enqueues `dead_letter_id` for replay. Returns `false` only if the
    /// target partition's queue is saturated; the caller may retry later.
    pub async fn enqueue(&self, dead_letter_id: &str) -> bool {
        let idx = partition_index(dead_letter_id, self.senders.len());
        self.senders[idx].send(dead_letter_id.to_string()).await.is_ok()
    }

    pub fn partition_count(&self) -> usize {
        self.senders.len()
    }
}

fn outcome_label(outcome: &crate::store::ReplayOutcome) -> &'static str {
    match outcome {
        crate::store::ReplayOutcome::AlreadyReplayed => "already_replayed",
        crate::store::ReplayOutcome::Succeeded(_) => "succeeded",
        crate::store::ReplayOutcome::Failed(_) => "failed",
    }
}

fn partition_index(dead_letter_id: &str, partition_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    dead_letter_id.hash(&mut hasher);
    (hasher.finish() as usize) % partition_count.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DeadLetterStore;
    use async_trait::async_trait;
    use jm_core::adapter::{BridgeAdapter, Incoming, SendResult};
    use jm_core::entities::{DeadLetter, DeadLetterDiagnostics, ReplayState};
    use jm_core::error::Reason;
    use jm_outbound::{AdapterResolver, CapturedRequest, GatewayConfig, Operation, OutboundContext, OutboundOptions, OutboundPayload};
    use jm_storage::{InMemoryStorage, Storage};

    struct EchoAdapter;
    #[async_trait]
    impl BridgeAdapter for EchoAdapter {
        fn channel_type(&self) -> &str {
            "stub"
        }
        fn transform_incoming(&self, _payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Err(Reason::UnknownCapability)
        }
        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<SendResult, Reason> {
            Ok(SendResult { message_id: "ok".to_string() })
        }
    }

    struct SingleAdapterResolver;
    impl AdapterResolver for SingleAdapterResolver {
        fn resolve(&self, _instance_id: &str) -> Option<Arc<dyn BridgeAdapter>> {
            Some(Arc::new(EchoAdapter))
        }
    }

    fn dead_letter(id: &str) -> DeadLetter {
        let request = serde_json::to_value(CapturedRequest {
            operation: Operation::SendMessage,
            context: OutboundContext { channel: "telegram".to_string(), instance_id: "bridge_a".to_string(), external_room_id: "room-1".to_string() },
            payload: OutboundPayload::Text("hi".to_string()),
            options: OutboundOptions { idempotency_key: Some(id.to_string()), priority: 5, external_message_id: None },
        })
        .unwrap();
        DeadLetter {
            id: id.to_string(),
            bridge_id: "bridge_a".to_string(),
            reason: "network_error".to_string(),
            category: "Retryable".to_string(),
            disposition: "Terminal".to_string(),
            correlation_id: None,
            request,
            replay: ReplayState::default(),
            diagnostics: DeadLetterDiagnostics { queue_capacity: 10, pressure_level: "normal".to_string(), attempt_count: 5 },
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn same_id_always_maps_to_the_same_partition() {
        assert_eq!(partition_index("dl-1", 8), partition_index("dl-1", 8));
    }

    #[tokio::test]
    async fn enqueued_record_eventually_replays_and_succeeds() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let store = Arc::new(DeadLetterStore::new(storage, 100, SignalBus::new()));
        let id = store.capture(dead_letter("dl-1")).await;

        let gateway = Arc::new(OutboundGateway::new(GatewayConfig::default(), Arc::new(SingleAdapterResolver), SignalBus::new()));
        let pool = ReplayWorkerPool::new(ReplayWorkerPoolConfig::default(), store.clone(), gateway, SignalBus::new());
        assert!(pool.enqueue(&id).await);

        for _ in 0..50 {
            if let Some(record) = store.get(&id).await {
                if record.replay.status == jm_core::entities::ReplayStatus::Succeeded {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("dead letter was never replayed");
    }
}
