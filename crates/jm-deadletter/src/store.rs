//! Bounded dead-letter store + replay (§4.8).

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use jm_core::entities::{DeadLetter, ReplayStatus};
use jm_core::error::OutboundError;
use jm_core::signals::{measurements, metadata, SignalBus};
use jm_outbound::{CapturedRequest, DeadLetterSink, DispatchOutcome, OutboundGateway};
use jm_storage::Storage;
use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug)]
pub enum ReplayError {
    NotFound,
    CorruptRequest,
}

#[derive(Debug, Clone)]
pub enum ReplayOutcome {
    AlreadyReplayed,
    Succeeded(DispatchOutcome),
    Failed(OutboundError),
}

pub struct DeadLetterStore {
    storage: Arc<dyn Storage>,
    max_records: usize,
    order: Mutex<VecDeque<String>>,
    signals: SignalBus,
}

impl DeadLetterStore {
    pub fn new(storage: Arc<dyn Storage>, max_records: usize, signals: SignalBus) -> Self {
        Self { storage, max_records: max_records.max(1), order: Mutex::new(VecDeque::new()), signals }
    }

    pub async fn get(&self, id: &str) -> Option<DeadLetter> {
        self.storage.get_dead_letter(id).await
    }

    /// Re-dispatches the captured request through `gateway` unless it has
    /// already succeeded. Idempotent: a record at `succeeded` is returned
    /// as `AlreadyReplayed` without touching the gateway.
    pub async fn replay(&self, id: &str, gateway: &OutboundGateway) -> Result<ReplayOutcome, ReplayError> {
        let mut dead_letter = self.storage.get_dead_letter(id).await.ok_or(ReplayError::NotFound)?;

        if dead_letter.replay.status == ReplayStatus::Succeeded {
            return Ok(ReplayOutcome::AlreadyReplayed);
        }

        let captured: CapturedRequest = serde_json::from_value(dead_letter.request.clone()).map_err(|_| ReplayError::CorruptRequest)?;

        let outcome = gateway.dispatch(captured).await;
        dead_letter.replay.attempts += 1;
        dead_letter.replay.status = if outcome.is_ok() { ReplayStatus::Succeeded } else { ReplayStatus::Failed };
        self.storage.update_dead_letter(dead_letter).await;

        let mut meta = metadata();
        meta.insert("dead_letter_id".into(), id.into());
        meta.insert("outcome".into(), if outcome.is_ok() { "succeeded" } else { "failed" }.into());
        self.signals.emit("deadletter.replay.outcome", measurements(), meta);

        Ok(match outcome {
            Ok(dispatched) => ReplayOutcome::Succeeded(dispatched),
            Err(err) => ReplayOutcome::Failed(err),
        })
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterStore {
    async fn capture(&self, dead_letter: DeadLetter) -> String {
        let id = dead_letter.id.clone();
        warn!(dead_letter_id = %id, bridge_id = %dead_letter.bridge_id, reason = %dead_letter.reason, "outbound request exhausted, captured to dead-letter store");
        self.storage.save_dead_letter(dead_letter).await;

        let evicted = {
            let mut order = self.order.lock();
            order.push_back(id.clone());
            let mut evicted = Vec::new();
            while order.len() > self.max_records {
                if let Some(oldest) = order.pop_front() {
                    evicted.push(oldest);
                }
            }
            evicted
        };
        for oldest in evicted {
            self.storage.delete_dead_letter(&oldest).await;
        }

        let mut meta = metadata();
        meta.insert("dead_letter_id".into(), id.clone().into());
        self.signals.emit("deadletter.captured", measurements(), meta);

        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jm_core::adapter::{BridgeAdapter, Incoming, SendResult};
    use jm_core::entities::{DeadLetterDiagnostics, ReplayState};
    use jm_core::error::Reason;
    use jm_outbound::{AdapterResolver, GatewayConfig, Operation, OutboundContext, OutboundOptions, OutboundPayload};
    use jm_storage::InMemoryStorage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAdapter {
        fail_first_n: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl BridgeAdapter for FlakyAdapter {
        fn channel_type(&self) -> &str {
            "stub"
        }
        fn transform_incoming(&self, _payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Err(Reason::UnknownCapability)
        }
        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<SendResult, Reason> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(Reason::InvalidRequest)
            } else {
                Ok(SendResult { message_id: "delivered".to_string() })
            }
        }
    }

    struct SingleAdapterResolver(Arc<dyn BridgeAdapter>);
    impl AdapterResolver for SingleAdapterResolver {
        fn resolve(&self, _instance_id: &str) -> Option<Arc<dyn BridgeAdapter>> {
            Some(self.0.clone())
        }
    }

    fn sample_dead_letter(id: &str, request: serde_json::Value) -> DeadLetter {
        DeadLetter {
            id: id.to_string(),
            bridge_id: "bridge_a".to_string(),
            reason: "invalid_request".to_string(),
            category: "Terminal".to_string(),
            disposition: "Terminal".to_string(),
            correlation_id: None,
            request,
            replay: ReplayState::default(),
            diagnostics: DeadLetterDiagnostics { queue_capacity: 10, pressure_level: "normal".to_string(), attempt_count: 1 },
            created_at: chrono::Utc::now(),
        }
    }

    fn captured_request() -> serde_json::Value {
        serde_json::to_value(CapturedRequest {
            operation: Operation::SendMessage,
            context: OutboundContext { channel: "telegram".to_string(), instance_id: "bridge_a".to_string(), external_room_id: "room-1".to_string() },
            payload: OutboundPayload::Text("hello".to_string()),
            options: OutboundOptions { idempotency_key: Some("dl-1".to_string()), priority: 5, external_message_id: None },
        })
        .unwrap()
    }

    #[tokio::test]
    async fn capture_then_replay_delivers_and_marks_succeeded() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let store = DeadLetterStore::new(storage.clone(), 100, SignalBus::new());
        let id = store.capture(sample_dead_letter("dl-1", captured_request())).await;

        let adapter: Arc<dyn BridgeAdapter> = Arc::new(FlakyAdapter { fail_first_n: 0, calls: AtomicU32::new(0) });
        let resolver = Arc::new(SingleAdapterResolver(adapter));
        let gateway = OutboundGateway::new(GatewayConfig::default(), resolver, SignalBus::new());

        let outcome = store.replay(&id, &gateway).await.unwrap();
        assert!(matches!(outcome, ReplayOutcome::Succeeded(_)));

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.replay.status, ReplayStatus::Succeeded);
        assert_eq!(record.replay.attempts, 1);
    }

    #[tokio::test]
    async fn replaying_an_already_succeeded_record_never_re_dispatches() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let store = DeadLetterStore::new(storage.clone(), 100, SignalBus::new());
        let id = store.capture(sample_dead_letter("dl-1", captured_request())).await;

        let adapter: Arc<dyn BridgeAdapter> = Arc::new(FlakyAdapter { fail_first_n: 0, calls: AtomicU32::new(0) });
        let resolver = Arc::new(SingleAdapterResolver(adapter.clone()));
        let gateway = OutboundGateway::new(GatewayConfig::default(), resolver, SignalBus::new());

        let first = store.replay(&id, &gateway).await.unwrap();
        assert!(matches!(first, ReplayOutcome::Succeeded(_)));

        let second = store.replay(&id, &gateway).await.unwrap();
        assert!(matches!(second, ReplayOutcome::AlreadyReplayed));
    }

    #[tokio::test]
    async fn replay_of_unknown_id_returns_not_found() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let store = DeadLetterStore::new(storage, 100, SignalBus::new());
        let resolver = Arc::new(SingleAdapterResolver(Arc::new(FlakyAdapter { fail_first_n: 0, calls: AtomicU32::new(0) })));
        let gateway = OutboundGateway::new(GatewayConfig::default(), resolver, SignalBus::new());
        let err = store.replay("missing", &gateway).await.unwrap_err();
        assert!(matches!(err, ReplayError::NotFound));
    }

    #[tokio::test]
    async fn overflow_past_max_records_discards_the_oldest() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let store = DeadLetterStore::new(storage.clone(), 2, SignalBus::new());
        store.capture(sample_dead_letter("dl-1", captured_request())).await;
        store.capture(sample_dead_letter("dl-2", captured_request())).await;
        store.capture(sample_dead_letter("dl-3", captured_request())).await;

        assert!(store.get("dl-1").await.is_none());
        assert!(store.get("dl-2").await.is_some());
        assert!(store.get("dl-3").await.is_some());
    }
}
