//! The public outbound gateway surface (§4.5).
//!
//! `OutboundGateway` owns `partition_count` [`crate::partition::Partition`]
//! workers. `send_message`/`edit_message`/`send_media`/`edit_media` hash
//! `(instance_id, external_room_id)` to a partition and hand the request to
//! that partition's single-writer queue; everything past that point
//! (pressure, sanitize, dispatch, retry, dead-letter capture) is the
//! partition's business, not the gateway's.

use std::sync::Arc;

use jm_core::error::{Disposition, ErrorCategory, OutboundError, Reason};
use jm_core::signals::SignalBus;
use jm_security::{OutboundSanitizer, ReferenceSanitizer, SanitizeTimeoutPolicy};

use crate::partition::Partition;
use crate::pressure::PressureThresholds;
use crate::{partition_index, AdapterResolver, DeadLetterSink, DispatchOutcome, MediaKind, Operation, OutboundContext, OutboundOptions, OutboundPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShedAction {
    DropLowestPriority,
    Reject,
}

impl ShedAction {
    pub fn parse(raw: &str) -> Option<ShedAction> {
        match raw {
            "drop_lowest_priority" => Some(ShedAction::DropLowestPriority),
            "reject" => Some(ShedAction::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedAction {
    Throttle,
    Admit,
}

impl DegradedAction {
    pub fn parse(raw: &str) -> Option<DegradedAction> {
        match raw {
            "throttle" => Some(DegradedAction::Throttle),
            "admit" => Some(DegradedAction::Admit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedMediaPolicy {
    FallbackText,
    Reject,
}

impl UnsupportedMediaPolicy {
    pub fn parse(raw: &str) -> Option<UnsupportedMediaPolicy> {
        match raw {
            "fallback_text" => Some(UnsupportedMediaPolicy::FallbackText),
            "reject" => Some(UnsupportedMediaPolicy::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub partition_count: usize,
    pub queue_capacity: usize,
    pub thresholds: PressureThresholds,
    pub degraded_throttle_ms: u64,
    pub shed_action: ShedAction,
    pub degraded_action: DegradedAction,
    pub sent_cache_capacity: usize,
    pub sent_cache_ttl_ms: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub adapter_timeout_ms: u64,
    pub unsupported_media_policy: UnsupportedMediaPolicy,
    pub max_media_bytes: u64,
    pub sanitize_timeout_ms: u64,
    pub sanitize_timeout_fallback: SanitizeTimeoutPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            partition_count: 16,
            queue_capacity: 1000,
            thresholds: PressureThresholds::default(),
            degraded_throttle_ms: 50,
            shed_action: ShedAction::Reject,
            degraded_action: DegradedAction::Throttle,
            sent_cache_capacity: 10_000,
            sent_cache_ttl_ms: 3_600_000,
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 30_000,
            adapter_timeout_ms: 10_000,
            unsupported_media_policy: UnsupportedMediaPolicy::FallbackText,
            max_media_bytes: 20_000_000,
            sanitize_timeout_ms: 2_000,
            sanitize_timeout_fallback: SanitizeTimeoutPolicy::AllowOriginal,
        }
    }
}

pub struct OutboundGateway {
    config: Arc<GatewayConfig>,
    partitions: Vec<Arc<Partition>>,
}

impl OutboundGateway {
    pub fn new(config: GatewayConfig, adapters: Arc<dyn AdapterResolver>, signals: SignalBus) -> Self {
        Self::with_sanitizer_and_dead_letters(config, adapters, Arc::new(ReferenceSanitizer), None, signals)
    }

    pub fn with_sanitizer_and_dead_letters(
        config: GatewayConfig,
        adapters: Arc<dyn AdapterResolver>,
        sanitizer: Arc<dyn OutboundSanitizer>,
        dead_letters: Option<Arc<dyn DeadLetterSink>>,
        signals: SignalBus,
    ) -> Self {
        let config = Arc::new(config);
        let partitions = (0..config.partition_count.max(1))
            .map(|id| Partition::new(id, config.clone(), adapters.clone(), sanitizer.clone(), dead_letters.clone(), signals.clone()))
            .collect();
        Self { config, partitions }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition_for(&self, instance_id: &str, external_room_id: &str) -> &Arc<Partition> {
        let idx = partition_index(instance_id, external_room_id, self.partitions.len());
        &self.partitions[idx]
    }

    pub async fn send_message(
        &self,
        context: OutboundContext,
        text: String,
        options: OutboundOptions,
    ) -> Result<DispatchOutcome, OutboundError> {
        self.submit(Operation::SendMessage, context, OutboundPayload::Text(text), options).await
    }

    pub async fn edit_message(
        &self,
        context: OutboundContext,
        text: String,
        options: OutboundOptions,
    ) -> Result<DispatchOutcome, OutboundError> {
        self.submit(Operation::EditMessage, context, OutboundPayload::Text(text), options).await
    }

    pub async fn send_media(
        &self,
        context: OutboundContext,
        kind: MediaKind,
        url: String,
        size_bytes: Option<u64>,
        fallback_text: Option<String>,
        options: OutboundOptions,
    ) -> Result<DispatchOutcome, OutboundError> {
        self.submit(
            Operation::SendMedia,
            context,
            OutboundPayload::Media { kind, url, size_bytes, fallback_text },
            options,
        )
        .await
    }

    pub async fn edit_media(
        &self,
        context: OutboundContext,
        kind: MediaKind,
        url: String,
        size_bytes: Option<u64>,
        fallback_text: Option<String>,
        options: OutboundOptions,
    ) -> Result<DispatchOutcome, OutboundError> {
        self.submit(
            Operation::EditMedia,
            context,
            OutboundPayload::Media { kind, url, size_bytes, fallback_text },
            options,
        )
        .await
    }

    /// Re-submits a previously captured request unchanged (§4.8 replay).
    /// Carrying the original `idempotency_key` through `options` is what
    /// makes a replay of an already-succeeded request a cache hit instead
    /// of a second side effect.
    pub async fn dispatch(&self, request: crate::CapturedRequest) -> Result<DispatchOutcome, OutboundError> {
        self.submit(request.operation, request.context, request.payload, request.options).await
    }

    async fn submit(
        &self,
        operation: Operation,
        context: OutboundContext,
        payload: OutboundPayload,
        options: OutboundOptions,
    ) -> Result<DispatchOutcome, OutboundError> {
        let partition = self.partition_for(&context.instance_id, &context.external_room_id);
        let receiver = partition.submit(operation, context, payload, options)?;
        receiver.await.unwrap_or_else(|_| {
            Err(OutboundError {
                reason: Reason::NetworkError,
                category: ErrorCategory::Retryable,
                disposition: Disposition::Terminal,
                attempt: 0,
                max_attempts: 0,
                dead_letter_id: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jm_core::adapter::{BridgeAdapter, Incoming, SendResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingAdapter {
        count: AtomicU32,
    }

    #[async_trait]
    impl BridgeAdapter for CountingAdapter {
        fn channel_type(&self) -> &str {
            "stub"
        }
        fn transform_incoming(&self, _payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Err(Reason::UnknownCapability)
        }
        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<SendResult, Reason> {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            Ok(SendResult { message_id: format!("m{n}") })
        }
    }

    struct SingleAdapterResolver(Arc<dyn BridgeAdapter>);
    impl AdapterResolver for SingleAdapterResolver {
        fn resolve(&self, _instance_id: &str) -> Option<Arc<dyn BridgeAdapter>> {
            Some(self.0.clone())
        }
    }

    fn gateway(partition_count: usize) -> OutboundGateway {
        let adapter: Arc<dyn BridgeAdapter> = Arc::new(CountingAdapter { count: AtomicU32::new(0) });
        let resolver = Arc::new(SingleAdapterResolver(adapter));
        let config = GatewayConfig { partition_count, queue_capacity: 10, ..GatewayConfig::default() };
        OutboundGateway::new(config, resolver, SignalBus::new())
    }

    fn ctx(instance_id: &str, room: &str) -> OutboundContext {
        OutboundContext { channel: "telegram".to_string(), instance_id: instance_id.to_string(), external_room_id: room.to_string() }
    }

    #[tokio::test]
    async fn same_pair_always_maps_to_the_same_partition() {
        let gw = gateway(4);
        let a = partition_index("bridge_a", "room-7", gw.partition_count());
        let b = partition_index("bridge_a", "room-7", gw.partition_count());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn two_sends_without_idempotency_key_produce_distinct_ids() {
        let gw = gateway(4);
        let first = gw.send_message(ctx("bridge_a", "room-7"), "hello".to_string(), OutboundOptions::default()).await.unwrap();
        let second = gw.send_message(ctx("bridge_a", "room-7"), "hello again".to_string(), OutboundOptions::default()).await.unwrap();
        assert_ne!(first.external_message_id, second.external_message_id);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_returns_cached_result() {
        let gw = gateway(4);
        let opts = OutboundOptions { idempotency_key: Some("k1".to_string()), ..Default::default() };
        let first = gw.send_message(ctx("bridge_a", "room-7"), "hello".to_string(), opts.clone()).await.unwrap();
        let second = gw.send_message(ctx("bridge_a", "room-7"), "hello".to_string(), opts).await.unwrap();
        assert_eq!(first.external_message_id, second.external_message_id);
    }

    #[tokio::test]
    async fn edit_without_external_message_id_is_rejected_without_enqueueing() {
        let gw = gateway(4);
        let err = gw.edit_message(ctx("bridge_a", "room-7"), "edited".to_string(), OutboundOptions::default()).await.unwrap_err();
        assert_eq!(err.reason, Reason::MissingExternalMessageId);
        assert_eq!(err.category, ErrorCategory::Terminal);
    }

    struct AlwaysFailsAdapter;
    #[async_trait]
    impl BridgeAdapter for AlwaysFailsAdapter {
        fn channel_type(&self) -> &str {
            "stub"
        }
        fn transform_incoming(&self, _payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Err(Reason::UnknownCapability)
        }
        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<SendResult, Reason> {
            Err(Reason::InvalidRequest)
        }
    }

    #[tokio::test]
    async fn terminal_adapter_error_does_not_retry() {
        let adapter: Arc<dyn BridgeAdapter> = Arc::new(AlwaysFailsAdapter);
        let resolver = Arc::new(SingleAdapterResolver(adapter));
        let config = GatewayConfig { max_attempts: 5, ..GatewayConfig::default() };
        let gw = OutboundGateway::new(config, resolver, SignalBus::new());
        let err = gw.send_message(ctx("bridge_a", "room-7"), "hi".to_string(), OutboundOptions::default()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Terminal);
        assert_eq!(err.attempt, 1);
    }

    #[tokio::test]
    async fn queue_full_rejects_immediately() {
        let config = GatewayConfig { partition_count: 1, queue_capacity: 1, ..GatewayConfig::default() };
        let adapter: Arc<dyn BridgeAdapter> = Arc::new(NeverRespondingAdapter);
        let resolver = Arc::new(SingleAdapterResolver(adapter));
        let gw = OutboundGateway::new(config, resolver, SignalBus::new());
        let partition = gw.partition_for("bridge_a", "room-7").clone();

        // The first request is picked up by the worker and blocks there
        // forever; the second fills the one-deep queue; the third must be
        // rejected synchronously without ever being enqueued.
        let _first = partition
            .submit(Operation::SendMessage, ctx("bridge_a", "room-7"), OutboundPayload::Text("one".to_string()), OutboundOptions::default())
            .unwrap();
        tokio::task::yield_now().await;
        let _second = partition
            .submit(Operation::SendMessage, ctx("bridge_a", "room-7"), OutboundPayload::Text("two".to_string()), OutboundOptions::default())
            .unwrap();
        let third = partition.submit(Operation::SendMessage, ctx("bridge_a", "room-7"), OutboundPayload::Text("three".to_string()), OutboundOptions::default());
        assert_eq!(third.unwrap_err().reason, Reason::QueueFull);
    }

    struct NeverRespondingAdapter;
    #[async_trait]
    impl BridgeAdapter for NeverRespondingAdapter {
        fn channel_type(&self) -> &str {
            "stub"
        }
        fn transform_incoming(&self, _payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Err(Reason::UnknownCapability)
        }
        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<SendResult, Reason> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

}
