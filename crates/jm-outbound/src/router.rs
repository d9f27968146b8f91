//! Outbound router (§4.6): resolves a room's outbound-participating
//! bindings, orders them per the room's [`RoutingPolicy`], and dispatches
//! through the [`OutboundGateway`] according to `delivery_mode` /
//! `failover_policy`.

use jm_core::entities::{BridgeId, DeliveryMode, FailoverPolicy, RoomBinding, RoutingPolicy};
use jm_core::error::{OutboundError, Reason};
use jm_storage::Storage;

use crate::{DispatchOutcome, Operation, OutboundContext, OutboundGateway, OutboundOptions, OutboundPayload};

#[derive(Debug)]
pub enum RouteOutboundError {
    NoRoutes,
}

#[derive(Debug, Clone)]
pub struct RoutedAttempt {
    pub bridge_id: BridgeId,
    pub outcome: Result<DispatchOutcome, OutboundError>,
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub room_id: String,
    pub delivery_mode: DeliveryMode,
    pub failover_policy: FailoverPolicy,
    pub attempts: Vec<RoutedAttempt>,
    pub delivered: Vec<BridgeId>,
    pub failed: Vec<BridgeId>,
}

impl RouteOutcome {
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

pub async fn route_outbound(
    room_id: &str,
    operation: Operation,
    payload: OutboundPayload,
    options: OutboundOptions,
    storage: &dyn Storage,
    gateway: &OutboundGateway,
) -> Result<RouteOutcome, RouteOutboundError> {
    route_outbound_for_message(room_id, None, operation, payload, options, storage, gateway).await
}

/// Same as [`route_outbound`], but when `message_id` names a persisted
/// message, the outcome summary (`attempted`, `delivered`, `failed`,
/// `delivery_mode`, `failover_policy`, `routes`) is recorded into that
/// message's `metadata.outbound_gateway` (§4.6) once routing completes.
pub async fn route_outbound_for_message(
    room_id: &str,
    message_id: Option<&str>,
    operation: Operation,
    payload: OutboundPayload,
    options: OutboundOptions,
    storage: &dyn Storage,
    gateway: &OutboundGateway,
) -> Result<RouteOutcome, RouteOutboundError> {
    let bindings = storage.list_room_bindings(room_id).await;
    let mut routes: Vec<RoomBinding> = Vec::new();
    for binding in bindings {
        if !binding.direction.participates_in_outbound() {
            continue;
        }
        let bridge_id = binding.effective_bridge_id().to_string();
        let Some(config) = storage.get_bridge_config(&bridge_id).await else {
            continue;
        };
        if !config.enabled {
            continue;
        }
        routes.push(binding);
    }

    if routes.is_empty() {
        return Err(RouteOutboundError::NoRoutes);
    }

    let policy = storage.get_routing_policy(room_id).await.unwrap_or_else(|| RoutingPolicy::default_for_room(room_id));

    routes.sort_by_key(|binding| {
        let bridge_id = binding.effective_bridge_id();
        policy.fallback_order.iter().position(|candidate| candidate == bridge_id).unwrap_or(usize::MAX)
    });

    let mut attempts = Vec::new();
    let mut delivered = Vec::new();
    let mut failed = Vec::new();

    match policy.delivery_mode {
        DeliveryMode::Broadcast => {
            for binding in &routes {
                let bridge_id = binding.effective_bridge_id().to_string();
                let outcome = dispatch_to_binding(binding, operation, payload.clone(), options.clone(), gateway).await;
                if outcome.is_ok() {
                    delivered.push(bridge_id.clone());
                } else {
                    failed.push(bridge_id.clone());
                }
                attempts.push(RoutedAttempt { bridge_id, outcome });
            }
        }
        DeliveryMode::Primary | DeliveryMode::BestEffort => {
            for binding in &routes {
                let bridge_id = binding.effective_bridge_id().to_string();
                let outcome = dispatch_to_binding(binding, operation, payload.clone(), options.clone(), gateway).await;
                let succeeded = outcome.is_ok();
                if succeeded {
                    delivered.push(bridge_id.clone());
                } else {
                    failed.push(bridge_id.clone());
                }
                attempts.push(RoutedAttempt { bridge_id, outcome });

                if succeeded || policy.failover_policy == FailoverPolicy::None {
                    break;
                }
            }
        }
    }

    let outcome = RouteOutcome {
        room_id: room_id.to_string(),
        delivery_mode: policy.delivery_mode,
        failover_policy: policy.failover_policy,
        attempts,
        delivered,
        failed,
    };

    if let Some(message_id) = message_id {
        if let Some(mut message) = storage.get_message(message_id).await {
            message.set_metadata(
                "outbound_gateway",
                serde_json::json!({
                    "attempted": outcome.attempts.len(),
                    "delivered": outcome.delivered,
                    "failed": outcome.failed,
                    "delivery_mode": outcome.delivery_mode,
                    "failover_policy": outcome.failover_policy,
                    "routes": routes.iter().map(|b| b.effective_bridge_id().to_string()).collect::<Vec<_>>(),
                }),
            );
            storage.save_message(message).await;
        }
    }

    Ok(outcome)
}

async fn dispatch_to_binding(
    binding: &RoomBinding,
    operation: Operation,
    payload: OutboundPayload,
    options: OutboundOptions,
    gateway: &OutboundGateway,
) -> Result<DispatchOutcome, OutboundError> {
    let context = OutboundContext {
        channel: binding.channel.clone(),
        instance_id: binding.effective_bridge_id().to_string(),
        external_room_id: binding.external_room_id.clone(),
    };
    match (operation, payload) {
        (Operation::SendMessage, OutboundPayload::Text(text)) => gateway.send_message(context, text, options).await,
        (Operation::EditMessage, OutboundPayload::Text(text)) => gateway.edit_message(context, text, options).await,
        (Operation::SendMedia, OutboundPayload::Media { kind, url, size_bytes, fallback_text }) => {
            gateway.send_media(context, kind, url, size_bytes, fallback_text, options).await
        }
        (Operation::EditMedia, OutboundPayload::Media { kind, url, size_bytes, fallback_text }) => {
            gateway.edit_media(context, kind, url, size_bytes, fallback_text, options).await
        }
        _ => Err(OutboundError::terminal(Reason::InvalidRequest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jm_core::adapter::{BridgeAdapter, Incoming, SendResult};
    use jm_core::entities::BindingDirection;
    use jm_core::signals::SignalBus;
    use jm_storage::InMemoryStorage;
    use std::sync::Arc;

    use crate::{AdapterResolver, GatewayConfig};

    struct EchoAdapter;
    #[async_trait]
    impl BridgeAdapter for EchoAdapter {
        fn channel_type(&self) -> &str {
            "telegram"
        }
        fn transform_incoming(&self, _payload: &serde_json::Value) -> Result<Incoming, Reason> {
            Err(Reason::UnknownCapability)
        }
        async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<SendResult, Reason> {
            Ok(SendResult { message_id: "echoed".to_string() })
        }
    }

    struct SingleAdapterResolver;
    impl AdapterResolver for SingleAdapterResolver {
        fn resolve(&self, _instance_id: &str) -> Option<Arc<dyn BridgeAdapter>> {
            Some(Arc::new(EchoAdapter))
        }
    }

    async fn seed_binding(storage: &InMemoryStorage, room_id: &str, bridge_id: &str, direction: BindingDirection) {
        storage
            .put_bridge_config_raw(jm_core::entities::BridgeConfig {
                id: bridge_id.to_string(),
                adapter_module: "echo".to_string(),
                enabled: true,
                capabilities: Default::default(),
                opts: Default::default(),
                delivery_policy: None,
                revision: 1,
                label: None,
            })
            .await;
        storage
            .create_room_binding(RoomBinding {
                id: uuid::Uuid::new_v4().to_string(),
                room_id: room_id.to_string(),
                channel: "telegram".to_string(),
                instance_id: bridge_id.to_string(),
                bridge_id: None,
                external_room_id: format!("ext-{bridge_id}"),
                direction,
            })
            .await;
    }

    #[tokio::test]
    async fn no_outbound_bindings_returns_no_routes() {
        let storage = InMemoryStorage::new();
        let gateway = OutboundGateway::new(GatewayConfig::default(), Arc::new(SingleAdapterResolver), SignalBus::new());
        let err = route_outbound("room-1", Operation::SendMessage, OutboundPayload::Text("hi".to_string()), OutboundOptions::default(), &storage, &gateway)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteOutboundError::NoRoutes));
    }

    #[tokio::test]
    async fn best_effort_default_delivers_to_the_single_binding() {
        let storage = InMemoryStorage::new();
        seed_binding(&storage, "room-1", "bridge_a", BindingDirection::Outbound).await;
        let gateway = OutboundGateway::new(GatewayConfig::default(), Arc::new(SingleAdapterResolver), SignalBus::new());
        let outcome = route_outbound("room-1", Operation::SendMessage, OutboundPayload::Text("hi".to_string()), OutboundOptions::default(), &storage, &gateway)
            .await
            .unwrap();
        assert_eq!(outcome.delivered, vec!["bridge_a".to_string()]);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn routing_outcome_is_recorded_on_the_named_message() {
        let storage = InMemoryStorage::new();
        seed_binding(&storage, "room-1", "bridge_a", BindingDirection::Outbound).await;
        let message = storage
            .save_message(jm_core::entities::Message {
                id: "msg-1".to_string(),
                room_id: "room-1".to_string(),
                sender_id: "participant-1".to_string(),
                role: jm_core::entities::MessageRole::Assistant,
                content: vec![],
                external_id: None,
                reply_to_id: None,
                thread_root_id: None,
                status: jm_core::entities::MessageStatus::Sent,
                reactions: Default::default(),
                receipts: Default::default(),
                metadata: Default::default(),
                inserted_at: chrono::Utc::now(),
            })
            .await;

        let gateway = OutboundGateway::new(GatewayConfig::default(), Arc::new(SingleAdapterResolver), SignalBus::new());
        route_outbound_for_message(
            "room-1",
            Some(&message.id),
            Operation::SendMessage,
            OutboundPayload::Text("hi".to_string()),
            OutboundOptions::default(),
            &storage,
            &gateway,
        )
        .await
        .unwrap();

        let saved = storage.get_message(&message.id).await.unwrap();
        let summary = &saved.metadata["outbound_gateway"];
        assert_eq!(summary["attempted"], 1);
        assert_eq!(summary["delivered"][0], "bridge_a");
        assert_eq!(summary["delivery_mode"], "best_effort");
    }

    #[tokio::test]
    async fn inbound_only_bindings_are_excluded_from_routing() {
        let storage = InMemoryStorage::new();
        seed_binding(&storage, "room-1", "bridge_a", BindingDirection::Inbound).await;
        let gateway = OutboundGateway::new(GatewayConfig::default(), Arc::new(SingleAdapterResolver), SignalBus::new());
        let err = route_outbound("room-1", Operation::SendMessage, OutboundPayload::Text("hi".to_string()), OutboundOptions::default(), &storage, &gateway)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteOutboundError::NoRoutes));
    }
}
