//! Gating contract and sequential runner (§4.12, ingest pipeline step 5).

use std::time::Duration;

use async_trait::async_trait;
use jm_core::error::{PolicyDenied, PolicyStage};
use jm_core::signals::{measurements, metadata, SignalBus};

use crate::PolicyTimeoutFallback;

/// Everything a gater needs to evaluate an inbound message before it's
/// persisted. Mirrors ingest's `Context` (§4.4) minus the fields a gater
/// has no business inspecting.
#[derive(Debug, Clone)]
pub struct GatingContext {
    pub channel: String,
    pub instance_id: String,
    pub room_id: String,
    pub participant_id: String,
    pub external_user_id: String,
    pub chat_type: Option<String>,
}

#[derive(Debug, Clone)]
pub enum GatingDecision {
    Allow,
    Deny { reason: String, description: Option<String> },
}

#[async_trait]
pub trait GatingModule: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, context: &GatingContext) -> GatingDecision;
}

/// Runs every module in order, bounded by `timeout_ms` each. A deny
/// short-circuits; a timeout resolves per `fallback` (deny, or allow with
/// no flag attached since gating itself has no message to flag).
pub async fn run_gating(
    modules: &[std::sync::Arc<dyn GatingModule>],
    context: &GatingContext,
    timeout_ms: u64,
    fallback: PolicyTimeoutFallback,
    signals: &SignalBus,
) -> Result<(), PolicyDenied> {
    for module in modules {
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), module.check(context)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let decision = match outcome {
            Ok(decision) => decision,
            Err(_) => match fallback {
                PolicyTimeoutFallback::Deny => GatingDecision::Deny {
                    reason: "gating_timeout".to_string(),
                    description: Some(format!("{} exceeded {timeout_ms}ms", module.name())),
                },
                PolicyTimeoutFallback::AllowWithFlag => GatingDecision::Allow,
            },
        };

        let outcome_label = match &decision {
            GatingDecision::Allow => "allow",
            GatingDecision::Deny { .. } => "deny",
        };
        emit_decision(signals, "gating", module.name(), outcome_label, elapsed_ms);

        if let GatingDecision::Deny { reason, description } = decision {
            return Err(PolicyDenied { stage: PolicyStage::Gating, reason, description });
        }
    }
    Ok(())
}

fn emit_decision(signals: &SignalBus, stage: &str, policy_module: &str, outcome: &str, elapsed_ms: u64) {
    let mut meta = metadata();
    meta.insert("stage".into(), stage.into());
    meta.insert("policy_module".into(), policy_module.into());
    meta.insert("outcome".into(), outcome.into());
    meta.insert("elapsed_ms".into(), elapsed_ms.into());
    signals.emit("ingest.policy.decision", measurements(), meta);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAllow;
    #[async_trait]
    impl GatingModule for AlwaysAllow {
        fn name(&self) -> &str {
            "always_allow"
        }
        async fn check(&self, _context: &GatingContext) -> GatingDecision {
            GatingDecision::Allow
        }
    }

    struct AlwaysDeny;
    #[async_trait]
    impl GatingModule for AlwaysDeny {
        fn name(&self) -> &str {
            "always_deny"
        }
        async fn check(&self, _context: &GatingContext) -> GatingDecision {
            GatingDecision::Deny { reason: "blocked".to_string(), description: None }
        }
    }

    struct NeverResolves;
    #[async_trait]
    impl GatingModule for NeverResolves {
        fn name(&self) -> &str {
            "never_resolves"
        }
        async fn check(&self, _context: &GatingContext) -> GatingDecision {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn sample_context() -> GatingContext {
        GatingContext {
            channel: "telegram".to_string(),
            instance_id: "bridge_a".to_string(),
            room_id: "room_1".to_string(),
            participant_id: "participant_1".to_string(),
            external_user_id: "user_1".to_string(),
            chat_type: Some("group".to_string()),
        }
    }

    #[tokio::test]
    async fn all_allow_passes() {
        let modules: Vec<std::sync::Arc<dyn GatingModule>> = vec![std::sync::Arc::new(AlwaysAllow)];
        let result = run_gating(&modules, &sample_context(), 100, PolicyTimeoutFallback::Deny, &SignalBus::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn first_deny_short_circuits() {
        let modules: Vec<std::sync::Arc<dyn GatingModule>> =
            vec![std::sync::Arc::new(AlwaysDeny), std::sync::Arc::new(AlwaysAllow)];
        let err = run_gating(&modules, &sample_context(), 100, PolicyTimeoutFallback::Deny, &SignalBus::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason, "blocked");
    }

    #[tokio::test]
    async fn timeout_with_deny_fallback_denies() {
        let modules: Vec<std::sync::Arc<dyn GatingModule>> = vec![std::sync::Arc::new(NeverResolves)];
        let err = run_gating(&modules, &sample_context(), 10, PolicyTimeoutFallback::Deny, &SignalBus::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason, "gating_timeout");
    }

    #[tokio::test]
    async fn timeout_with_allow_with_flag_fallback_passes() {
        let modules: Vec<std::sync::Arc<dyn GatingModule>> = vec![std::sync::Arc::new(NeverResolves)];
        let result =
            run_gating(&modules, &sample_context(), 10, PolicyTimeoutFallback::AllowWithFlag, &SignalBus::new()).await;
        assert!(result.is_ok());
    }
}
