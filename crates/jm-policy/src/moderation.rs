//! Moderation contract and sequential runner (§4.12, ingest pipeline step 6).

use std::time::Duration;

use async_trait::async_trait;
use jm_core::entities::Message;
use jm_core::error::{PolicyDenied, PolicyStage};
use jm_core::signals::{measurements, metadata, SignalBus};
use serde_json::json;

use crate::PolicyTimeoutFallback;

#[derive(Debug, Clone)]
pub enum ModerationDecision {
    Allow,
    Flag { reason: String, description: Option<String> },
    Modify(Message),
    Reject { reason: String, description: Option<String> },
}

#[async_trait]
pub trait ModerationModule: Send + Sync {
    fn name(&self) -> &str;
    async fn moderate(&self, message: &Message) -> ModerationDecision;
}

/// Runs every module in order against a running `message` value, threading
/// modifications through. A reject short-circuits; flags accumulate into
/// `metadata.policy.flags` rather than stopping the pipeline.
pub async fn run_moderation(
    modules: &[std::sync::Arc<dyn ModerationModule>],
    mut message: Message,
    timeout_ms: u64,
    fallback: PolicyTimeoutFallback,
    signals: &SignalBus,
) -> Result<Message, PolicyDenied> {
    for module in modules {
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), module.moderate(&message)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let decision = match outcome {
            Ok(decision) => decision,
            Err(_) => match fallback {
                PolicyTimeoutFallback::Deny => ModerationDecision::Reject {
                    reason: "moderation_timeout".to_string(),
                    description: Some(format!("{} exceeded {timeout_ms}ms", module.name())),
                },
                PolicyTimeoutFallback::AllowWithFlag => ModerationDecision::Flag {
                    reason: "moderation_timeout".to_string(),
                    description: Some(format!("{} exceeded {timeout_ms}ms", module.name())),
                },
            },
        };

        let outcome_label = match &decision {
            ModerationDecision::Allow => "allow",
            ModerationDecision::Flag { .. } => "flag",
            ModerationDecision::Modify(_) => "modify",
            ModerationDecision::Reject { .. } => "reject",
        };
        emit_decision(signals, module.name(), outcome_label, elapsed_ms);

        match decision {
            ModerationDecision::Allow => {}
            ModerationDecision::Flag { reason, description } => {
                push_flag(&mut message, &reason, description.as_deref());
            }
            ModerationDecision::Modify(new_message) => {
                message = new_message;
            }
            ModerationDecision::Reject { reason, description } => {
                return Err(PolicyDenied { stage: PolicyStage::Moderation, reason, description });
            }
        }
    }
    Ok(message)
}

fn push_flag(message: &mut Message, reason: &str, description: Option<&str>) {
    let policy_entry = message
        .metadata
        .entry("policy".to_string())
        .or_insert_with(|| json!({"flags": []}));
    if let Some(flags) = policy_entry.get_mut("flags").and_then(|v| v.as_array_mut()) {
        flags.push(json!({"reason": reason, "description": description}));
    }
}

fn emit_decision(signals: &SignalBus, policy_module: &str, outcome: &str, elapsed_ms: u64) {
    let mut meta = metadata();
    meta.insert("stage".into(), "moderation".into());
    meta.insert("policy_module".into(), policy_module.into());
    meta.insert("outcome".into(), outcome.into());
    meta.insert("elapsed_ms".into(), elapsed_ms.into());
    signals.emit("ingest.policy.decision", measurements(), meta);
}
