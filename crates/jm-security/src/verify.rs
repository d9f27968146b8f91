//! `verify_sender` contract (§4.13, ingest pipeline step 7).
//!
//! An adapter that can assert a claimed sender identity (separate from
//! the `external_user_id` already resolved to a participant) implements
//! [`SenderVerifier`]; ingest runs it under a bounded timeout and denies
//! `sender_claim_mismatch` when the claim disagrees with the resolved
//! external user id.

use std::time::Duration;

use async_trait::async_trait;
use jm_core::adapter::Incoming;
use jm_core::error::{SecurityDenied, SecurityStage as CoreSecurityStage};
use jm_core::signals::SignalBus;

use crate::{emit_decision, SecurityClassification, SecurityStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyTimeoutPolicy {
    Deny,
    AllowWithFlag,
}

impl VerifyTimeoutPolicy {
    pub fn parse(raw: &str) -> Option<VerifyTimeoutPolicy> {
        match raw {
            "deny" => Some(VerifyTimeoutPolicy::Deny),
            "allow_with_flag" => Some(VerifyTimeoutPolicy::AllowWithFlag),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// No claimed sender, or the claim matches `external_user_id`.
    Ok,
    /// The adapter's claimed sender disagrees with `external_user_id`.
    Mismatch { claimed: String },
}

/// Adapters that can assert a claimed sender identity implement this.
/// Channels with no such concept (most of them) never need it — ingest
/// treats "no verifier registered for this channel" as always `Ok`.
#[async_trait]
pub trait SenderVerifier: Send + Sync {
    async fn verify(&self, incoming: &Incoming, raw_payload: &serde_json::Value) -> VerifyOutcome;
}

/// Runs `verifier` (if any) under `timeout_ms`. `None` means the channel
/// declares no verifier and always passes.
pub async fn verify_sender(
    verifier: Option<&(dyn SenderVerifier)>,
    incoming: &Incoming,
    raw_payload: &serde_json::Value,
    timeout_ms: u64,
    fallback: VerifyTimeoutPolicy,
    signals: &SignalBus,
) -> Result<(), SecurityDenied> {
    let Some(verifier) = verifier else {
        return Ok(());
    };

    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), verifier.verify(incoming, raw_payload)).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(VerifyOutcome::Ok) => {
            emit_decision(signals, SecurityStage::VerifySender, SecurityClassification::Decided, "allow", elapsed_ms);
            Ok(())
        }
        Ok(VerifyOutcome::Mismatch { claimed }) => {
            emit_decision(signals, SecurityStage::VerifySender, SecurityClassification::Decided, "deny", elapsed_ms);
            Err(SecurityDenied {
                stage: CoreSecurityStage::VerifySender,
                reason: "sender_claim_mismatch".to_string(),
                description: Some(format!("claimed sender {claimed} does not match external_user_id")),
            })
        }
        Err(_) => match fallback {
            VerifyTimeoutPolicy::Deny => {
                emit_decision(signals, SecurityStage::VerifySender, SecurityClassification::Retry, "deny", elapsed_ms);
                Err(SecurityDenied {
                    stage: CoreSecurityStage::VerifySender,
                    reason: "verify_sender_timeout".to_string(),
                    description: Some(format!("exceeded {timeout_ms}ms")),
                })
            }
            VerifyTimeoutPolicy::AllowWithFlag => {
                emit_decision(signals, SecurityStage::VerifySender, SecurityClassification::Retry, "allow_with_flag", elapsed_ms);
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn sample_incoming() -> Incoming {
        Incoming {
            external_room_id: "chat_42".to_string(),
            external_user_id: "user_1".to_string(),
            external_message_id: Some("msg_100".to_string()),
            external_reply_to_id: None,
            text: Some("hello".to_string()),
            username: None,
            display_name: None,
            chat_type: Some("group".to_string()),
            timestamp: Some(Utc::now()),
            raw: json!({}),
        }
    }

    struct MismatchVerifier;
    #[async_trait]
    impl SenderVerifier for MismatchVerifier {
        async fn verify(&self, _incoming: &Incoming, _raw: &serde_json::Value) -> VerifyOutcome {
            VerifyOutcome::Mismatch { claimed: "user_spoofed".to_string() }
        }
    }

    struct NeverResolves;
    #[async_trait]
    impl SenderVerifier for NeverResolves {
        async fn verify(&self, _incoming: &Incoming, _raw: &serde_json::Value) -> VerifyOutcome {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn no_verifier_always_passes() {
        let result =
            verify_sender(None, &sample_incoming(), &json!({}), 100, VerifyTimeoutPolicy::Deny, &SignalBus::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn mismatch_denies() {
        let verifier = MismatchVerifier;
        let err = verify_sender(Some(&verifier), &sample_incoming(), &json!({}), 100, VerifyTimeoutPolicy::Deny, &SignalBus::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason, "sender_claim_mismatch");
    }

    #[tokio::test]
    async fn timeout_with_deny_fallback_denies() {
        let verifier = NeverResolves;
        let err = verify_sender(Some(&verifier), &sample_incoming(), &json!({}), 10, VerifyTimeoutPolicy::Deny, &SignalBus::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason, "verify_sender_timeout");
    }

    #[tokio::test]
    async fn timeout_with_allow_with_flag_passes() {
        let verifier = NeverResolves;
        let result =
            verify_sender(Some(&verifier), &sample_incoming(), &json!({}), 10, VerifyTimeoutPolicy::AllowWithFlag, &SignalBus::new())
                .await;
        assert!(result.is_ok());
    }
}
