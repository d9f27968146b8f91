//! `sanitize_outbound` contract (§4.13, outbound gateway step 4).
//!
//! Sanitization rules are deterministic and channel-specific; this crate
//! ships one reference implementation covering the rules §4.13 calls out
//! by name for "one chat platform": neutralize mass mentions by inserting
//! a zero-width space after the `@`, normalize CRLF to LF, strip C0
//! control characters (tab and newline excepted).

use std::time::Duration;

use async_trait::async_trait;
use jm_core::error::{SecurityDenied, SecurityStage as CoreSecurityStage};
use jm_core::signals::SignalBus;

use crate::{emit_decision, SecurityClassification, SecurityStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeTimeoutPolicy {
    Deny,
    AllowOriginal,
}

impl SanitizeTimeoutPolicy {
    pub fn parse(raw: &str) -> Option<SanitizeTimeoutPolicy> {
        match raw {
            "deny" => Some(SanitizeTimeoutPolicy::Deny),
            "allow_original" => Some(SanitizeTimeoutPolicy::AllowOriginal),
            _ => None,
        }
    }
}

#[async_trait]
pub trait OutboundSanitizer: Send + Sync {
    async fn sanitize(&self, text: &str) -> String;
}

/// The reference sanitizer named in §4.13.
pub struct ReferenceSanitizer;

const MASS_MENTIONS: &[&str] = &["@everyone", "@here", "@all", "@channel"];

#[async_trait]
impl OutboundSanitizer for ReferenceSanitizer {
    async fn sanitize(&self, text: &str) -> String {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let stripped: String = normalized
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();

        let mut result = stripped;
        for mention in MASS_MENTIONS {
            if result.contains(mention) {
                let neutralized = format!("@\u{200b}{}", &mention[1..]);
                result = result.replace(mention, &neutralized);
            }
        }
        result
    }
}

/// Runs `sanitizer` under `timeout_ms`. On timeout, `Deny` surfaces a
/// `security_denied`; `AllowOriginal` passes the untouched text through
/// (still classified `:retry` in the emitted signal, per §4.13).
pub async fn sanitize_outbound(
    sanitizer: &(dyn OutboundSanitizer),
    text: &str,
    timeout_ms: u64,
    fallback: SanitizeTimeoutPolicy,
    signals: &SignalBus,
) -> Result<String, SecurityDenied> {
    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), sanitizer.sanitize(text)).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(sanitized) => {
            emit_decision(signals, SecurityStage::SanitizeOutbound, SecurityClassification::Decided, "sanitized", elapsed_ms);
            Ok(sanitized)
        }
        Err(_) => match fallback {
            SanitizeTimeoutPolicy::Deny => {
                emit_decision(signals, SecurityStage::SanitizeOutbound, SecurityClassification::Retry, "deny", elapsed_ms);
                Err(SecurityDenied {
                    stage: CoreSecurityStage::SanitizeOutbound,
                    reason: "sanitize_outbound_timeout".to_string(),
                    description: Some(format!("exceeded {timeout_ms}ms")),
                })
            }
            SanitizeTimeoutPolicy::AllowOriginal => {
                emit_decision(signals, SecurityStage::SanitizeOutbound, SecurityClassification::Retry, "allow_original", elapsed_ms);
                Ok(text.to_string())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn neutralizes_mass_mentions() {
        let sanitizer = ReferenceSanitizer;
        let out = sanitizer.sanitize("hey @everyone check this out").await;
        assert!(out.contains("@\u{200b}everyone"));
        assert!(!out.contains("@everyone"));
    }

    #[tokio::test]
    async fn normalizes_crlf_and_strips_control_chars() {
        let sanitizer = ReferenceSanitizer;
        let out = sanitizer.sanitize("line one\r\nline two\u{0007}end").await;
        assert_eq!(out, "line one\nline twoend");
    }

    struct NeverResolves;
    #[async_trait]
    impl OutboundSanitizer for NeverResolves {
        async fn sanitize(&self, _text: &str) -> String {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn timeout_with_deny_denies() {
        let sanitizer = NeverResolves;
        let err = sanitize_outbound(&sanitizer, "hi", 10, SanitizeTimeoutPolicy::Deny, &SignalBus::new()).await.unwrap_err();
        assert_eq!(err.reason, "sanitize_outbound_timeout");
    }

    #[tokio::test]
    async fn timeout_with_allow_original_passes_through_unsanitized() {
        let sanitizer = NeverResolves;
        let out = sanitize_outbound(&sanitizer, "hi @everyone", 10, SanitizeTimeoutPolicy::AllowOriginal, &SignalBus::new())
            .await
            .unwrap();
        assert_eq!(out, "hi @everyone");
    }
}
