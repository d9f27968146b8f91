//! Sender verification and outbound sanitization contracts (§4.13).
//!
//! Both stages run under a caller-supplied timeout; a timeout is always
//! classified `:retry` per §4.13 — it's the *caller* (ingest for
//! `verify_sender`, the outbound gateway for `sanitize_outbound`) that
//! decides whether a retry-classified timeout denies or degrades, via
//! `VerifyTimeoutPolicy` / `SanitizeTimeoutPolicy`.

pub mod sanitize;
pub mod verify;

pub use sanitize::{sanitize_outbound, OutboundSanitizer, ReferenceSanitizer, SanitizeTimeoutPolicy};
pub use verify::{verify_sender, SenderVerifier, VerifyOutcome, VerifyTimeoutPolicy};

use jm_core::signals::{measurements, metadata, SignalBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityStage {
    VerifySender,
    SanitizeOutbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityClassification {
    Decided,
    /// A timeout; always classified `:retry` per §4.13 regardless of the
    /// fallback action the caller applied.
    Retry,
}

pub(crate) fn emit_decision(
    signals: &SignalBus,
    stage: SecurityStage,
    classification: SecurityClassification,
    action: &str,
    elapsed_ms: u64,
) {
    let stage_label = match stage {
        SecurityStage::VerifySender => "verify_sender",
        SecurityStage::SanitizeOutbound => "sanitize_outbound",
    };
    let classification_label = match classification {
        SecurityClassification::Decided => "decided",
        SecurityClassification::Retry => "retry",
    };
    let mut meta = metadata();
    meta.insert("stage".into(), stage_label.into());
    meta.insert("classification".into(), classification_label.into());
    meta.insert("action".into(), action.into());
    meta.insert("elapsed_ms".into(), elapsed_ms.into());
    signals.emit("security.decision", measurements(), meta);
}
