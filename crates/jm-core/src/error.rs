//! Shared error taxonomy (spec §7).
//!
//! Every error carries a stable `reason` atom (modeled as a `Reason`
//! variant rather than a bare string, so call sites can match on it) and,
//! where useful, a human `description`. Errors flow up as typed values;
//! only the outbound gateway and replay worker retry, everything else
//! surfaces immediately.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    NotFound,
    Ambiguous,
    InvalidOnboardingId,
    InvalidRequest,
    RevisionConflict,
    PolicyDenied,
    SecurityDenied,
    BridgeNotFound,
    BridgeDisabled,
    InvalidSignature,
    QueueFull,
    LoadShed,
    MissingExternalMessageId,
    UnsupportedMedia,
    MediaPolicyDenied,
    NoRoutes,
    NoRoute,
    NetworkError,
    Timeout,
    UpstreamError,
    RateLimited,
    InvalidTransition,
    UnknownCapability,
    DuplicateDeadLetter,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // serde's snake_case rename gives us the exact atom spelling.
        let json = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", json.as_str().unwrap_or("unknown"))
    }
}

/// Retry classification (spec §4.5 step 7, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Terminal,
    Retryable,
}

impl Reason {
    /// Default classification for reasons that arise from outbound
    /// dispatch. Concrete call sites may override (e.g. a 4xx from an
    /// adapter is always terminal regardless of the reason atom chosen).
    pub fn default_category(self) -> ErrorCategory {
        match self {
            Reason::NetworkError | Reason::Timeout | Reason::UpstreamError | Reason::RateLimited => {
                ErrorCategory::Retryable
            }
            _ => ErrorCategory::Terminal,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("revision conflict: expected {expected}, actual {actual}")]
pub struct RevisionConflict {
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStage {
    Gating,
    Moderation,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("policy denied at {stage:?}: {reason}")]
pub struct PolicyDenied {
    pub stage: PolicyStage,
    pub reason: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityStage {
    VerifySender,
    SanitizeOutbound,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("security denied at {stage:?}: {reason}")]
pub struct SecurityDenied {
    pub stage: SecurityStage,
    pub reason: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("unsupported media: {kind}")]
pub struct UnsupportedMedia {
    pub kind: String,
    pub causes: Vec<String>,
}

/// The outbound gateway's error envelope (spec §4.5, §7).
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("outbound error: {reason} ({category:?}, attempt {attempt}/{max_attempts})")]
pub struct OutboundError {
    pub reason: Reason,
    pub category: ErrorCategory,
    pub disposition: Disposition,
    pub attempt: u32,
    pub max_attempts: u32,
    pub dead_letter_id: Option<String>,
}

impl OutboundError {
    pub fn terminal(reason: Reason) -> Self {
        Self {
            reason,
            category: ErrorCategory::Terminal,
            disposition: Disposition::Terminal,
            attempt: 0,
            max_attempts: 0,
            dead_letter_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Terminal,
    Retry,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub struct LifecycleDiagnostic {
    #[serde(rename = "type")]
    pub diagnostic_type: String,
    pub bridge_id: Option<String>,
    pub path: String,
    pub policy: String,
}

impl std::fmt::Display for LifecycleDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {} (policy={})", self.diagnostic_type, self.path, self.policy)
    }
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("required bridge manifest failed to load: {diagnostic}")]
pub struct FatalRequiredBridgeError {
    pub diagnostic: LifecycleDiagnostic,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("invalid onboarding transition {transition} from {from:?}")]
pub struct InvalidTransition {
    pub from: String,
    pub transition: String,
    pub allowed: Vec<String>,
    pub class: String,
}

/// Top-level error enum most crates in this workspace return from their
/// public operations. Crates with a narrower failure surface (e.g.
/// `jm-storage`) define their own smaller enum instead of forcing callers
/// to match every variant here; this one exists for call sites that
/// genuinely span the taxonomy (ingest, webhook entry).
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum FabricError {
    #[error("not found")]
    NotFound,
    #[error("ambiguous lookup")]
    Ambiguous,
    #[error("invalid onboarding id")]
    InvalidOnboardingId,
    #[error(transparent)]
    RevisionConflict(#[from] RevisionConflict),
    #[error(transparent)]
    PolicyDenied(#[from] PolicyDenied),
    #[error(transparent)]
    SecurityDenied(#[from] SecurityDenied),
    #[error("bridge not found")]
    BridgeNotFound,
    #[error("bridge disabled")]
    BridgeDisabled,
    #[error("invalid signature")]
    InvalidSignature,
    #[error(transparent)]
    UnsupportedMedia(#[from] UnsupportedMedia),
    #[error(transparent)]
    Outbound(#[from] OutboundError),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("no routes available")]
    NoRoutes,
}

pub type Result<T> = std::result::Result<T, FabricError>;
