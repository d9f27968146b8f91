//! Gating and moderation policy runners (§4.12).

pub mod gating;
pub mod moderation;

pub use gating::{run_gating, GatingContext, GatingDecision, GatingModule};
pub use moderation::{run_moderation, ModerationDecision, ModerationModule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyTimeoutFallback {
    Deny,
    AllowWithFlag,
}

impl PolicyTimeoutFallback {
    pub fn parse(raw: &str) -> Option<PolicyTimeoutFallback> {
        match raw {
            "deny" => Some(PolicyTimeoutFallback::Deny),
            "allow_with_flag" => Some(PolicyTimeoutFallback::AllowWithFlag),
            _ => None,
        }
    }
}
