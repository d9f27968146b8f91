//! A reference bridge adapter used only by this binary and by tests
//! elsewhere in the workspace (§2 "Non-goals": concrete platform
//! bindings are out of scope; this exists purely so the pipeline can be
//! exercised end-to-end without a real Telegram/Discord/Slack/WhatsApp
//! codec).
//!
//! `transform_incoming` expects `{"room": ..., "user": ..., "id"?: ...,
//! "text"?: ..., "chat_type"?: ...}` and `send_message` always succeeds,
//! echoing back a freshly minted external message id.

use async_trait::async_trait;
use jm_core::adapter::{BridgeAdapter, Capability, Incoming, SendResult};
use jm_core::error::Reason;

pub struct EchoAdapter;

#[async_trait]
impl BridgeAdapter for EchoAdapter {
    fn channel_type(&self) -> &str {
        "echo"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::CheckHealth]
    }

    fn transform_incoming(&self, payload: &serde_json::Value) -> Result<Incoming, Reason> {
        let room = payload.get("room").and_then(|v| v.as_str()).ok_or(Reason::InvalidRequest)?;
        let user = payload.get("user").and_then(|v| v.as_str()).ok_or(Reason::InvalidRequest)?;
        Ok(Incoming {
            external_room_id: room.to_string(),
            external_user_id: user.to_string(),
            external_message_id: payload.get("id").and_then(|v| v.as_str()).map(str::to_string),
            external_reply_to_id: payload.get("reply_to_id").and_then(|v| v.as_str()).map(str::to_string),
            text: payload.get("text").and_then(|v| v.as_str()).map(str::to_string),
            username: payload.get("username").and_then(|v| v.as_str()).map(str::to_string),
            display_name: None,
            chat_type: payload.get("chat_type").and_then(|v| v.as_str()).map(str::to_string),
            timestamp: Some(chrono::Utc::now()),
            raw: payload.clone(),
        })
    }

    async fn send_message(&self, _external_room_id: &str, _text: &str) -> Result<SendResult, Reason> {
        Ok(SendResult { message_id: format!("echo-{}", uuid::Uuid::new_v4()) })
    }

    async fn check_health(&self) -> bool {
        true
    }
}
