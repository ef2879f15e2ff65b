//! Outbound send port: the narrow interface the engine uses to reply.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Send failures the engine must tolerate without crashing.
#[derive(Debug, Error)]
pub enum SendError {
    /// Transport flood control. The engine waits `retry_after` and retries
    /// exactly once, then gives up silently.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// Not allowed to post in this conversation. Logged and dropped.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("send failed: {0}")]
    Other(String),
}

/// Delivers a rendered reply to a conversation, optionally as a reply to
/// the triggering message.
#[async_trait]
pub trait SendPort: Send + Sync {
    async fn send(
        &self,
        conversation_id: &str,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<(), SendError>;
}
