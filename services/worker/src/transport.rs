//! Pluggable chat-transport seam (§4.3 Non-goal: no concrete chat protocol is
//! implemented here). A real Worker supplies an implementation that speaks
//! whatever chat backend it targets; this crate only ships a no-op stand-in.

use async_trait::async_trait;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
#[error("chat transport error: {0}")]
pub struct TransportError(pub String);

/// Discards every message. Lets the IPC/heartbeat harness run and be tested
/// without a real chat backend wired in.
pub struct NoopChatTransport;

#[async_trait]
impl ChatTransport for NoopChatTransport {
    async fn send_message(&self, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }
}
