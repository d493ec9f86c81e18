//! Pluggable dispatch for notifications forwarded from the Hub (§4.3
//! Non-goal: no concrete command parser or LLM wrapper). A real Worker
//! supplies a handler that interprets `eventsub_event` payloads; this crate
//! only ships a logging stand-in.

use async_trait::async_trait;
use ipc_protocol::EventsubEvent;
use tracing::info;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventsubEvent);
}

pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, event: &EventsubEvent) {
        info!(channel_id = %event.channel_id, topic = %event.topic, "received eventsub event");
    }
}
