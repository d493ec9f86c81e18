use serde_json::Value;

/// A notification forwarded verbatim (payload untouched) from upstream.
#[derive(Debug, Clone)]
pub struct UpstreamEvent {
    pub event_id: String,
    pub topic: String,
    pub channel_id: String,
    pub payload: Value,
}

/// A directive received on the session stream that is not itself an event.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    Event(UpstreamEvent),
    Keepalive,
    Reconnect { new_url: String },
    Revocation { upstream_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    Enabled,
    Pending,
}

#[derive(Debug, Clone)]
pub struct CreateResult {
    pub upstream_id: String,
    pub status: CreateStatus,
    pub cost: i64,
}

#[derive(Debug, Clone)]
pub struct ActiveListing {
    pub upstream_id: String,
    pub topic: String,
    pub channel_id: String,
    pub status: CreateStatus,
    pub cost: i64,
}
