use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Worker -> Hub. Establishes (or re-establishes) the route table entry for
/// `channel_id` and asserts the worker's full desired topic set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub channel: String,
    pub channel_id: String,
    pub topics: Vec<String>,
}

/// Worker -> Hub. Adds a single (channel_id, topic) to Desired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscribe {
    pub channel_id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Worker -> Hub. Removes a single (channel_id, topic) from Desired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unsubscribe {
    pub channel_id: String,
    pub topic: String,
}

/// Hub -> Worker. The upstream notification forwarded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventsubEvent {
    pub channel_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Worker -> Monitor. Upserts a WorkerRegistration with status=online.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Register {
    pub channel: String,
    pub pid: u32,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

/// Worker -> Monitor. Refreshes last_heartbeat, optionally samples RSS/CPU.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub channel: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rss_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_pct: Option<f64>,
}

/// Worker -> Monitor. Marks a WorkerRegistration status=offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unregister {
    pub channel: String,
    pub pid: u32,
}

/// Worker -> Monitor. Appends a TelemetryRecord.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmUsage {
    pub channel: String,
    pub model: String,
    pub feature: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
    pub estimated_cost: f64,
}

/// The full set of message types this core exchanges over IPC (§6.1).
///
/// Tagged on `type` so a heterogeneous (possibly non-Rust) peer can encode
/// the same wire shape without sharing this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Hello(Hello),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    EventsubEvent(EventsubEvent),
    Register(Register),
    Heartbeat(Heartbeat),
    Unregister(Unregister),
    LlmUsage(LlmUsage),
    /// Optional keepalive; receivers ignore it.
    Ping,
}

impl Message {
    /// The wire `type` tag, used for logging unknown/rejected frames.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::Subscribe(_) => "subscribe",
            Message::Unsubscribe(_) => "unsubscribe",
            Message::EventsubEvent(_) => "eventsub_event",
            Message::Register(_) => "register",
            Message::Heartbeat(_) => "heartbeat",
            Message::Unregister(_) => "unregister",
            Message::LlmUsage(_) => "llm_usage",
            Message::Ping => "ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips_through_json() {
        let msg = Message::Hello(Hello {
            channel: "somechannel".to_owned(),
            channel_id: "100".to_owned(),
            topics: vec!["stream.online".to_owned(), "stream.offline".to_owned()],
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"hello\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn subscribe_omits_absent_version() {
        let msg = Message::Subscribe(Subscribe {
            channel_id: "100".to_owned(),
            topic: "stream.online".to_owned(),
            version: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("version"));
    }

    #[test]
    fn ping_has_no_payload_fields() {
        let json = serde_json::to_string(&Message::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn type_name_matches_wire_tag() {
        let msg = Message::LlmUsage(LlmUsage {
            channel: "c".to_owned(),
            model: "gpt".to_owned(),
            feature: "trivia".to_owned(),
            tokens_in: 10,
            tokens_out: 20,
            latency_ms: 5,
            estimated_cost: 0.01,
        });
        assert_eq!(msg.type_name(), "llm_usage");
    }
}
