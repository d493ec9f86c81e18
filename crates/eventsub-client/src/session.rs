//! Upstream WebSocket session: handshake, keepalive tracking, and
//! notification/directive decoding for the EventSub Hub's session manager
//! (the `connecting`/`connected` half of its state machine; reconnection and
//! backoff are the caller's responsibility, see §4.5.1).

use crate::error::SessionError;
use crate::types::{SessionMessage, UpstreamEvent};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message as WsMsg;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Deserialize)]
struct WireFrame {
    message_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WelcomePayload {
    session_id: String,
    keepalive_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    event_id: String,
    topic: String,
    channel_id: String,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ReconnectPayload {
    new_url: String,
}

#[derive(Debug, Deserialize)]
struct RevocationPayload {
    upstream_id: String,
}

/// An established upstream session, past the handshake.
pub struct EventSubSession {
    ws: WsStream,
    session_id: String,
    keepalive_interval: Duration,
}

impl EventSubSession {
    /// Connect and wait for the session handshake, bounded by
    /// `handshake_timeout` (§4.5.4: "session_handshake_timeout, default 10s").
    pub async fn connect(url: &str, handshake_timeout: Duration) -> Result<Self, SessionError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let mut session = EventSubSession {
            ws,
            session_id: String::new(),
            keepalive_interval: Duration::from_secs(30),
        };
        tokio::time::timeout(handshake_timeout, session.wait_for_welcome())
            .await
            .map_err(|_| SessionError::HandshakeTimeout)??;
        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// Wait for the next meaningful message, treating a missed keepalive
    /// (no frame within 1.5x the advertised interval) as connection loss.
    pub async fn recv(&mut self) -> Result<SessionMessage, SessionError> {
        let timeout = self.keepalive_interval.mul_f64(1.5);
        loop {
            let next = tokio::time::timeout(timeout, self.ws.next())
                .await
                .map_err(|_| SessionError::KeepaliveTimeout)?;
            match next {
                None => return Err(SessionError::Disconnected),
                Some(Err(e)) => return Err(SessionError::Ws(e.to_string())),
                Some(Ok(WsMsg::Text(text))) => {
                    if let Some(msg) = decode_frame(&text)? {
                        return Ok(msg);
                    }
                    // Keepalive or an unrecognized frame type; keep waiting.
                }
                Some(Ok(WsMsg::Ping(data))) => {
                    let _ = self.ws.send(WsMsg::Pong(data)).await;
                }
                Some(Ok(WsMsg::Close(_))) => return Err(SessionError::Disconnected),
                Some(Ok(_)) => {}
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    async fn wait_for_welcome(&mut self) -> Result<(), SessionError> {
        loop {
            match self.ws.next().await {
                None => return Err(SessionError::Disconnected),
                Some(Err(e)) => return Err(SessionError::Ws(e.to_string())),
                Some(Ok(WsMsg::Text(text))) => {
                    let frame: WireFrame = serde_json::from_str(&text)
                        .map_err(|e| SessionError::Protocol(format!("welcome parse: {e}")))?;
                    if frame.message_type == "session_welcome" {
                        let welcome: WelcomePayload =
                            serde_json::from_value(frame.payload).map_err(|e| {
                                SessionError::Protocol(format!("welcome payload: {e}"))
                            })?;
                        self.session_id = welcome.session_id;
                        self.keepalive_interval =
                            Duration::from_secs(welcome.keepalive_interval_secs.max(1));
                        return Ok(());
                    }
                    debug!(message_type = %frame.message_type, "ignoring frame before welcome");
                }
                Some(Ok(WsMsg::Ping(data))) => {
                    let _ = self.ws.send(WsMsg::Pong(data)).await;
                }
                Some(Ok(WsMsg::Close(_))) => return Err(SessionError::Disconnected),
                Some(Ok(_)) => {}
            }
        }
    }

}

/// Decode a single text frame into a [`SessionMessage`], or `None` for a
/// keepalive / unrecognized frame type that the caller should just wait past.
fn decode_frame(text: &str) -> Result<Option<SessionMessage>, SessionError> {
    let frame: WireFrame = serde_json::from_str(text)
        .map_err(|e| SessionError::Protocol(format!("frame parse: {e}")))?;
    match frame.message_type.as_str() {
        "session_keepalive" => Ok(Some(SessionMessage::Keepalive)),
        "notification" => {
            let n: NotificationPayload = serde_json::from_value(frame.payload)
                .map_err(|e| SessionError::Protocol(format!("notification payload: {e}")))?;
            Ok(Some(SessionMessage::Event(UpstreamEvent {
                event_id: n.event_id,
                topic: n.topic,
                channel_id: n.channel_id,
                payload: n.payload,
            })))
        }
        "reconnect" => {
            let r: ReconnectPayload = serde_json::from_value(frame.payload)
                .map_err(|e| SessionError::Protocol(format!("reconnect payload: {e}")))?;
            Ok(Some(SessionMessage::Reconnect { new_url: r.new_url }))
        }
        "revocation" => {
            let r: RevocationPayload = serde_json::from_value(frame.payload)
                .map_err(|e| SessionError::Protocol(format!("revocation payload: {e}")))?;
            Ok(Some(SessionMessage::Revocation {
                upstream_id: r.upstream_id,
            }))
        }
        other => {
            warn!(message_type = other, "unrecognized upstream frame type");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_frame_yields_none_event() {
        let msg = decode_frame(r#"{"message_type":"session_keepalive"}"#).unwrap();
        assert!(matches!(msg, Some(SessionMessage::Keepalive)));
    }

    #[test]
    fn notification_frame_decodes_to_event() {
        let text = r#"{"message_type":"notification","payload":{"event_id":"e1","topic":"stream.online","channel_id":"100","payload":{"foo":"bar"}}}"#;
        match decode_frame(text).unwrap() {
            Some(SessionMessage::Event(e)) => {
                assert_eq!(e.event_id, "e1");
                assert_eq!(e.topic, "stream.online");
                assert_eq!(e.channel_id, "100");
            }
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn reconnect_frame_carries_new_url() {
        let text = r#"{"message_type":"reconnect","payload":{"new_url":"wss://example/new"}}"#;
        match decode_frame(text).unwrap() {
            Some(SessionMessage::Reconnect { new_url }) => {
                assert_eq!(new_url, "wss://example/new");
            }
            other => panic!("expected Reconnect, got {other:?}"),
        }
    }

    #[test]
    fn revocation_frame_carries_upstream_id() {
        let text = r#"{"message_type":"revocation","payload":{"upstream_id":"up-1"}}"#;
        match decode_frame(text).unwrap() {
            Some(SessionMessage::Revocation { upstream_id }) => {
                assert_eq!(upstream_id, "up-1");
            }
            other => panic!("expected Revocation, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_is_ignored_not_an_error() {
        let msg = decode_frame(r#"{"message_type":"something_new"}"#).unwrap();
        assert!(msg.is_none());
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let err = decode_frame("not json").unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }
}
