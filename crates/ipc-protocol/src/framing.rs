use crate::messages::Message;

/// Guards against an unterminated line growing without bound (a stuck or
/// malicious peer). No real frame in this protocol approaches this size.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// The known wire `type` tags, used to distinguish "unknown message type"
/// (logged, discarded, connection kept) from "known type, malformed body"
/// (also discarded, but worth a different log line).
const KNOWN_TYPES: &[&str] = &[
    "hello",
    "subscribe",
    "unsubscribe",
    "eventsub_event",
    "register",
    "heartbeat",
    "unregister",
    "llm_usage",
    "ping",
];

/// Outcome of decoding a single `\n`-terminated line.
#[derive(Debug)]
pub enum DecodedFrame {
    /// Successfully parsed into a known [`Message`] variant.
    Message(Message),
    /// The `type` field names a tag this protocol version doesn't know.
    /// Carries the raw tag for a one-line log entry.
    Unknown(String),
    /// Not valid UTF-8 JSON, missing/non-string `type`, or a known type
    /// with a body that doesn't match its required fields.
    Malformed,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("line exceeded {MAX_LINE_BYTES} bytes without a terminator")]
    LineTooLong,
}

/// Incremental `\n`-delimited JSON decoder.
///
/// Bytes arrive in arbitrary chunks from the socket; `feed` buffers them and
/// returns every complete line as a [`DecodedFrame`], leaving any trailing
/// partial line buffered for the next call.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes, returning every complete frame they produce.
    ///
    /// On [`FrameError::LineTooLong`] the internal buffer is cleared; the
    /// caller should treat this the same as a socket error (per §4.1,
    /// reconnect with backoff).
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<DecodedFrame>, FrameError> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            // Drop the trailing `\n` (and a possible `\r` before it).
            let line = &line[..line.len() - 1];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            out.push(decode_line(line));
        }

        if self.buf.len() > MAX_LINE_BYTES {
            self.buf.clear();
            return Err(FrameError::LineTooLong);
        }

        Ok(out)
    }

    /// True if a partial (unterminated) line is currently buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

fn decode_line(line: &[u8]) -> DecodedFrame {
    let Ok(text) = std::str::from_utf8(line) else {
        return DecodedFrame::Malformed;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return DecodedFrame::Malformed;
    };
    let Some(type_tag) = value.get("type").and_then(|v| v.as_str()) else {
        return DecodedFrame::Malformed;
    };

    if !KNOWN_TYPES.contains(&type_tag) {
        return DecodedFrame::Unknown(type_tag.to_owned());
    }

    match serde_json::from_value::<Message>(value) {
        Ok(msg) => DecodedFrame::Message(msg),
        Err(_) => DecodedFrame::Malformed,
    }
}

/// Encode a message as a single `\n`-terminated line ready to write to a socket.
pub fn encode_line(msg: &Message) -> String {
    let mut s = serde_json::to_string(msg).expect("Message serialization is infallible");
    s.push('\n');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Hello;

    fn hello() -> Message {
        Message::Hello(Hello {
            channel: "somechannel".to_owned(),
            channel_id: "100".to_owned(),
            topics: vec!["stream.online".to_owned()],
        })
    }

    #[test]
    fn feeds_single_complete_line() {
        let mut dec = FrameDecoder::new();
        let line = encode_line(&hello());
        let frames = dec.feed(line.as_bytes()).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], DecodedFrame::Message(Message::Hello(_))));
        assert!(!dec.has_partial());
    }

    #[test]
    fn reassembles_line_fed_byte_at_a_time() {
        let mut dec = FrameDecoder::new();
        let line = encode_line(&hello());
        let mut frames = Vec::new();
        for byte in line.as_bytes() {
            frames.extend(dec.feed(&[*byte]).unwrap());
        }
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], DecodedFrame::Message(Message::Hello(_))));
    }

    #[test]
    fn decodes_multiple_frames_from_one_feed() {
        let mut dec = FrameDecoder::new();
        let mut buf = encode_line(&hello());
        buf.push_str(&encode_line(&Message::Ping));
        let frames = dec.feed(buf.as_bytes()).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], DecodedFrame::Message(Message::Hello(_))));
        assert!(matches!(frames[1], DecodedFrame::Message(Message::Ping)));
    }

    #[test]
    fn partial_line_is_buffered_until_terminator_arrives() {
        let mut dec = FrameDecoder::new();
        let line = encode_line(&hello());
        let (head, tail) = line.split_at(line.len() / 2);
        assert!(dec.feed(head.as_bytes()).unwrap().is_empty());
        assert!(dec.has_partial());
        let frames = dec.feed(tail.as_bytes()).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn unknown_type_is_reported_without_killing_the_stream() {
        let mut dec = FrameDecoder::new();
        let frames = dec.feed(b"{\"type\":\"future_message\"}\n").unwrap();
        assert!(matches!(&frames[0], DecodedFrame::Unknown(t) if t == "future_message"));
    }

    #[test]
    fn malformed_json_is_reported_distinctly_from_unknown_type() {
        let mut dec = FrameDecoder::new();
        let frames = dec.feed(b"not json at all\n").unwrap();
        assert!(matches!(frames[0], DecodedFrame::Malformed));
    }

    #[test]
    fn known_type_with_missing_fields_is_malformed_not_unknown() {
        let mut dec = FrameDecoder::new();
        let frames = dec.feed(b"{\"type\":\"subscribe\"}\n").unwrap();
        assert!(matches!(frames[0], DecodedFrame::Malformed));
    }

    #[test]
    fn oversized_unterminated_line_is_rejected() {
        let mut dec = FrameDecoder::new();
        let junk = vec![b'a'; MAX_LINE_BYTES + 1];
        assert!(matches!(dec.feed(&junk), Err(FrameError::LineTooLong)));
        assert!(!dec.has_partial());
    }
}
