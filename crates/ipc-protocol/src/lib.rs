//! Wire protocol and framing for the local IPC sockets between Workers, the
//! EventSub Hub, and the Monitor.
//!
//! Frames are single-line UTF-8 JSON objects terminated by `\n` (`\n` may not
//! appear inside the JSON payload itself, which `serde_json` already
//! guarantees for compact output). Every frame carries a required `type`
//! field; unknown types decode to [`DecodedFrame::Unknown`] rather than an
//! error so forward-compatible peers keep working.

mod backoff;
mod client;
mod framing;
mod messages;

pub use backoff::Backoff;
pub use client::IpcClient;
pub use framing::{encode_line, DecodedFrame, FrameDecoder, FrameError, MAX_LINE_BYTES};
pub use messages::{
    EventsubEvent, Heartbeat, Hello, LlmUsage, Message, Register, Subscribe, Unregister,
    Unsubscribe,
};
