//! Abstracted upstream EventSub integration (§6.2): a WebSocket session
//! manager for the real-time half, and an HTTP CREATE/DELETE/LIST client for
//! the reconciliation half. Neither retries nor reconnects on its own — the
//! Hub's session manager and reconciliation loop own that policy.

mod error;
mod http;
mod session;
mod types;

pub use error::{CreateError, DeleteError, ListError, SessionError};
pub use http::{EventSubHttpClient, EventSubHttpConfig};
pub use session::EventSubSession;
pub use types::{ActiveListing, CreateResult, CreateStatus, SessionMessage, UpstreamEvent};
