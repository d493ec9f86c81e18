use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    Ws(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("session handshake timed out")]
    HandshakeTimeout,
    #[error("keepalive timeout")]
    KeepaliveTimeout,
    #[error("session stream closed")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("upstream rejected the request on cost grounds")]
    CostExceeded,
    #[error("credential cannot be used (needs reauth)")]
    CredentialInvalid,
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("subscription not found upstream")]
    NotFound,
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ListError {
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}
