//! Test-only helpers shared across the fleet's integration suites: a mock
//! upstream EventSub WS+HTTP service, and tempfile-rooted Unix socket paths
//! for IPC tests.

mod mock_upstream;
mod uds;

pub use mock_upstream::{MockEventSubHttp, MockEventSubWs};
pub use uds::SocketDir;
