//! Tempfile-rooted Unix socket path helpers for IPC integration tests.

use std::path::PathBuf;
use tempfile::TempDir;

/// A scratch directory holding only Unix socket paths for one test. Keeping
/// the `TempDir` alive for the test's duration ensures the paths stay valid
/// and are cleaned up on drop.
pub struct SocketDir {
    dir: TempDir,
}

impl SocketDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir for test sockets"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for SocketDir {
    fn default() -> Self {
        Self::new()
    }
}
