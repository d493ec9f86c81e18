//! Credential storage seam (C2).
//!
//! Credential storage and the OAuth/token refresh flow live outside this
//! fleet's core (per §1's scope boundary); this crate only defines the
//! interface the Worker and Hub use to fetch a usable token, plus an
//! in-memory stub for tests and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub channel_id: String,
    pub access_token: String,
    /// Set once the store has determined the token cannot be refreshed and
    /// needs operator intervention (§7: "permanent credential failure").
    pub needs_reauth: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential on file for channel {0}")]
    NotFound(String),
    #[error("credential for channel {0} needs reauth")]
    NeedsReauth(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, channel_id: &str) -> Result<Credential, CredentialError>;
    async fn mark_needs_reauth(&self, channel_id: &str);
}

/// An in-memory store for tests and local development. Not durable: restart
/// loses any `mark_needs_reauth` flips applied after construction.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<String, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, channel_id: impl Into<String>, access_token: impl Into<String>) {
        let channel_id = channel_id.into();
        self.credentials.lock().unwrap().insert(
            channel_id.clone(),
            Credential {
                channel_id,
                access_token: access_token.into(),
                needs_reauth: false,
            },
        );
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, channel_id: &str) -> Result<Credential, CredentialError> {
        let credentials = self.credentials.lock().unwrap();
        let cred = credentials
            .get(channel_id)
            .ok_or_else(|| CredentialError::NotFound(channel_id.to_owned()))?;
        if cred.needs_reauth {
            return Err(CredentialError::NeedsReauth(channel_id.to_owned()));
        }
        Ok(cred.clone())
    }

    async fn mark_needs_reauth(&self, channel_id: &str) {
        if let Some(cred) = self.credentials.lock().unwrap().get_mut(channel_id) {
            cred.needs_reauth = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let store = InMemoryCredentialStore::new();
        let err = store.get("100").await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound(c) if c == "100"));
    }

    #[tokio::test]
    async fn marked_credential_errors_until_reinserted() {
        let store = InMemoryCredentialStore::new();
        store.insert("100", "tok-abc");
        store.mark_needs_reauth("100").await;
        let err = store.get("100").await.unwrap_err();
        assert!(matches!(err, CredentialError::NeedsReauth(c) if c == "100"));

        store.insert("100", "tok-def");
        let cred = store.get("100").await.unwrap();
        assert_eq!(cred.access_token, "tok-def");
        assert!(!cred.needs_reauth);
    }
}
