use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("registry integrity check failed: {0}")]
    IntegrityCheckFailed(String),
}
