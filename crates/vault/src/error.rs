use std::path::PathBuf;

use thiserror::Error;

/// Boundary errors for vault parsing, resolution, and integrity checks.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("not a vault uri: {0:?}")]
    InvalidUri(String),

    #[error("invalid kind {kind:?} in {uri:?}")]
    UnknownKind { kind: String, uri: String },

    #[error("no vault root configured for vault_id={0:?}")]
    MissingVaultRoot(String),

    #[error("missing file: {0}")]
    NotFound(PathBuf),

    #[error("sha256 mismatch for {uri}: expected={expected} actual={actual}")]
    Sha256Mismatch {
        uri: String,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl VaultError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
