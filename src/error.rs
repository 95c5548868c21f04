//! Error type for ledger operations.

use std::path::PathBuf;
use thiserror::Error;

/// Failures the ledger can report to its callers.
///
/// Corrupt store content is deliberately absent: unreadable JSON loads as an
/// empty store (see [`crate::store`]), trading the lost data for availability.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("usage store unavailable at {}: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to lock usage store {}: {errno}", path.display())]
    Lock { path: PathBuf, errno: nix::errno::Errno },

    #[error("timed out after {waited_ms}ms waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("failed to serialize usage store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid usage input: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
