use thiserror::Error;
use uuid::Uuid;

use crate::sync::types::TransportError;

/// Coarse outcome classification so callers branch on a tag, never on
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The same operation may succeed on retry (transient I/O, timeouts,
    /// stale sync versions, wrong password).
    Retryable,
    /// Not recoverable without intervention; never retried automatically.
    Fatal,
    /// Expected outcomes surfaced as errors (nothing found, nothing to do).
    Informational,
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] keyloft_crypto::CryptoError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid UTF-8 in stored record: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("A vault already exists in this store")]
    AlreadyInitialized,

    #[error("Vault record missing: {0}")]
    RecordMissing(&'static str),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Nonce collision budget exhausted after {attempts} attempts")]
    NonceCollision { attempts: u32 },

    #[error("Key derivation timed out after {timeout_ms} ms (request {correlation_id})")]
    ExecutorTimeout { correlation_id: Uuid, timeout_ms: u64 },

    #[error("Key derivation worker unavailable")]
    ExecutorUnavailable,

    #[error("Migration step {from_version} -> {to_version} failed: {reason}")]
    MigrationStep {
        from_version: u32,
        to_version: u32,
        reason: String,
    },

    #[error("A migration is already in progress")]
    MigrationInProgress,

    #[error("Vault schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("Content hash mismatch: expected {expected}, got {got}")]
    ContentHashMismatch { expected: String, got: String },

    #[error("Sync transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sync conflict persisted after re-merge; another writer is racing")]
    SyncConflictPersists,
}

impl VaultError {
    /// Classify this error for retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Storage(_)
            | VaultError::InvalidPassword
            | VaultError::ExecutorTimeout { .. }
            | VaultError::SyncConflictPersists => ErrorKind::Retryable,
            VaultError::Transport(e) => e.kind,
            VaultError::RecordMissing(_)
            | VaultError::EntryNotFound(_)
            | VaultError::AlreadyInitialized
            | VaultError::MigrationInProgress => ErrorKind::Informational,
            VaultError::Crypto(_)
            | VaultError::Json(_)
            | VaultError::Base64(_)
            | VaultError::InvalidUtf8(_)
            | VaultError::NonceCollision { .. }
            | VaultError::ExecutorUnavailable
            | VaultError::MigrationStep { .. }
            | VaultError::SchemaTooNew { .. }
            | VaultError::ContentHashMismatch { .. } => ErrorKind::Fatal,
        }
    }
}
