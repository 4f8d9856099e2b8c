//! Sync-specific types: transport trait and wire-level data structures.

use async_trait::async_trait;

use crate::error::ErrorKind;

// ============================================================================
// SyncTransport: user-provided network layer
// ============================================================================

/// User-implemented transport carrying the sealed vault blob.
///
/// The core never sees plaintext cross this boundary and never requires a
/// specific protocol. It requires exactly two properties: versions are
/// monotonic, and a concurrent write is detectable through the
/// conditional-put semantics of [`put_blob`](SyncTransport::put_blob).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Current server version, 0 when nothing was ever pushed.
    async fn get_version(&self) -> Result<u64, TransportError>;

    /// The stored blob and the version its writer declared, or `None`
    /// when nothing was ever pushed.
    async fn get_blob(&self) -> Result<Option<RemoteBlob>, TransportError>;

    /// Conditionally stores `blob` as `version`. The write is accepted
    /// only while the server still holds `expected_version`; otherwise
    /// the current server state comes back for another merge round.
    async fn put_blob(
        &self,
        blob: &[u8],
        version: u64,
        expected_version: u64,
    ) -> Result<PutOutcome, TransportError>;
}

/// A blob as stored on the server, with its writer-declared version.
/// The version is part of the blob's AAD, so the pair is exactly what a
/// reader needs to authenticate and decrypt.
#[derive(Debug, Clone)]
pub struct RemoteBlob {
    pub blob: Vec<u8>,
    pub version: u64,
}

/// Result of a conditional put.
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// The server accepted and now holds `version`.
    Accepted { version: u64 },
    /// Someone else wrote first. Carries their state so the caller can
    /// merge and retry without a second round trip.
    Conflict {
        server_version: u64,
        server_blob: Vec<u8>,
    },
}

// ============================================================================
// TransportError
// ============================================================================

/// Transport-level error, wrapping whatever the network layer produced.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub kind: ErrorKind,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Retryable,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}
