use thiserror::Error;

/// Errors from cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Salt too short: need at least {min} bytes, got {got}")]
    SaltTooShort { min: usize, got: usize },

    #[error("Encrypted data too short")]
    DataTooShort,

    #[error("Invalid KDF parameters: {0}")]
    InvalidKdfParams(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),

    #[error("Cannot split an empty secret")]
    EmptySecret,

    #[error("Threshold must be at least {min}, got {got}")]
    ThresholdTooSmall { min: u8, got: u8 },

    #[error("Threshold {threshold} exceeds share count {count}")]
    ThresholdExceedsShares { threshold: u8, count: u8 },

    #[error("Need at least {min} shares to reconstruct, got {got}")]
    NotEnoughShares { min: usize, got: usize },

    #[error("Share index 0 is reserved for the secret itself")]
    ZeroShareIndex,

    #[error("Duplicate share index {0}")]
    DuplicateShareIndex(u8),

    #[error("Share length mismatch: expected {expected} bytes, got {got}")]
    ShareLengthMismatch { expected: usize, got: usize },

    #[error("Malformed share encoding: {0}")]
    MalformedShare(String),
}
