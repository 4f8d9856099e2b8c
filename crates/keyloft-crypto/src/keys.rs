//! Key handles that zero their material on drop.
//!
//! Raw key bytes never leave these wrappers except through `as_bytes`, and
//! `Debug` output is redacted so keys cannot leak through logging.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Key length in bytes for every key in the hierarchy (AES-256).
pub const KEY_LENGTH: usize = 32;

/// Master encryption key derived from the user's password.
///
/// Non-extractable by convention: callers hold the handle and pass it to
/// derivation or sealing functions; the raw bytes are only exposed for
/// secret-sharing export, which re-derives them explicitly.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LENGTH,
                got: slice.len(),
            });
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(slice);
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        Self { key: self.key }
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Purpose-scoped subkey expanded from the master key via HKDF.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SubKey {
    key: [u8; KEY_LENGTH],
}

impl SubKey {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl Clone for SubKey {
    fn clone(&self) -> Self {
        Self { key: self.key }
    }
}

impl fmt::Debug for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubKey([REDACTED])")
    }
}
