//! Randomness source abstraction.
//!
//! Nonce and coefficient generation go through [`RandomSource`] so callers
//! can inject a deterministic source in tests. Production code uses
//! [`OsRandom`], which reads from the operating system RNG.

use crate::error::CryptoError;

/// A source of cryptographically secure random bytes.
pub trait RandomSource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), CryptoError>;
}

/// Operating-system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        getrandom::getrandom(buf).map_err(|e| CryptoError::RngFailed(e.to_string()))
    }
}
