//! HKDF-SHA256 subkey derivation.
//!
//! Subkeys are expanded from the master key with a purpose label as the
//! `info` input and no salt; the master key already went through salted
//! Argon2id, and saltless expansion keeps subkeys deterministic across
//! devices given the same master key.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::keys::{MasterKey, SubKey, KEY_LENGTH};

/// Derive 32 bytes of key material from input keying material and an info
/// string.
///
/// # Arguments
/// * `ikm` - Input keying material (the master key bytes)
/// * `info` - Context/purpose label; distinct labels yield independent keys
///
/// # Returns
/// A 32-byte derived key.
pub fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LENGTH], CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_LENGTH];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::DerivationFailed(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

/// Derive a purpose-scoped subkey from the master key.
///
/// Ciphertext sealed under one purpose label cannot be opened with a key
/// derived for another label.
pub fn derive_subkey(master: &MasterKey, purpose: &str) -> Result<SubKey, CryptoError> {
    let okm = hkdf_derive(master.as_bytes(), purpose.as_bytes())?;
    Ok(SubKey::new(okm))
}
