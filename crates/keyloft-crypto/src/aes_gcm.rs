//! AES-256-GCM sealing for vault payloads.
//!
//! Wire format: `[nonce:12][ciphertext+tag]` (the 16-byte tag is part of
//! the GCM ciphertext). The nonce is supplied by the caller so the envelope
//! layer can check it against the persisted nonce history before use.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::CryptoError;
use crate::rand::RandomSource;

/// AES-256 key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes.
pub const AES_GCM_NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// Generate a random 12-byte nonce from the given source.
pub fn generate_nonce(rng: &dyn RandomSource) -> Result<[u8; AES_GCM_NONCE_LENGTH], CryptoError> {
    let mut nonce = [0u8; AES_GCM_NONCE_LENGTH];
    rng.fill(&mut nonce)?;
    Ok(nonce)
}

/// Encrypt plaintext with AES-256-GCM under the given nonce.
///
/// # Arguments
/// * `key` - 32-byte encryption key
/// * `nonce` - 12-byte nonce; must never repeat for this key
/// * `plaintext` - Data to encrypt
/// * `aad` - Additional authenticated data bound into the tag
///
/// # Returns
/// `nonce || ciphertext_with_tag`.
pub fn aes_gcm_encrypt(
    key: &[u8],
    nonce: &[u8; AES_GCM_NONCE_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        });
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(AES_GCM_NONCE_LENGTH + ciphertext.len());
    result.extend_from_slice(nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a blob produced by [`aes_gcm_encrypt`].
///
/// Fails closed on tag or AAD mismatch; no partial plaintext is ever
/// returned.
pub fn aes_gcm_decrypt(key: &[u8], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        });
    }
    if blob.len() < AES_GCM_NONCE_LENGTH + AES_GCM_TAG_LENGTH {
        return Err(CryptoError::DataTooShort);
    }

    let (nonce, ciphertext) = blob.split_at(AES_GCM_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}
