//! Argon2id master-key derivation.
//!
//! The vault layer owns the versioned parameter table; this module runs a
//! single derivation with whatever parameters it is handed and returns the
//! key in wipe-on-drop wrappers.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::MasterKey;

/// Smallest salt Argon2id will accept.
pub const MIN_SALT_LENGTH: usize = 8;

/// Argon2id cost parameters for one KDF version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    #[serde(rename = "memoryKiB")]
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub hash_len: u32,
}

/// Derive raw key bytes from a password and salt.
///
/// # Arguments
/// * `password` - The user's password bytes
/// * `salt` - Per-vault random salt, at least [`MIN_SALT_LENGTH`] bytes
/// * `params` - Argon2id cost parameters
///
/// # Returns
/// `params.hash_len` bytes of derived key material, wiped on drop.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if salt.len() < MIN_SALT_LENGTH {
        return Err(CryptoError::SaltTooShort {
            min: MIN_SALT_LENGTH,
            got: salt.len(),
        });
    }

    let argon_params = argon2::Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(params.hash_len as usize),
    )
    .map_err(|e| CryptoError::InvalidKdfParams(e.to_string()))?;
    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut output = Zeroizing::new(vec![0u8; params.hash_len as usize]);
    argon2
        .hash_password_into(password, salt, output.as_mut())
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
    Ok(output)
}

/// Derive a [`MasterKey`] handle directly, leaving no raw copy behind.
pub fn derive_master_key(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<MasterKey, CryptoError> {
    let raw = derive_key(password, salt, params)?;
    MasterKey::from_slice(&raw)
}
