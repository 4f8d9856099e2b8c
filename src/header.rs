//! Plaintext vault header.
//!
//! The header records which KDF configuration sealed the vault so that
//! unlock can derive the right key before anything is decrypted. It is
//! stored unencrypted: it contains parameters, never secrets.

use chrono::Utc;
use keyloft_crypto::KdfParams;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::store::{VaultStore, VAULT_HEADER_KEY};

pub const HEADER_FORMAT_VERSION: u32 = 1;
pub const KDF_ALGORITHM: &str = "argon2id";
pub const AEAD_ALGORITHM: &str = "aes-256-gcm";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultHeader {
    pub format_version: u32,
    pub kdf_algorithm: String,
    pub kdf_params: KdfParams,
    pub kdf_version: u32,
    pub aead: String,
    pub created_at: i64,
}

impl VaultHeader {
    pub fn new(kdf_version: u32, kdf_params: KdfParams) -> Self {
        Self {
            format_version: HEADER_FORMAT_VERSION,
            kdf_algorithm: KDF_ALGORITHM.to_string(),
            kdf_params,
            kdf_version,
            aead: AEAD_ALGORITHM.to_string(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// Loads the header, or `None` when the record is absent or does not
    /// parse. Vaults created before headers existed have no record, and a
    /// corrupt header must not block unlock, so both cases read as `None`
    /// and the caller falls back to trying known KDF versions.
    pub fn load(store: &dyn VaultStore) -> Result<Option<Self>, VaultError> {
        let Some(bytes) = store.get(VAULT_HEADER_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(header) => Ok(Some(header)),
            Err(err) => {
                tracing::warn!(error = %err, "vault header unreadable, ignoring");
                Ok(None)
            }
        }
    }

    pub fn save(&self, store: &dyn VaultStore) -> Result<(), VaultError> {
        let bytes = serde_json::to_vec(self)?;
        store.put(VAULT_HEADER_KEY, &bytes)
    }
}
