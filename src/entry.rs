//! Vault entries in their two representations.
//!
//! `StoredEntry` is the wire/storage shape: every secret field is an
//! individually sealed blob. `HydratedEntry` is the in-memory view with
//! plaintext fields, produced by [`StoredEntry::hydrate`] and written back
//! by [`HydratedEntry::seal`]. Nothing carries plaintext and ciphertext
//! side by side, so a view can never go stale against its storage form.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use keyloft_crypto::{derive_subkey, MasterKey, SubKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::aad::{field_aad, metadata_aad};
use crate::envelope::EnvelopeCipher;
use crate::error::VaultError;

/// HKDF purpose label for an entry's own encryption key. One key per
/// entry: compromising it exposes that entry only.
pub fn entry_purpose(entry_id: &str) -> String {
    format!("entry-meta-{entry_id}")
}

/// Storage representation. Secret values are base64 of sealed blobs; an
/// empty `encrypted_metadata` means the entry has no metadata object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trashed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trash_expires_at: Option<i64>,
    pub encrypted_metadata: String,
    pub secrets: BTreeMap<String, String>,
}

impl StoredEntry {
    /// Decrypts this entry into its in-memory view.
    pub fn hydrate(
        &self,
        master: &MasterKey,
        cipher: &EnvelopeCipher,
    ) -> Result<HydratedEntry, VaultError> {
        let key = self.entry_key(master)?;

        let metadata = if self.encrypted_metadata.is_empty() {
            Value::Null
        } else {
            let blob = STANDARD.decode(&self.encrypted_metadata)?;
            let plain = cipher.open_field(&key, &blob, &metadata_aad(&self.id))?;
            serde_json::from_slice(&plain)?
        };

        let mut secrets = BTreeMap::new();
        for (field, sealed) in &self.secrets {
            let blob = STANDARD.decode(sealed)?;
            let plain = cipher.open_field(&key, &blob, &field_aad(&self.id, field))?;
            secrets.insert(field.clone(), String::from_utf8(plain)?);
        }

        Ok(HydratedEntry {
            id: self.id.clone(),
            kind: self.kind.clone(),
            modified: self.modified,
            trashed_at: self.trashed_at,
            trash_expires_at: self.trash_expires_at,
            metadata,
            secrets,
        })
    }

    fn entry_key(&self, master: &MasterKey) -> Result<SubKey, VaultError> {
        Ok(derive_subkey(master, &entry_purpose(&self.id))?)
    }
}

/// In-memory view with plaintext metadata and secret fields.
#[derive(Clone, PartialEq)]
pub struct HydratedEntry {
    pub id: String,
    pub kind: String,
    pub modified: i64,
    pub trashed_at: Option<i64>,
    pub trash_expires_at: Option<i64>,
    pub metadata: Value,
    pub secrets: BTreeMap<String, String>,
}

impl HydratedEntry {
    pub fn new(kind: impl Into<String>, metadata: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            modified: Utc::now().timestamp_millis(),
            trashed_at: None,
            trash_expires_at: None,
            metadata,
            secrets: BTreeMap::new(),
        }
    }

    /// Sets or replaces a secret field and bumps the modified stamp.
    pub fn set_secret(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(field.into(), value.into());
        self.modified = Utc::now().timestamp_millis();
    }

    pub fn secret(&self, field: &str) -> Option<&str> {
        self.secrets.get(field).map(String::as_str)
    }

    /// Encrypts this view back into its storage representation. Every
    /// secret field is sealed separately under the entry key, with the
    /// field name bound as AAD so sealed values cannot be swapped between
    /// fields or entries.
    pub fn seal(
        &self,
        master: &MasterKey,
        cipher: &EnvelopeCipher,
    ) -> Result<StoredEntry, VaultError> {
        let key = derive_subkey(master, &entry_purpose(&self.id))?;

        let encrypted_metadata = if self.metadata.is_null() {
            String::new()
        } else {
            let plain = serde_json::to_vec(&self.metadata)?;
            let blob = cipher.seal_field(&key, &plain, &metadata_aad(&self.id))?;
            STANDARD.encode(blob)
        };

        let mut secrets = BTreeMap::new();
        for (field, value) in &self.secrets {
            let blob = cipher.seal_field(&key, value.as_bytes(), &field_aad(&self.id, field))?;
            secrets.insert(field.clone(), STANDARD.encode(blob));
        }

        Ok(StoredEntry {
            id: self.id.clone(),
            kind: self.kind.clone(),
            modified: self.modified,
            trashed_at: self.trashed_at,
            trash_expires_at: self.trash_expires_at,
            encrypted_metadata,
            secrets,
        })
    }
}

impl fmt::Debug for HydratedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydratedEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("modified", &self.modified)
            .field("trashed_at", &self.trashed_at)
            .field("trash_expires_at", &self.trash_expires_at)
            .field("metadata", &self.metadata)
            .field("secrets", &format!("[{} REDACTED]", self.secrets.len()))
            .finish()
    }
}
