//! The decrypted vault document: entries, folders, and sync bookkeeping.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::entry::StoredEntry;
use crate::error::VaultError;

/// Current data-shape version. The schema migrator brings older vaults
/// up to this before deserialization.
pub const SCHEMA_VERSION: u32 = 3;

/// How long a trashed entry is retained before purge, in milliseconds.
pub const TRASH_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub schema_version: u32,
    #[serde(default)]
    pub entries: Vec<StoredEntry>,
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
    #[serde(default)]
    pub sync_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Vault {
    pub fn new() -> Self {
        let mut vault = Self {
            schema_version: SCHEMA_VERSION,
            entries: Vec::new(),
            folders: Vec::new(),
            last_sync_at: None,
            sync_version: 0,
            content_hash: None,
        };
        vault.content_hash = Some(vault.compute_content_hash());
        vault
    }

    /// SHA-256 over the sorted entry IDs and the sync version. Entry
    /// order in the vec must not affect the hash.
    pub fn compute_content_hash(&self) -> String {
        let mut ids: Vec<&str> = self.entries.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();

        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.sync_version.to_be_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Marks a local mutation: bumps the sync version and refreshes the
    /// content hash. Every mutating method below calls this.
    pub fn touch(&mut self) {
        self.sync_version += 1;
        self.content_hash = Some(self.compute_content_hash());
    }

    /// Checks the stored content hash against a recomputation. A missing
    /// hash passes: vaults written before hashing never recorded one.
    pub fn verify_content_hash(&self) -> Result<(), VaultError> {
        let Some(expected) = &self.content_hash else {
            return Ok(());
        };
        let got = self.compute_content_hash();
        if *expected != got {
            return Err(VaultError::ContentHashMismatch {
                expected: expected.clone(),
                got,
            });
        }
        Ok(())
    }

    pub fn entry(&self, id: &str) -> Option<&StoredEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut StoredEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Inserts or replaces an entry by ID.
    pub fn upsert_entry(&mut self, entry: StoredEntry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
        self.touch();
    }

    pub fn remove_entry(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    /// Entries not in the trash.
    pub fn active_entries(&self) -> impl Iterator<Item = &StoredEntry> {
        self.entries.iter().filter(|e| e.trashed_at.is_none())
    }

    /// Moves an entry to the trash with the standard retention window.
    pub fn trash_entry(&mut self, id: &str, now: i64) -> Result<(), VaultError> {
        let entry = self
            .entry_mut(id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))?;
        entry.trashed_at = Some(now);
        entry.trash_expires_at = Some(now + TRASH_RETENTION_MS);
        entry.modified = now;
        self.touch();
        Ok(())
    }

    pub fn restore_entry(&mut self, id: &str, now: i64) -> Result<(), VaultError> {
        let entry = self
            .entry_mut(id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))?;
        entry.trashed_at = None;
        entry.trash_expires_at = None;
        entry.modified = now;
        self.touch();
        Ok(())
    }

    /// Physically removes trashed entries whose retention has lapsed.
    /// Returns how many were purged.
    pub fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !matches!(e.trash_expires_at, Some(expiry) if e.trashed_at.is_some() && expiry <= now));
        let purged = before - self.entries.len();
        if purged > 0 {
            self.touch();
        }
        purged
    }

    pub fn add_folder(&mut self, name: impl Into<String>) -> String {
        let folder = Folder {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now().timestamp_millis(),
        };
        let id = folder.id.clone();
        self.folders.push(folder);
        self.touch();
        id
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}
