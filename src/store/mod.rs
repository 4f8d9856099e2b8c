//! Key-value persistence for vault records.
//!
//! Every component takes the store as an explicit dependency; nothing in
//! this crate assumes an ambient storage API. Records are small JSON
//! documents or raw blobs addressed by the key constants below.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::error::VaultError;

/// Vault header (KDF version, parameters, AEAD identifier).
pub const VAULT_HEADER_KEY: &str = "vault-header";
/// Random Argon2id salt, written once at vault creation.
pub const KDF_SALT_KEY: &str = "kdf-salt";
/// The encrypted vault blob.
pub const VAULT_BLOB_KEY: &str = "vault-blob";
/// AAD string the current vault blob was sealed with.
pub const VAULT_AAD_KEY: &str = "vault-aad";
/// Sync version of the current vault blob (recovery sidecar).
pub const VAULT_SYNC_VERSION_KEY: &str = "vault-sync-version";
/// Rolling nonce-history ledger.
pub const NONCE_LEDGER_KEY: &str = "nonce-ledger";
/// Migration snapshot, consulted on every startup.
pub const MIGRATION_SNAPSHOT_KEY: &str = "migration-snapshot";
/// Encrypted vault snapshot from the last successful sync (merge ancestor).
pub const SYNC_BASE_KEY: &str = "sync-base";
/// AAD string the sync base snapshot was sealed with.
pub const SYNC_BASE_AAD_KEY: &str = "sync-base-aad";
/// Encrypted application settings.
pub const SETTINGS_BLOB_KEY: &str = "settings-blob";
/// Encrypted sync transport configuration.
pub const SYNC_CONFIG_BLOB_KEY: &str = "sync-config-blob";

/// Injected key-value store.
///
/// Writes of a single key are expected to be atomic; multi-key commit
/// ordering (payload first, then metadata) is the caller's responsibility.
pub trait VaultStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, VaultError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError>;
    fn delete(&self, key: &str) -> Result<(), VaultError>;
}
