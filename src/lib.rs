//! Password vault core: versioned key derivation, AEAD envelope sealing,
//! crash-safe schema migration, and three-way sync merge.

pub mod aad;
pub mod audit;
pub mod entry;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod header;
pub mod kdf;
pub mod merge;
pub mod migrate;
pub mod nonce_ledger;
pub mod session;
pub mod store;
pub mod sync;
pub mod vault;

pub use aad::{field_aad, metadata_aad, vault_aad, SETTINGS_AAD, SYNC_CONFIG_AAD};
pub use audit::{AuditEvent, AuditLog, AuditSeverity, MemoryAuditLog, NullAuditLog};
pub use entry::{HydratedEntry, StoredEntry};
pub use envelope::{
    EnvelopeCipher, NONCE_RETRY_BUDGET, SETTINGS_PURPOSE, SYNC_CONFIG_PURPOSE, VAULT_MAIN_PURPOSE,
};
pub use error::{ErrorKind, VaultError};
pub use executor::{InProcessExecutor, IsolatedExecutor, KeyDerivationExecutor};
pub use header::VaultHeader;
pub use kdf::{
    params_for_version, KdfManager, UnlockOutcome, CURRENT_KDF_VERSION, OLDEST_KDF_VERSION,
};
pub use merge::{merge_with_floor, three_way_merge, Conflict, MergeOutcome, MERGE_TIME_FLOOR};
pub use migrate::{MigrationSnapshot, MigrationState, RecoveryOutcome, SchemaMigrator};
pub use nonce_ledger::{NonceLedger, NONCE_HISTORY_CAP};
pub use session::{SessionOptions, VaultSession, SALT_LENGTH};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{MemoryStore, VaultStore};
pub use sync::{PutOutcome, RemoteBlob, SyncClient, SyncOutcome, SyncTransport, TransportError};
pub use vault::{Folder, Vault, SCHEMA_VERSION, TRASH_RETENTION_MS};

pub use keyloft_crypto::{
    derive_subkey, share_from_string, share_to_string, KdfParams, MasterKey, Share, SubKey,
};
