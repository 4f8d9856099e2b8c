//! Vault lifecycle: creation, unlock, and the operations available while
//! the vault is open.
//!
//! `VaultSession` holds the master key for exactly as long as the vault is
//! unlocked; dropping the session wipes it. All persistence goes through
//! the injected [`VaultStore`], all derivation through the injected
//! [`KeyDerivationExecutor`], so embedders choose their own storage and
//! isolation story. Persist order everywhere is payload first, then
//! metadata (ledger, header, snapshots).

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use keyloft_crypto::{derive_subkey, shamir, MasterKey, OsRandom, RandomSource, Share, SubKey};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::aad::{vault_aad, SETTINGS_AAD, SYNC_CONFIG_AAD};
use crate::audit::{AuditEvent, AuditLog, AuditSeverity, NullAuditLog};
use crate::entry::HydratedEntry;
use crate::envelope::{EnvelopeCipher, SETTINGS_PURPOSE, SYNC_CONFIG_PURPOSE, VAULT_MAIN_PURPOSE};
use crate::error::VaultError;
use crate::executor::KeyDerivationExecutor;
use crate::header::VaultHeader;
use crate::kdf::{params_for_version, KdfManager, CURRENT_KDF_VERSION};
use crate::migrate::{RecoveryOutcome, SchemaMigrator};
use crate::store::{
    VaultStore, KDF_SALT_KEY, SETTINGS_BLOB_KEY, SYNC_BASE_AAD_KEY, SYNC_BASE_KEY,
    SYNC_CONFIG_BLOB_KEY, VAULT_AAD_KEY, VAULT_BLOB_KEY, VAULT_HEADER_KEY, VAULT_SYNC_VERSION_KEY,
};
use crate::sync::{SyncClient, SyncOutcome};
use crate::vault::{Folder, Vault};

/// Argon2id salt length for new vaults.
pub const SALT_LENGTH: usize = 16;

/// Dependencies for opening or creating a vault. Audit sink and
/// randomness source default to [`NullAuditLog`] and [`OsRandom`].
pub struct SessionOptions {
    pub store: Arc<dyn VaultStore>,
    pub executor: Arc<dyn KeyDerivationExecutor>,
    pub audit: Option<Arc<dyn AuditLog>>,
    pub rng: Option<Arc<dyn RandomSource>>,
}

impl SessionOptions {
    pub fn new(store: Arc<dyn VaultStore>, executor: Arc<dyn KeyDerivationExecutor>) -> Self {
        Self {
            store,
            executor,
            audit: None,
            rng: None,
        }
    }
}

/// An unlocked vault.
pub struct VaultSession {
    store: Arc<dyn VaultStore>,
    audit: Arc<dyn AuditLog>,
    rng: Arc<dyn RandomSource>,
    cipher: EnvelopeCipher,
    kdf: KdfManager,
    master: MasterKey,
    header: VaultHeader,
    vault: Vault,
    salt: Vec<u8>,
    kdf_migration_pending: bool,
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession").finish_non_exhaustive()
    }
}

impl VaultSession {
    /// Initializes a brand-new vault in an empty store and returns it
    /// unlocked. Refuses to run where a vault (or a pre-header vault blob)
    /// already exists.
    pub async fn create(options: SessionOptions, password: &[u8]) -> Result<Self, VaultError> {
        let SessionOptions {
            store,
            executor,
            audit,
            rng,
        } = options;
        if store.get(VAULT_HEADER_KEY)?.is_some() || store.get(VAULT_BLOB_KEY)?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }
        let rng: Arc<dyn RandomSource> = rng.unwrap_or_else(|| Arc::new(OsRandom));
        let audit: Arc<dyn AuditLog> = audit.unwrap_or_else(|| Arc::new(NullAuditLog));

        let mut salt = vec![0u8; SALT_LENGTH];
        rng.fill(&mut salt)?;

        let kdf = KdfManager::new(executor);
        let master = kdf
            .derive_master_key(password, &salt, CURRENT_KDF_VERSION)
            .await?;
        let header = VaultHeader::new(CURRENT_KDF_VERSION, params_for_version(CURRENT_KDF_VERSION));

        store.put(KDF_SALT_KEY, &salt)?;
        header.save(&*store)?;

        let cipher = EnvelopeCipher::new(rng.clone(), audit.clone());
        let mut session = Self {
            store,
            audit,
            rng,
            cipher,
            kdf,
            master,
            header,
            vault: Vault::new(),
            salt,
            kdf_migration_pending: false,
        };
        session.save()?;

        session.audit.record(AuditEvent::new(
            AuditSeverity::Info,
            "vault-created",
            "new vault initialized",
        ));
        tracing::info!(kdf_version = CURRENT_KDF_VERSION, "vault created");
        Ok(session)
    }

    /// Opens an existing vault.
    ///
    /// Startup order: roll back any interrupted migration, then try KDF
    /// candidates until one opens the persisted blob, then bring the
    /// decrypted document up to the current schema. A header that
    /// disagrees with the key that actually opened the vault (pre-header
    /// vault, interrupted re-key, doctored parameters) is rewritten to
    /// match before the session is returned.
    pub async fn unlock(options: SessionOptions, password: &[u8]) -> Result<Self, VaultError> {
        let SessionOptions {
            store,
            executor,
            audit,
            rng,
        } = options;
        let rng: Arc<dyn RandomSource> = rng.unwrap_or_else(|| Arc::new(OsRandom));
        let audit: Arc<dyn AuditLog> = audit.unwrap_or_else(|| Arc::new(NullAuditLog));

        let migrator = SchemaMigrator::new(store.clone());
        match migrator.recover_incomplete_migration()? {
            RecoveryOutcome::Clean => {}
            RecoveryOutcome::Restored { target_version } => {
                audit.record(AuditEvent::new(
                    AuditSeverity::Warning,
                    "migration-rolled-back",
                    format!("interrupted migration to version {target_version} rolled back at startup"),
                ));
            }
            RecoveryOutcome::BackupMissing => {
                audit.record(AuditEvent::new(
                    AuditSeverity::Warning,
                    "migration-recovered",
                    "interrupted migration had no backup, kept last committed state",
                ));
            }
        }

        let salt = store
            .get(KDF_SALT_KEY)?
            .ok_or(VaultError::RecordMissing(KDF_SALT_KEY))?;
        let header = VaultHeader::load(&*store)?;
        let cipher = EnvelopeCipher::load(&*store, rng.clone(), audit.clone())?;
        let kdf = KdfManager::new(executor);

        let blob = store
            .get(VAULT_BLOB_KEY)?
            .ok_or(VaultError::RecordMissing(VAULT_BLOB_KEY))?;
        let aad = String::from_utf8(
            store
                .get(VAULT_AAD_KEY)?
                .ok_or(VaultError::RecordMissing(VAULT_AAD_KEY))?,
        )?;

        let outcome = kdf
            .attempt_unlock(password, &salt, header.as_ref(), |candidate| {
                derive_subkey(candidate, VAULT_MAIN_PURPOSE)
                    .map(|key| cipher.open(&key, &blob, &aad).is_ok())
                    .unwrap_or(false)
            })
            .await?;

        let vault_key = derive_subkey(&outcome.master, VAULT_MAIN_PURPOSE)?;
        let plain = Zeroizing::new(cipher.open(&vault_key, &blob, &aad)?);
        let mut document: Value = serde_json::from_slice(&plain)?;
        let schema_migrated = migrator.migrate_value(&mut document)?;
        let vault: Vault = serde_json::from_value(document)?;
        vault.verify_content_hash()?;

        let canonical = params_for_version(outcome.used_version);
        let header = match header {
            Some(h) if h.kdf_version == outcome.used_version && h.kdf_params == canonical => h,
            _ => {
                let healed = VaultHeader::new(outcome.used_version, canonical);
                healed.save(&*store)?;
                tracing::warn!(
                    version = outcome.used_version,
                    "vault header rewritten to match the key that opened the vault"
                );
                healed
            }
        };
        let kdf_migration_pending = outcome.used_version < CURRENT_KDF_VERSION;

        let mut session = Self {
            store,
            audit,
            rng,
            cipher,
            kdf,
            master: outcome.master,
            header,
            vault,
            salt,
            kdf_migration_pending,
        };

        if schema_migrated {
            session.save()?;
            migrator.complete()?;
            session.audit.record(AuditEvent::new(
                AuditSeverity::Info,
                "schema-migrated",
                format!(
                    "vault schema migrated to version {}",
                    session.vault.schema_version
                ),
            ));
        }

        tracing::info!(
            kdf_version = session.header.kdf_version,
            kdf_migration_pending = session.kdf_migration_pending,
            "vault unlocked"
        );
        Ok(session)
    }

    /// Seals the vault and persists blob, AAD sidecar, sync-version
    /// sidecar, and finally the nonce ledger.
    fn save(&mut self) -> Result<(), VaultError> {
        let aad = vault_aad(self.vault.schema_version, self.vault.sync_version);
        let plain = Zeroizing::new(serde_json::to_vec(&self.vault)?);
        let key = self.vault_key()?;
        let blob = self.cipher.seal(&key, &plain, &aad)?;

        self.store.put(VAULT_BLOB_KEY, &blob)?;
        self.store.put(VAULT_AAD_KEY, aad.as_bytes())?;
        self.store.put(
            VAULT_SYNC_VERSION_KEY,
            self.vault.sync_version.to_string().as_bytes(),
        )?;
        self.cipher.persist_ledger(&*self.store)
    }

    fn vault_key(&self) -> Result<SubKey, VaultError> {
        Ok(derive_subkey(&self.master, VAULT_MAIN_PURPOSE)?)
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    /// Decrypted views of all entries not in the trash.
    pub fn entries(&self) -> Result<Vec<HydratedEntry>, VaultError> {
        self.vault
            .active_entries()
            .map(|e| e.hydrate(&self.master, &self.cipher))
            .collect()
    }

    pub fn entry(&self, id: &str) -> Result<HydratedEntry, VaultError> {
        let entry = self
            .vault
            .entry(id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))?;
        entry.hydrate(&self.master, &self.cipher)
    }

    /// Seals and stores an entry, inserting or replacing by ID.
    pub fn put_entry(&mut self, entry: &HydratedEntry) -> Result<(), VaultError> {
        let sealed = entry.seal(&self.master, &self.cipher)?;
        self.vault.upsert_entry(sealed);
        self.save()
    }

    pub fn trash_entry(&mut self, id: &str) -> Result<(), VaultError> {
        self.vault.trash_entry(id, Utc::now().timestamp_millis())?;
        self.save()
    }

    pub fn restore_entry(&mut self, id: &str) -> Result<(), VaultError> {
        self.vault.restore_entry(id, Utc::now().timestamp_millis())?;
        self.save()
    }

    /// Physically removes trashed entries whose retention has lapsed.
    pub fn purge_expired(&mut self) -> Result<usize, VaultError> {
        let purged = self.vault.purge_expired(Utc::now().timestamp_millis());
        if purged > 0 {
            self.save()?;
        }
        Ok(purged)
    }

    pub fn add_folder(&mut self, name: impl Into<String>) -> Result<String, VaultError> {
        let id = self.vault.add_folder(name);
        self.save()?;
        Ok(id)
    }

    pub fn folders(&self) -> &[Folder] {
        &self.vault.folders
    }

    // ------------------------------------------------------------------
    // Settings and sync configuration
    // ------------------------------------------------------------------

    /// Seals opaque application settings under their own subkey, outside
    /// the vault blob.
    pub fn put_settings(&self, settings: &Value) -> Result<(), VaultError> {
        self.put_sealed_record(SETTINGS_PURPOSE, SETTINGS_AAD, SETTINGS_BLOB_KEY, settings)
    }

    pub fn settings(&self) -> Result<Option<Value>, VaultError> {
        self.get_sealed_record(SETTINGS_PURPOSE, SETTINGS_AAD, SETTINGS_BLOB_KEY)
    }

    pub fn put_sync_config(&self, config: &Value) -> Result<(), VaultError> {
        self.put_sealed_record(
            SYNC_CONFIG_PURPOSE,
            SYNC_CONFIG_AAD,
            SYNC_CONFIG_BLOB_KEY,
            config,
        )
    }

    pub fn sync_config(&self) -> Result<Option<Value>, VaultError> {
        self.get_sealed_record(SYNC_CONFIG_PURPOSE, SYNC_CONFIG_AAD, SYNC_CONFIG_BLOB_KEY)
    }

    fn put_sealed_record(
        &self,
        purpose: &str,
        aad: &str,
        store_key: &str,
        value: &Value,
    ) -> Result<(), VaultError> {
        let key = derive_subkey(&self.master, purpose)?;
        let plain = Zeroizing::new(serde_json::to_vec(value)?);
        let blob = self.cipher.seal(&key, &plain, aad)?;
        self.store.put(store_key, &blob)?;
        self.cipher.persist_ledger(&*self.store)
    }

    fn get_sealed_record(
        &self,
        purpose: &str,
        aad: &str,
        store_key: &str,
    ) -> Result<Option<Value>, VaultError> {
        let Some(blob) = self.store.get(store_key)? else {
            return Ok(None);
        };
        let key = derive_subkey(&self.master, purpose)?;
        let plain = Zeroizing::new(self.cipher.open(&key, &blob, aad)?);
        Ok(Some(serde_json::from_slice(&plain)?))
    }

    // ------------------------------------------------------------------
    // KDF migration and recovery
    // ------------------------------------------------------------------

    /// Re-keys the vault to the current KDF parameters. Returns false when
    /// nothing is pending.
    ///
    /// The password is re-verified against the session key first: a typo
    /// must not re-key the vault to a password the user does not know.
    /// Everything sealed under the old master (vault, entries, settings,
    /// sync config, sync base) is rewritten under the new one. The rewrite
    /// is wrapped in the migration snapshot so a crash at any point rolls
    /// back to the old key's ciphertext on next startup; a crash after the
    /// payload commit but before the header swap is healed by the unlock
    /// version fallback instead.
    pub async fn migrate_kdf(&mut self, password: &[u8]) -> Result<bool, VaultError> {
        if !self.kdf_migration_pending {
            return Ok(false);
        }

        let check = self
            .kdf
            .derive_master_key(password, &self.salt, self.header.kdf_version)
            .await?;
        if check != self.master {
            return Err(VaultError::InvalidPassword);
        }

        let (new_master, new_header) = self.kdf.migrate(password, &self.salt).await?;

        // Read out everything still sealed under the old key, and re-seal
        // the entries, before touching session state: a failure up to here
        // leaves the session fully usable.
        let settings = self.settings()?;
        let sync_config = self.sync_config()?;
        let sync_base = self.read_sync_base()?;
        let mut resealed = Vec::with_capacity(self.vault.entries.len());
        for entry in &self.vault.entries {
            let hydrated = entry.hydrate(&self.master, &self.cipher)?;
            resealed.push(hydrated.seal(&new_master, &self.cipher)?);
        }

        let migrator = SchemaMigrator::new(self.store.clone());
        migrator.begin_rekey()?;

        let from_version = self.header.kdf_version;
        self.master = new_master;
        self.header = new_header;
        self.vault.entries = resealed;
        self.vault.touch();
        self.save()?;

        if let Some(settings) = &settings {
            self.put_settings(settings)?;
        }
        if let Some(config) = &sync_config {
            self.put_sync_config(config)?;
        }
        if let Some((plain, aad)) = &sync_base {
            let key = self.vault_key()?;
            let blob = self.cipher.seal(&key, plain, aad)?;
            self.store.put(SYNC_BASE_KEY, &blob)?;
            self.store.put(SYNC_BASE_AAD_KEY, aad.as_bytes())?;
            self.cipher.persist_ledger(&*self.store)?;
        }

        self.header.save(&*self.store)?;
        migrator.complete()?;
        self.kdf_migration_pending = false;

        self.audit.record(AuditEvent::new(
            AuditSeverity::Info,
            "kdf-migrated",
            format!("re-keyed from kdf version {from_version} to {CURRENT_KDF_VERSION}"),
        ));
        tracing::info!(
            from = from_version,
            to = CURRENT_KDF_VERSION,
            "kdf migration committed"
        );
        Ok(true)
    }

    /// Decrypted bytes and AAD of the sync base snapshot, if one exists
    /// and still opens. The base only advises merging, so an unreadable
    /// one is dropped rather than treated as an error.
    fn read_sync_base(&self) -> Result<Option<(Zeroizing<Vec<u8>>, String)>, VaultError> {
        let Some(blob) = self.store.get(SYNC_BASE_KEY)? else {
            return Ok(None);
        };
        let Some(aad_bytes) = self.store.get(SYNC_BASE_AAD_KEY)? else {
            return Ok(None);
        };
        let aad = String::from_utf8(aad_bytes)?;
        let key = self.vault_key()?;
        match self.cipher.open(&key, &blob, &aad) {
            Ok(plain) => Ok(Some((Zeroizing::new(plain), aad))),
            Err(_) => {
                tracing::warn!("sync base snapshot unreadable, not carrying it across re-key");
                Ok(None)
            }
        }
    }

    /// Splits the raw master key bytes into recovery shares. Requires the
    /// password again; the session's non-extractable handle is never read
    /// back out.
    pub async fn export_recovery_shares(
        &self,
        password: &[u8],
        share_count: u8,
        threshold: u8,
    ) -> Result<Vec<Share>, VaultError> {
        let (check, raw) = self
            .kdf
            .derive_master_key_with_raw(password, &self.salt, self.header.kdf_version)
            .await?;
        if check != self.master {
            return Err(VaultError::InvalidPassword);
        }

        let shares = shamir::split(&raw, share_count, threshold, self.rng.as_ref())?;
        self.audit.record(AuditEvent::new(
            AuditSeverity::Info,
            "recovery-shares-exported",
            format!("{share_count} shares issued, threshold {threshold}"),
        ));
        Ok(shares)
    }

    /// Rebuilds the master key from recovery shares. Fewer shares than the
    /// original threshold produce a key that simply fails to open anything.
    pub fn recover_master_key(shares: &[Share]) -> Result<MasterKey, VaultError> {
        let secret = Zeroizing::new(shamir::reconstruct(shares)?);
        Ok(MasterKey::from_slice(&secret)?)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Runs one pull/merge/push cycle against the client's transport. The
    /// client persists the accepted vault and base snapshot itself.
    pub async fn sync(&mut self, client: &SyncClient) -> Result<SyncOutcome, VaultError> {
        let key = self.vault_key()?;
        client
            .sync(&mut self.vault, &key, &self.cipher, &*self.store)
            .await
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn header(&self) -> &VaultHeader {
        &self.header
    }

    /// True when the vault still owes a re-key to current KDF parameters.
    pub fn kdf_migration_pending(&self) -> bool {
        self.kdf_migration_pending
    }
}
