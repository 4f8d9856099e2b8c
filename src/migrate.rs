//! Durable, resumable schema migration.
//!
//! Migration transforms the decrypted vault document between data-shape
//! versions. Before touching anything it snapshots the sealed vault bytes
//! so a crash mid-migration can always be rolled back to the last
//! committed state. Commit order is payload first, metadata second: the
//! caller persists the transformed vault, then clears the snapshot.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VaultError;
use crate::store::{
    VaultStore, MIGRATION_SNAPSHOT_KEY, SETTINGS_BLOB_KEY, SYNC_BASE_AAD_KEY, SYNC_BASE_KEY,
    SYNC_CONFIG_BLOB_KEY, VAULT_AAD_KEY, VAULT_BLOB_KEY, VAULT_SYNC_VERSION_KEY,
};
use crate::vault::SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MigrationState {
    Normal,
    Migrating,
    RollingBack,
}

/// Pre-migration copies of every record a migration or re-key may rewrite.
/// Blobs are base64. A `None` means the record did not exist, and restore
/// leaves it alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSnapshot {
    pub state: MigrationState,
    pub target_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_vault: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_aad: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_sync_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_settings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_sync_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_sync_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_sync_base_aad: Option<String>,
}

/// What startup recovery found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No migration was in flight.
    Clean,
    /// An interrupted migration was rolled back to the snapshot.
    Restored { target_version: u32 },
    /// A migration was marked in flight but no backup existed. The vault
    /// is at its last committed state; the migration must be re-attempted.
    BackupMissing,
}

pub struct SchemaMigrator {
    store: Arc<dyn VaultStore>,
}

impl SchemaMigrator {
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self { store }
    }

    /// Brings a decrypted vault document up to [`SCHEMA_VERSION`],
    /// applying one step per version. Returns whether anything changed.
    ///
    /// On `true` the caller must persist the re-sealed vault and then call
    /// [`complete`](Self::complete); until then the snapshot keeps the
    /// pre-migration bytes recoverable.
    pub fn migrate_value(&self, vault: &mut Value) -> Result<bool, VaultError> {
        let found = vault
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;

        if found > SCHEMA_VERSION {
            return Err(VaultError::SchemaTooNew {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        if found == SCHEMA_VERSION {
            return Ok(false);
        }

        if let Some(snapshot) = self.load_snapshot()? {
            if snapshot.state != MigrationState::Normal {
                return Err(VaultError::MigrationInProgress);
            }
        }

        self.begin(SCHEMA_VERSION)?;
        tracing::info!(from = found, to = SCHEMA_VERSION, "migrating vault schema");

        for step in (found + 1)..=SCHEMA_VERSION {
            if let Err(reason) = apply_step(step, vault) {
                self.mark_rolling_back()?;
                return Err(VaultError::MigrationStep {
                    from_version: step - 1,
                    to_version: step,
                    reason,
                });
            }
            vault["schemaVersion"] = Value::from(step);
        }
        Ok(true)
    }

    /// Marks the migration committed. Call only after the transformed
    /// vault has been persisted.
    pub fn complete(&self) -> Result<(), VaultError> {
        self.clear_snapshot()
    }

    /// Snapshots the sealed vault ahead of a re-keying rewrite that keeps
    /// the schema version. Same contract as
    /// [`migrate_value`](Self::migrate_value): persist the rewritten vault,
    /// then call [`complete`](Self::complete); a crash in between is rolled
    /// back by [`recover_incomplete_migration`](Self::recover_incomplete_migration).
    pub fn begin_rekey(&self) -> Result<(), VaultError> {
        if let Some(snapshot) = self.load_snapshot()? {
            if snapshot.state != MigrationState::Normal {
                return Err(VaultError::MigrationInProgress);
            }
        }
        self.begin(SCHEMA_VERSION)
    }

    /// Startup check, to run before any other vault access. Restores the
    /// snapshot backup if a migration never committed.
    pub fn recover_incomplete_migration(&self) -> Result<RecoveryOutcome, VaultError> {
        let Some(snapshot) = self.load_snapshot()? else {
            return Ok(RecoveryOutcome::Clean);
        };
        if snapshot.state == MigrationState::Normal {
            self.clear_snapshot()?;
            return Ok(RecoveryOutcome::Clean);
        }

        match &snapshot.backup_vault {
            Some(backup) => {
                let blob = STANDARD.decode(backup)?;
                self.store.put(VAULT_BLOB_KEY, &blob)?;
                if let Some(aad) = &snapshot.backup_aad {
                    self.store.put(VAULT_AAD_KEY, aad.as_bytes())?;
                }
                if let Some(sync_version) = snapshot.backup_sync_version {
                    self.store
                        .put(VAULT_SYNC_VERSION_KEY, sync_version.to_string().as_bytes())?;
                }
                if let Some(settings) = &snapshot.backup_settings {
                    self.store.put(SETTINGS_BLOB_KEY, &STANDARD.decode(settings)?)?;
                }
                if let Some(config) = &snapshot.backup_sync_config {
                    self.store
                        .put(SYNC_CONFIG_BLOB_KEY, &STANDARD.decode(config)?)?;
                }
                if let Some(base) = &snapshot.backup_sync_base {
                    self.store.put(SYNC_BASE_KEY, &STANDARD.decode(base)?)?;
                }
                if let Some(base_aad) = &snapshot.backup_sync_base_aad {
                    self.store.put(SYNC_BASE_AAD_KEY, base_aad.as_bytes())?;
                }
                self.clear_snapshot()?;
                tracing::warn!(
                    target_version = snapshot.target_version,
                    "interrupted schema migration rolled back"
                );
                Ok(RecoveryOutcome::Restored {
                    target_version: snapshot.target_version,
                })
            }
            None => {
                self.clear_snapshot()?;
                tracing::warn!(
                    target_version = snapshot.target_version,
                    "interrupted schema migration had no backup, keeping last committed state"
                );
                Ok(RecoveryOutcome::BackupMissing)
            }
        }
    }

    /// Snapshots the sealed pre-migration records and marks migration
    /// begun.
    fn begin(&self, target_version: u32) -> Result<(), VaultError> {
        let backup_vault = self
            .store
            .get(VAULT_BLOB_KEY)?
            .map(|blob| STANDARD.encode(blob));
        let backup_aad = match self.store.get(VAULT_AAD_KEY)? {
            Some(bytes) => Some(String::from_utf8(bytes)?),
            None => None,
        };
        let backup_sync_version = match self.store.get(VAULT_SYNC_VERSION_KEY)? {
            Some(bytes) => String::from_utf8(bytes)?
                .parse::<u64>()
                .map(Some)
                .map_err(|e| VaultError::Storage(format!("bad sync version record: {e}")))?,
            None => None,
        };
        let backup_settings = self
            .store
            .get(SETTINGS_BLOB_KEY)?
            .map(|blob| STANDARD.encode(blob));
        let backup_sync_config = self
            .store
            .get(SYNC_CONFIG_BLOB_KEY)?
            .map(|blob| STANDARD.encode(blob));
        let backup_sync_base = self
            .store
            .get(SYNC_BASE_KEY)?
            .map(|blob| STANDARD.encode(blob));
        let backup_sync_base_aad = match self.store.get(SYNC_BASE_AAD_KEY)? {
            Some(bytes) => Some(String::from_utf8(bytes)?),
            None => None,
        };

        self.save_snapshot(&MigrationSnapshot {
            state: MigrationState::Migrating,
            target_version,
            backup_vault,
            backup_aad,
            backup_sync_version,
            backup_settings,
            backup_sync_config,
            backup_sync_base,
            backup_sync_base_aad,
        })
    }

    fn mark_rolling_back(&self) -> Result<(), VaultError> {
        if let Some(mut snapshot) = self.load_snapshot()? {
            snapshot.state = MigrationState::RollingBack;
            self.save_snapshot(&snapshot)?;
        }
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<MigrationSnapshot>, VaultError> {
        let Some(bytes) = self.store.get(MIGRATION_SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save_snapshot(&self, snapshot: &MigrationSnapshot) -> Result<(), VaultError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.store.put(MIGRATION_SNAPSHOT_KEY, &bytes)
    }

    fn clear_snapshot(&self) -> Result<(), VaultError> {
        self.store.delete(MIGRATION_SNAPSHOT_KEY)
    }
}

/// Applies the transformation that brings a vault to `to_version`.
fn apply_step(to_version: u32, vault: &mut Value) -> Result<(), String> {
    match to_version {
        2 => step_ensure_collections(vault),
        3 => step_per_entry_encryption(vault),
        other => Err(format!("no migration step defined for version {other}")),
    }
}

/// v1 -> v2: entry and folder collections become mandatory arrays.
fn step_ensure_collections(vault: &mut Value) -> Result<(), String> {
    let obj = vault
        .as_object_mut()
        .ok_or("vault document is not an object")?;
    obj.entry("entries").or_insert_with(|| Value::Array(Vec::new()));
    obj.entry("folders").or_insert_with(|| Value::Array(Vec::new()));
    Ok(())
}

/// v2 -> v3: entries gain per-entry encryption fields and trash stamps.
fn step_per_entry_encryption(vault: &mut Value) -> Result<(), String> {
    let entries = vault
        .get_mut("entries")
        .and_then(Value::as_array_mut)
        .ok_or("entries collection missing")?;
    for entry in entries {
        let obj = entry.as_object_mut().ok_or("entry is not an object")?;
        obj.entry("encryptedMetadata")
            .or_insert_with(|| Value::String(String::new()));
        obj.entry("secrets")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        obj.entry("modified").or_insert(Value::from(0));
        obj.entry("trashedAt").or_insert(Value::Null);
        obj.entry("trashExpiresAt").or_insert(Value::Null);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::vault::Vault;
    use serde_json::json;

    fn migrator() -> (Arc<MemoryStore>, SchemaMigrator) {
        let store = Arc::new(MemoryStore::new());
        let migrator = SchemaMigrator::new(store.clone());
        (store, migrator)
    }

    fn v1_document() -> Value {
        json!({
            "schemaVersion": 1,
            "entries": [
                {"id": "e1", "type": "login", "modified": 10},
                {"id": "e2", "type": "note"}
            ],
            "syncVersion": 4
        })
    }

    fn bare_snapshot(state: MigrationState) -> MigrationSnapshot {
        MigrationSnapshot {
            state,
            target_version: SCHEMA_VERSION,
            backup_vault: None,
            backup_aad: None,
            backup_sync_version: None,
            backup_settings: None,
            backup_sync_config: None,
            backup_sync_base: None,
            backup_sync_base_aad: None,
        }
    }

    #[test]
    fn migrates_v1_to_current() {
        let (_, migrator) = migrator();
        let mut doc = v1_document();

        assert!(migrator.migrate_value(&mut doc).unwrap());
        assert_eq!(doc["schemaVersion"], json!(SCHEMA_VERSION));
        assert_eq!(doc["entries"][0]["encryptedMetadata"], json!(""));
        assert_eq!(doc["entries"][1]["secrets"], json!({}));
        assert!(doc["folders"].is_array());

        // Entry order and identity survive.
        assert_eq!(doc["entries"][0]["id"], json!("e1"));
        assert_eq!(doc["entries"][1]["id"], json!("e2"));
        assert_eq!(doc["syncVersion"], json!(4));

        let vault: Vault = serde_json::from_value(doc).unwrap();
        assert_eq!(vault.entries.len(), 2);
    }

    #[test]
    fn document_without_version_counts_as_oldest() {
        let (_, migrator) = migrator();
        let mut doc = json!({"entries": []});
        assert!(migrator.migrate_value(&mut doc).unwrap());
        assert_eq!(doc["schemaVersion"], json!(SCHEMA_VERSION));
    }

    #[test]
    fn current_document_is_untouched() {
        let (store, migrator) = migrator();
        let mut doc = json!({"schemaVersion": SCHEMA_VERSION, "entries": []});
        assert!(!migrator.migrate_value(&mut doc).unwrap());
        assert!(store.get(MIGRATION_SNAPSHOT_KEY).unwrap().is_none());
    }

    #[test]
    fn newer_document_is_rejected() {
        let (_, migrator) = migrator();
        let mut doc = json!({"schemaVersion": SCHEMA_VERSION + 1});
        let err = migrator.migrate_value(&mut doc).unwrap_err();
        assert!(matches!(
            err,
            VaultError::SchemaTooNew { found, supported }
                if found == SCHEMA_VERSION + 1 && supported == SCHEMA_VERSION
        ));
    }

    #[test]
    fn migration_snapshots_the_sealed_vault() {
        let (store, migrator) = migrator();
        store.put(VAULT_BLOB_KEY, b"old sealed bytes").unwrap();
        store.put(VAULT_AAD_KEY, b"keyloft-vault:v1:sync:4").unwrap();
        store.put(VAULT_SYNC_VERSION_KEY, b"4").unwrap();

        let mut doc = v1_document();
        migrator.migrate_value(&mut doc).unwrap();

        let snapshot = migrator.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.state, MigrationState::Migrating);
        assert_eq!(snapshot.backup_sync_version, Some(4));
        assert_eq!(
            STANDARD.decode(snapshot.backup_vault.unwrap()).unwrap(),
            b"old sealed bytes"
        );

        migrator.complete().unwrap();
        assert!(migrator.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn rekey_snapshot_guards_like_migration() {
        let (store, migrator) = migrator();
        store.put(VAULT_BLOB_KEY, b"sealed under old key").unwrap();

        migrator.begin_rekey().unwrap();
        let snapshot = migrator.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.state, MigrationState::Migrating);
        assert!(matches!(
            migrator.begin_rekey().unwrap_err(),
            VaultError::MigrationInProgress
        ));

        migrator.complete().unwrap();
        assert!(migrator.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn second_migration_attempt_while_in_flight_is_refused() {
        let (_, migrator) = migrator();
        let mut doc = v1_document();
        migrator.migrate_value(&mut doc).unwrap();

        // Crash before complete(): a retry must go through recovery first.
        let mut again = v1_document();
        let err = migrator.migrate_value(&mut again).unwrap_err();
        assert!(matches!(err, VaultError::MigrationInProgress));
    }

    #[test]
    fn failing_step_marks_rollback() {
        let (_, migrator) = migrator();
        let mut doc = Value::String("not a vault".into());
        let err = migrator.migrate_value(&mut doc).unwrap_err();
        assert!(matches!(err, VaultError::MigrationStep { to_version: 2, .. }));

        let snapshot = migrator.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.state, MigrationState::RollingBack);
    }

    #[test]
    fn recovery_with_no_snapshot_is_clean() {
        let (_, migrator) = migrator();
        assert_eq!(
            migrator.recover_incomplete_migration().unwrap(),
            RecoveryOutcome::Clean
        );
    }

    #[test]
    fn recovery_restores_backup_verbatim() {
        let (store, migrator) = migrator();
        store.put(VAULT_BLOB_KEY, b"committed bytes").unwrap();
        store.put(VAULT_AAD_KEY, b"keyloft-vault:v1:sync:9").unwrap();
        store.put(VAULT_SYNC_VERSION_KEY, b"9").unwrap();

        let mut doc = v1_document();
        migrator.migrate_value(&mut doc).unwrap();

        // Crash after the transformed vault was partially persisted.
        store.put(VAULT_BLOB_KEY, b"half written garbage").unwrap();

        let outcome = migrator.recover_incomplete_migration().unwrap();
        assert_eq!(
            outcome,
            RecoveryOutcome::Restored {
                target_version: SCHEMA_VERSION
            }
        );
        assert_eq!(
            store.get(VAULT_BLOB_KEY).unwrap(),
            Some(b"committed bytes".to_vec())
        );
        assert_eq!(
            store.get(VAULT_AAD_KEY).unwrap(),
            Some(b"keyloft-vault:v1:sync:9".to_vec())
        );
        assert_eq!(store.get(VAULT_SYNC_VERSION_KEY).unwrap(), Some(b"9".to_vec()));
        assert!(migrator.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn recovery_restores_sealed_side_records() {
        let (store, migrator) = migrator();
        store.put(VAULT_BLOB_KEY, b"vault bytes").unwrap();
        store.put(SETTINGS_BLOB_KEY, b"settings bytes").unwrap();
        store.put(SYNC_BASE_KEY, b"base bytes").unwrap();
        store.put(SYNC_BASE_AAD_KEY, b"keyloft-vault:v3:sync:2").unwrap();

        migrator.begin_rekey().unwrap();

        // Crash after some records were re-sealed under a new key.
        store.put(VAULT_BLOB_KEY, b"resealed vault").unwrap();
        store.put(SETTINGS_BLOB_KEY, b"resealed settings").unwrap();
        store.put(SYNC_BASE_KEY, b"resealed base").unwrap();

        migrator.recover_incomplete_migration().unwrap();
        assert_eq!(
            store.get(VAULT_BLOB_KEY).unwrap(),
            Some(b"vault bytes".to_vec())
        );
        assert_eq!(
            store.get(SETTINGS_BLOB_KEY).unwrap(),
            Some(b"settings bytes".to_vec())
        );
        assert_eq!(
            store.get(SYNC_BASE_KEY).unwrap(),
            Some(b"base bytes".to_vec())
        );
        assert_eq!(
            store.get(SYNC_BASE_AAD_KEY).unwrap(),
            Some(b"keyloft-vault:v3:sync:2".to_vec())
        );
        // Never existed, so restore leaves it alone.
        assert!(store.get(SYNC_CONFIG_BLOB_KEY).unwrap().is_none());
    }

    #[test]
    fn recovery_without_backup_reports_it() {
        let (store, migrator) = migrator();
        let snapshot = bare_snapshot(MigrationState::Migrating);
        store
            .put(
                MIGRATION_SNAPSHOT_KEY,
                &serde_json::to_vec(&snapshot).unwrap(),
            )
            .unwrap();

        assert_eq!(
            migrator.recover_incomplete_migration().unwrap(),
            RecoveryOutcome::BackupMissing
        );
        assert!(migrator.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn stale_normal_snapshot_is_cleared() {
        let (store, migrator) = migrator();
        let snapshot = bare_snapshot(MigrationState::Normal);
        store
            .put(
                MIGRATION_SNAPSHOT_KEY,
                &serde_json::to_vec(&snapshot).unwrap(),
            )
            .unwrap();

        assert_eq!(
            migrator.recover_incomplete_migration().unwrap(),
            RecoveryOutcome::Clean
        );
        assert!(store.get(MIGRATION_SNAPSHOT_KEY).unwrap().is_none());
    }
}
