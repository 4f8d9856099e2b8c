//! End-to-end flows over the public API: vault creation and unlock,
//! legacy KDF and schema migration, crash rollback, two-device sync,
//! and recovery shares.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use zeroize::Zeroizing;

use keyloft_crypto::{derive_key, derive_master_key, OsRandom};
use keyloft_vault::store::{
    KDF_SALT_KEY, SETTINGS_BLOB_KEY, SYNC_CONFIG_BLOB_KEY, VAULT_AAD_KEY, VAULT_BLOB_KEY,
    VAULT_SYNC_VERSION_KEY,
};
use keyloft_vault::{
    derive_subkey, params_for_version, share_from_string, share_to_string, vault_aad,
    AuditSeverity, EnvelopeCipher, ErrorKind, HydratedEntry, IsolatedExecutor, KdfParams,
    KeyDerivationExecutor, MasterKey, MemoryAuditLog, MemoryStore, NullAuditLog, PutOutcome,
    RemoteBlob, SchemaMigrator, SessionOptions, SyncClient, SyncTransport, TransportError, Vault,
    VaultError, VaultHeader, VaultSession, VaultStore, CURRENT_KDF_VERSION, SCHEMA_VERSION,
    VAULT_MAIN_PURPOSE,
};

const PASSWORD: &[u8] = b"correct horse battery staple";

// ============================================================================
// Helpers
// ============================================================================

/// Real Argon2id with the memory cost squashed so the suite stays fast.
/// Iterations and parallelism still differ between versions, so every
/// version derives a distinct key and the unlock fallback chain runs for
/// real.
struct FastExecutor;

fn squash(params: &KdfParams) -> KdfParams {
    KdfParams {
        memory_kib: 1024,
        ..params.clone()
    }
}

#[async_trait]
impl KeyDerivationExecutor for FastExecutor {
    async fn derive(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<MasterKey, VaultError> {
        Ok(derive_master_key(password, salt, &squash(params))?)
    }

    async fn derive_with_raw(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<(MasterKey, Zeroizing<Vec<u8>>), VaultError> {
        let raw = derive_key(password, salt, &squash(params))?;
        let master = MasterKey::from_slice(&raw)?;
        Ok((master, raw))
    }
}

fn options(store: &Arc<MemoryStore>) -> SessionOptions {
    SessionOptions::new(store.clone(), Arc::new(FastExecutor))
}

fn options_with_audit(store: &Arc<MemoryStore>, audit: &Arc<MemoryAuditLog>) -> SessionOptions {
    let mut opts = options(store);
    opts.audit = Some(audit.clone());
    opts
}

/// In-memory server with compare-and-swap puts.
#[derive(Default)]
struct MemoryServer {
    state: Mutex<Option<(Vec<u8>, u64)>>,
}

impl MemoryServer {
    fn version(&self) -> u64 {
        self.state.lock().as_ref().map(|(_, v)| *v).unwrap_or(0)
    }
}

#[async_trait]
impl SyncTransport for MemoryServer {
    async fn get_version(&self) -> Result<u64, TransportError> {
        Ok(self.version())
    }

    async fn get_blob(&self) -> Result<Option<RemoteBlob>, TransportError> {
        Ok(self.state.lock().as_ref().map(|(blob, version)| RemoteBlob {
            blob: blob.clone(),
            version: *version,
        }))
    }

    async fn put_blob(
        &self,
        blob: &[u8],
        version: u64,
        expected_version: u64,
    ) -> Result<PutOutcome, TransportError> {
        let mut state = self.state.lock();
        let current = state.as_ref().map(|(_, v)| *v).unwrap_or(0);
        if current != expected_version {
            let (server_blob, server_version) = state.clone().expect("conflict without a blob");
            return Ok(PutOutcome::Conflict {
                server_version,
                server_blob,
            });
        }
        *state = Some((blob.to_vec(), version));
        Ok(PutOutcome::Accepted { version })
    }
}

/// Copies every record from one device's store onto a blank one, the way
/// restoring a second device from a backup would.
fn provision_from(source: &Arc<MemoryStore>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.load_from(source.dump());
    store
}

/// Writes the records an old build would have left behind: a current-shape
/// vault sealed under version-1 KDF parameters, one login entry inside.
/// Returns the entry ID.
async fn seed_v1_kdf_vault(store: &Arc<MemoryStore>) -> String {
    let salt = b"0123456789abcdef";
    store.put(KDF_SALT_KEY, salt).expect("salt");
    VaultHeader::new(1, params_for_version(1))
        .save(store.as_ref())
        .expect("header");

    let master = FastExecutor
        .derive(PASSWORD, salt, &params_for_version(1))
        .await
        .expect("derive");
    let cipher = EnvelopeCipher::new(Arc::new(OsRandom), Arc::new(NullAuditLog));

    let mut vault = Vault::new();
    let mut entry = HydratedEntry::new("login", json!({"site": "legacy.example"}));
    entry.set_secret("password", "hunter2");
    let id = entry.id.clone();
    vault.upsert_entry(entry.seal(&master, &cipher).expect("seal entry"));

    let key = derive_subkey(&master, VAULT_MAIN_PURPOSE).expect("subkey");
    let aad = vault_aad(vault.schema_version, vault.sync_version);
    let blob = cipher
        .seal(&key, &serde_json::to_vec(&vault).expect("encode"), &aad)
        .expect("seal vault");
    store.put(VAULT_BLOB_KEY, &blob).expect("blob");
    store.put(VAULT_AAD_KEY, aad.as_bytes()).expect("aad");
    store
        .put(
            VAULT_SYNC_VERSION_KEY,
            vault.sync_version.to_string().as_bytes(),
        )
        .expect("sync version");
    cipher.persist_ledger(store.as_ref()).expect("ledger");
    id
}

/// Seals a version-1 document the way a first-generation build shaped it:
/// no folders collection, no per-entry encryption fields.
async fn seed_v1_schema_vault(store: &Arc<MemoryStore>) {
    let salt = b"0123456789abcdef";
    store.put(KDF_SALT_KEY, salt).expect("salt");
    VaultHeader::new(CURRENT_KDF_VERSION, params_for_version(CURRENT_KDF_VERSION))
        .save(store.as_ref())
        .expect("header");

    let doc = json!({
        "schemaVersion": 1,
        "entries": [
            {"id": "entry-one", "type": "login", "modified": 10},
            {"id": "entry-two", "type": "note"}
        ],
        "syncVersion": 4
    });

    let master = FastExecutor
        .derive(PASSWORD, salt, &params_for_version(CURRENT_KDF_VERSION))
        .await
        .expect("derive");
    let key = derive_subkey(&master, VAULT_MAIN_PURPOSE).expect("subkey");
    let cipher = EnvelopeCipher::new(Arc::new(OsRandom), Arc::new(NullAuditLog));
    let aad = vault_aad(1, 4);
    let blob = cipher
        .seal(&key, &serde_json::to_vec(&doc).expect("encode"), &aad)
        .expect("seal");
    store.put(VAULT_BLOB_KEY, &blob).expect("blob");
    store.put(VAULT_AAD_KEY, aad.as_bytes()).expect("aad");
    store.put(VAULT_SYNC_VERSION_KEY, b"4").expect("sync version");
    cipher.persist_ledger(store.as_ref()).expect("ledger");
}

// ============================================================================
// Create and unlock
// ============================================================================

#[tokio::test]
async fn create_unlock_round_trips_entries_and_settings() {
    let store = Arc::new(MemoryStore::new());
    let mut session = VaultSession::create(options(&store), PASSWORD)
        .await
        .expect("create");

    let mut login = HydratedEntry::new("login", json!({"site": "mail.example", "user": "ada"}));
    login.set_secret("password", "s3cret");
    login.set_secret("totp", "JBSWY3DP");
    let login_id = login.id.clone();
    session.put_entry(&login).expect("put login");

    let note = HydratedEntry::new("note", json!({"title": "wifi"}));
    let note_id = note.id.clone();
    session.put_entry(&note).expect("put note");

    let folder_id = session.add_folder("Work").expect("folder");
    session
        .put_settings(&json!({"theme": "dark", "clipboardClearSeconds": 30}))
        .expect("settings");
    drop(session);

    let session = VaultSession::unlock(options(&store), PASSWORD)
        .await
        .expect("unlock");

    assert_eq!(session.header().kdf_version, CURRENT_KDF_VERSION);
    assert!(!session.kdf_migration_pending());
    assert_eq!(session.entries().expect("entries").len(), 2);

    let login = session.entry(&login_id).expect("login");
    assert_eq!(login.secret("password"), Some("s3cret"));
    assert_eq!(login.secret("totp"), Some("JBSWY3DP"));
    assert_eq!(login.metadata["site"], json!("mail.example"));

    let note = session.entry(&note_id).expect("note");
    assert_eq!(note.kind, "note");
    assert!(note.secrets.is_empty());

    let folders = session.folders();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].id, folder_id);
    assert_eq!(folders[0].name, "Work");

    assert_eq!(
        session.settings().expect("settings"),
        Some(json!({"theme": "dark", "clipboardClearSeconds": 30}))
    );
}

#[tokio::test]
async fn wrong_password_unlock_is_retryable() {
    let store = Arc::new(MemoryStore::new());
    VaultSession::create(options(&store), PASSWORD)
        .await
        .expect("create");

    let err = VaultSession::unlock(options(&store), b"not the password")
        .await
        .expect_err("must not unlock");
    assert!(matches!(err, VaultError::InvalidPassword));
    assert_eq!(err.kind(), ErrorKind::Retryable);
}

// ============================================================================
// KDF and schema migration
// ============================================================================

#[tokio::test]
async fn version1_kdf_vault_unlocks_then_re_keys() {
    let store = Arc::new(MemoryStore::new());
    let id = seed_v1_kdf_vault(&store).await;

    let mut session = VaultSession::unlock(options(&store), PASSWORD)
        .await
        .expect("unlock under old parameters");
    assert_eq!(session.header().kdf_version, 1);
    assert!(session.kdf_migration_pending());
    assert_eq!(
        session.entry(&id).expect("entry").secret("password"),
        Some("hunter2")
    );

    assert!(session.migrate_kdf(PASSWORD).await.expect("re-key"));
    assert_eq!(session.header().kdf_version, CURRENT_KDF_VERSION);
    assert!(!session.kdf_migration_pending());

    // Second call has nothing left to do.
    assert!(!session.migrate_kdf(PASSWORD).await.expect("no-op"));
    drop(session);

    let session = VaultSession::unlock(options(&store), PASSWORD)
        .await
        .expect("unlock under new parameters");
    assert_eq!(session.header().kdf_version, CURRENT_KDF_VERSION);
    assert!(!session.kdf_migration_pending());
    assert_eq!(
        session.entry(&id).expect("entry").secret("password"),
        Some("hunter2")
    );
}

#[tokio::test]
async fn re_key_rejects_a_mistyped_password() {
    let store = Arc::new(MemoryStore::new());
    let id = seed_v1_kdf_vault(&store).await;

    let mut session = VaultSession::unlock(options(&store), PASSWORD)
        .await
        .expect("unlock");
    let err = session
        .migrate_kdf(b"not the password")
        .await
        .expect_err("must not re-key");
    assert!(matches!(err, VaultError::InvalidPassword));

    // The vault is untouched and still opens under the old parameters.
    drop(session);
    let session = VaultSession::unlock(options(&store), PASSWORD)
        .await
        .expect("unlock again");
    assert_eq!(session.header().kdf_version, 1);
    assert_eq!(
        session.entry(&id).expect("entry").secret("password"),
        Some("hunter2")
    );
}

#[tokio::test]
async fn version1_schema_document_migrates_on_unlock() {
    let store = Arc::new(MemoryStore::new());
    seed_v1_schema_vault(&store).await;

    let audit = Arc::new(MemoryAuditLog::new());
    let session = VaultSession::unlock(options_with_audit(&store, &audit), PASSWORD)
        .await
        .expect("unlock");

    let vault = session.vault();
    assert_eq!(vault.schema_version, SCHEMA_VERSION);
    assert_eq!(vault.sync_version, 4);
    assert_eq!(vault.entries[0].id, "entry-one");
    assert_eq!(vault.entries[0].kind, "login");
    assert_eq!(vault.entries[1].id, "entry-two");
    assert!(audit.events().iter().any(|e| e.code == "schema-migrated"));

    // The persisted blob was rewritten in the new shape.
    assert_eq!(
        store.get(VAULT_AAD_KEY).expect("get").expect("aad"),
        vault_aad(SCHEMA_VERSION, 4).into_bytes()
    );
    drop(session);

    let audit = Arc::new(MemoryAuditLog::new());
    let session = VaultSession::unlock(options_with_audit(&store, &audit), PASSWORD)
        .await
        .expect("second unlock");
    assert_eq!(session.vault().entries.len(), 2);
    assert!(!audit.events().iter().any(|e| e.code == "schema-migrated"));
}

// ============================================================================
// Crash recovery
// ============================================================================

#[tokio::test]
async fn interrupted_schema_migration_rolls_back_on_next_unlock() {
    let store = Arc::new(MemoryStore::new());
    seed_v1_schema_vault(&store).await;

    // A migration that began but never committed: the snapshot is in
    // place and the payload write was torn mid-way.
    let migrator = SchemaMigrator::new(store.clone());
    let mut doc = json!({"schemaVersion": 1});
    assert!(migrator.migrate_value(&mut doc).expect("begin migration"));
    store
        .put(VAULT_BLOB_KEY, b"torn half-written blob")
        .expect("corrupt");

    let audit = Arc::new(MemoryAuditLog::new());
    let session = VaultSession::unlock(options_with_audit(&store, &audit), PASSWORD)
        .await
        .expect("unlock after crash");

    let events = audit.events();
    assert!(events.iter().any(|e| e.code == "migration-rolled-back"));
    assert_eq!(audit.count_with_severity(AuditSeverity::Warning), 1);
    // The restored document is version 1 again, so migration re-runs.
    assert!(events.iter().any(|e| e.code == "schema-migrated"));

    assert_eq!(session.vault().entries[0].id, "entry-one");
    assert_eq!(session.vault().entries[1].id, "entry-two");
}

#[tokio::test]
async fn interrupted_re_key_restores_every_sealed_record() {
    let store = Arc::new(MemoryStore::new());
    let mut session = VaultSession::create(options(&store), PASSWORD)
        .await
        .expect("create");

    let mut entry = HydratedEntry::new("login", json!({"site": "bank.example"}));
    entry.set_secret("password", "pre-crash");
    let id = entry.id.clone();
    session.put_entry(&entry).expect("put");
    session
        .put_settings(&json!({"theme": "light"}))
        .expect("settings");
    session
        .put_sync_config(&json!({"endpoint": "https://sync.example"}))
        .expect("sync config");
    drop(session);

    let vault_before = store.get(VAULT_BLOB_KEY).expect("get").expect("blob");
    let settings_before = store.get(SETTINGS_BLOB_KEY).expect("get").expect("blob");

    // A re-key that crashed right after tearing through its rewrites.
    let migrator = SchemaMigrator::new(store.clone());
    migrator.begin_rekey().expect("begin re-key");
    store.put(VAULT_BLOB_KEY, b"half-written").expect("corrupt");
    store.put(SETTINGS_BLOB_KEY, b"garbage").expect("corrupt");
    store.put(SYNC_CONFIG_BLOB_KEY, b"junk").expect("corrupt");

    let audit = Arc::new(MemoryAuditLog::new());
    let session = VaultSession::unlock(options_with_audit(&store, &audit), PASSWORD)
        .await
        .expect("unlock after crash");

    assert!(audit
        .events()
        .iter()
        .any(|e| e.code == "migration-rolled-back"));
    assert_eq!(
        session.entry(&id).expect("entry").secret("password"),
        Some("pre-crash")
    );
    assert_eq!(
        session.settings().expect("settings"),
        Some(json!({"theme": "light"}))
    );
    assert_eq!(
        session.sync_config().expect("sync config"),
        Some(json!({"endpoint": "https://sync.example"}))
    );

    // Byte-for-byte the store is back to its pre-crash state.
    assert_eq!(
        store.get(VAULT_BLOB_KEY).expect("get").expect("blob"),
        vault_before
    );
    assert_eq!(
        store.get(SETTINGS_BLOB_KEY).expect("get").expect("blob"),
        settings_before
    );
}

// ============================================================================
// Two-device sync
// ============================================================================

#[tokio::test]
async fn two_devices_converge_on_disjoint_adds() {
    let server = Arc::new(MemoryServer::default());
    let client = SyncClient::with_merge_floor(server.clone(), Duration::ZERO);

    let store_a = Arc::new(MemoryStore::new());
    let mut device_a = VaultSession::create(options(&store_a), PASSWORD)
        .await
        .expect("create");
    let mut entry_a = HydratedEntry::new("login", json!({"site": "a.example"}));
    entry_a.set_secret("password", "alpha");
    let id_a = entry_a.id.clone();
    device_a.put_entry(&entry_a).expect("put");

    let first = device_a.sync(&client).await.expect("first push");
    assert!(first.pushed);
    assert!(!first.pulled);
    assert!(first.conflicts.is_empty());

    // Second device restored from the first one's storage.
    let store_b = provision_from(&store_a);
    let mut device_b = VaultSession::unlock(options(&store_b), PASSWORD)
        .await
        .expect("unlock b");
    let mut entry_b = HydratedEntry::new("login", json!({"site": "b.example"}));
    entry_b.set_secret("password", "bravo");
    let id_b = entry_b.id.clone();
    device_b.put_entry(&entry_b).expect("put");

    let push_b = device_b.sync(&client).await.expect("sync b");
    assert!(push_b.pulled);
    assert!(push_b.pushed);
    assert!(push_b.conflicts.is_empty());

    let pull_a = device_a.sync(&client).await.expect("sync a");
    assert!(pull_a.pulled);
    assert!(pull_a.conflicts.is_empty());
    assert!(pull_a.sync_version > push_b.sync_version);
    assert_eq!(server.version(), pull_a.sync_version);

    for session in [&device_a, &device_b] {
        assert_eq!(
            session.entry(&id_a).expect("a").secret("password"),
            Some("alpha")
        );
        assert_eq!(
            session.entry(&id_b).expect("b").secret("password"),
            Some("bravo")
        );
    }
}

#[tokio::test]
async fn divergent_edits_surface_one_conflict_and_keep_local() {
    let server = Arc::new(MemoryServer::default());
    let client = SyncClient::with_merge_floor(server.clone(), Duration::ZERO);

    let store_a = Arc::new(MemoryStore::new());
    let mut device_a = VaultSession::create(options(&store_a), PASSWORD)
        .await
        .expect("create");
    let mut entry = HydratedEntry::new("login", json!({"site": "shared.example"}));
    entry.set_secret("password", "original");
    let id = entry.id.clone();
    device_a.put_entry(&entry).expect("put");
    device_a.sync(&client).await.expect("seed server");

    let store_b = provision_from(&store_a);
    let mut device_b = VaultSession::unlock(options(&store_b), PASSWORD)
        .await
        .expect("unlock b");

    // Both sides edit the same entry before talking to the server again.
    let mut from_a = device_a.entry(&id).expect("entry");
    from_a.set_secret("password", "from-a");
    device_a.put_entry(&from_a).expect("edit a");
    device_a.sync(&client).await.expect("push a");

    let mut from_b = device_b.entry(&id).expect("entry");
    from_b.set_secret("password", "from-b");
    device_b.put_entry(&from_b).expect("edit b");

    let outcome = device_b.sync(&client).await.expect("sync b");
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].entry_id, id);
    assert!(outcome.pushed);
    assert_eq!(
        device_b.entry(&id).expect("entry").secret("password"),
        Some("from-b")
    );

    // The first device did not touch the entry since its push, so the
    // second device's resolution wins there without a conflict.
    let outcome = device_a.sync(&client).await.expect("sync a");
    assert!(outcome.conflicts.is_empty());
    assert_eq!(
        device_a.entry(&id).expect("entry").secret("password"),
        Some("from-b")
    );
}

// ============================================================================
// Recovery shares
// ============================================================================

#[tokio::test]
async fn recovery_shares_rebuild_data_access() {
    let store = Arc::new(MemoryStore::new());
    let mut session = VaultSession::create(options(&store), PASSWORD)
        .await
        .expect("create");
    let mut entry = HydratedEntry::new("login", json!({"site": "vault.example"}));
    entry.set_secret("password", "deep-secret");
    let id = entry.id.clone();
    session.put_entry(&entry).expect("put");

    let shares = session
        .export_recovery_shares(PASSWORD, 5, 3)
        .await
        .expect("export");
    assert_eq!(shares.len(), 5);
    drop(session);

    // Three of five, carried through their text form, rebuild the key.
    let carried: Vec<_> = [0usize, 2, 4]
        .iter()
        .map(|&i| share_from_string(&share_to_string(&shares[i])).expect("parse share"))
        .collect();
    let master = VaultSession::recover_master_key(&carried).expect("reconstruct");

    let blob = store.get(VAULT_BLOB_KEY).expect("get").expect("blob");
    let aad_bytes = store.get(VAULT_AAD_KEY).expect("get").expect("aad");
    let aad = String::from_utf8(aad_bytes).expect("utf8");
    let key = derive_subkey(&master, VAULT_MAIN_PURPOSE).expect("subkey");
    let cipher = EnvelopeCipher::new(Arc::new(OsRandom), Arc::new(NullAuditLog));
    let plain = cipher
        .open(&key, &blob, &aad)
        .expect("recovered key opens the vault");
    let vault: Vault = serde_json::from_slice(&plain).expect("decode");
    let hydrated = vault
        .entry(&id)
        .expect("entry present")
        .hydrate(&master, &cipher)
        .expect("hydrate");
    assert_eq!(hydrated.secret("password"), Some("deep-secret"));

    // Below the threshold the arithmetic still runs but yields a key
    // that opens nothing.
    let short = vec![shares[0].clone(), shares[1].clone()];
    let wrong = VaultSession::recover_master_key(&short).expect("two shares still combine");
    let wrong_key = derive_subkey(&wrong, VAULT_MAIN_PURPOSE).expect("subkey");
    assert!(cipher.open(&wrong_key, &blob, &aad).is_err());
}

// ============================================================================
// Executor and store variants
// ============================================================================

#[tokio::test]
async fn isolated_executor_runs_the_full_cost_derivation() {
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(IsolatedExecutor::new());

    let mut session = VaultSession::create(
        SessionOptions::new(store.clone(), executor.clone()),
        PASSWORD,
    )
    .await
    .expect("create");
    let mut entry = HydratedEntry::new("login", json!({"site": "real.example"}));
    entry.set_secret("password", "full-cost");
    let id = entry.id.clone();
    session.put_entry(&entry).expect("put");
    drop(session);

    let session = VaultSession::unlock(SessionOptions::new(store, executor), PASSWORD)
        .await
        .expect("unlock");
    assert_eq!(
        session.entry(&id).expect("entry").secret("password"),
        Some("full-cost")
    );
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_store_persists_a_vault_on_disk() {
    use keyloft_vault::SqliteStore;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vault.db");

    let store = Arc::new(SqliteStore::open(&path).expect("open db"));
    let mut session = VaultSession::create(
        SessionOptions::new(store, Arc::new(FastExecutor)),
        PASSWORD,
    )
    .await
    .expect("create");
    let mut entry = HydratedEntry::new("login", json!({"site": "disk.example"}));
    entry.set_secret("password", "on-disk");
    let id = entry.id.clone();
    session.put_entry(&entry).expect("put");
    drop(session);

    let store = Arc::new(SqliteStore::open(&path).expect("reopen db"));
    let session = VaultSession::unlock(
        SessionOptions::new(store, Arc::new(FastExecutor)),
        PASSWORD,
    )
    .await
    .expect("unlock");
    assert_eq!(
        session.entry(&id).expect("entry").secret("password"),
        Some("on-disk")
    );
}
