//! Push/pull synchronization of the sealed vault blob.
//!
//! The flow per sync: fetch the remote blob, three-way merge against the
//! last synced base, seal the merged vault, and conditionally put it. A
//! lost race comes back as a conflict carrying the winner's state, which
//! feeds the next merge round. Plaintext never crosses the transport
//! boundary; the server sees only sealed bytes and a version number.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keyloft_crypto::{CryptoError, SubKey};

use crate::aad::vault_aad;
use crate::envelope::EnvelopeCipher;
use crate::error::VaultError;
use crate::merge::{merge_with_floor, Conflict, MERGE_TIME_FLOOR};
use crate::store::{
    VaultStore, SYNC_BASE_AAD_KEY, SYNC_BASE_KEY, VAULT_AAD_KEY, VAULT_BLOB_KEY,
    VAULT_SYNC_VERSION_KEY,
};
use crate::sync::types::{PutOutcome, SyncTransport};
use crate::vault::{Vault, SCHEMA_VERSION};

/// Merge-and-push rounds before giving up on a racing writer.
const PUSH_ROUNDS: usize = 2;

#[derive(Debug)]
pub struct SyncOutcome {
    /// A remote state was merged in.
    pub pulled: bool,
    /// Our state was accepted by the server.
    pub pushed: bool,
    /// Conflicts from the committed merge round.
    pub conflicts: Vec<Conflict>,
    pub sync_version: u64,
}

pub struct SyncClient {
    transport: Arc<dyn SyncTransport>,
    merge_floor: Duration,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            transport,
            merge_floor: MERGE_TIME_FLOOR,
        }
    }

    pub fn with_merge_floor(transport: Arc<dyn SyncTransport>, merge_floor: Duration) -> Self {
        Self {
            transport,
            merge_floor,
        }
    }

    /// Runs one full sync cycle, updating `vault` and the local store on
    /// success. Persistence order on an accepted push: sealed payload
    /// first, then ledger and base metadata.
    pub async fn sync(
        &self,
        vault: &mut Vault,
        key: &SubKey,
        cipher: &EnvelopeCipher,
        store: &dyn VaultStore,
    ) -> Result<SyncOutcome, VaultError> {
        let mut remote_state = match self.transport.get_blob().await? {
            Some(remote) => Some(self.open_remote(cipher, key, &remote.blob, remote.version)?),
            None => None,
        };

        if let Some((remote_vault, _)) = &remote_state {
            if remote_vault == vault {
                // Nothing diverged. Refresh the merge base and stop.
                self.persist_base(vault, key, cipher, store)?;
                return Ok(SyncOutcome {
                    pulled: false,
                    pushed: false,
                    conflicts: Vec::new(),
                    sync_version: vault.sync_version,
                });
            }
        }

        for _ in 0..PUSH_ROUNDS {
            let expected = remote_state.as_ref().map(|(_, v)| *v).unwrap_or(0);
            let mut conflicts = Vec::new();
            let mut pulled = false;

            let mut working = match &remote_state {
                Some((remote_vault, _)) => {
                    let base = self
                        .load_base(cipher, key, store)?
                        .unwrap_or_else(Vault::new);
                    let outcome =
                        merge_with_floor(vault, remote_vault, &base, self.merge_floor).await;
                    conflicts = outcome.conflicts;
                    pulled = true;
                    outcome.vault
                }
                None => {
                    let mut working = vault.clone();
                    working.last_sync_at = Some(Utc::now().timestamp_millis());
                    working
                }
            };

            // The pushed version is the vault's own sync version; it must
            // clear the server's current version and never move backwards
            // locally.
            working.sync_version = working.sync_version.max(expected + 1);
            working.content_hash = Some(working.compute_content_hash());

            let aad = vault_aad(working.schema_version, working.sync_version);
            let plaintext = serde_json::to_vec(&working)?;
            let blob = cipher.seal(key, &plaintext, &aad)?;

            match self
                .transport
                .put_blob(&blob, working.sync_version, expected)
                .await?
            {
                PutOutcome::Accepted { version } => {
                    *vault = working;
                    store.put(VAULT_BLOB_KEY, &blob)?;
                    store.put(VAULT_AAD_KEY, aad.as_bytes())?;
                    store.put(
                        VAULT_SYNC_VERSION_KEY,
                        vault.sync_version.to_string().as_bytes(),
                    )?;
                    cipher.persist_ledger(store)?;
                    self.persist_base(vault, key, cipher, store)?;
                    tracing::info!(
                        version,
                        pulled,
                        conflicts = conflicts.len(),
                        "sync push accepted"
                    );
                    return Ok(SyncOutcome {
                        pulled,
                        pushed: true,
                        conflicts,
                        sync_version: vault.sync_version,
                    });
                }
                PutOutcome::Conflict {
                    server_version,
                    server_blob,
                } => {
                    tracing::debug!(server_version, "push lost the race, merging server state");
                    remote_state =
                        Some(self.open_remote(cipher, key, &server_blob, server_version)?);
                }
            }
        }

        Err(VaultError::SyncConflictPersists)
    }

    /// Authenticates and decrypts a remote blob. The AAD is rebuilt from
    /// the transported version and the schema version, probed newest
    /// schema first since the blob does not say which one sealed it.
    fn open_remote(
        &self,
        cipher: &EnvelopeCipher,
        key: &SubKey,
        blob: &[u8],
        version: u64,
    ) -> Result<(Vault, u64), VaultError> {
        for schema in (1..=SCHEMA_VERSION).rev() {
            let aad = vault_aad(schema, version);
            if let Ok(plain) = cipher.open(key, blob, &aad) {
                let vault: Vault = serde_json::from_slice(&plain)?;
                return Ok((vault, version));
            }
        }
        Err(VaultError::Crypto(CryptoError::DecryptionFailed(
            "remote blob failed authentication under every known schema version".into(),
        )))
    }

    /// Stores the given vault as the merge base for the next sync.
    fn persist_base(
        &self,
        vault: &Vault,
        key: &SubKey,
        cipher: &EnvelopeCipher,
        store: &dyn VaultStore,
    ) -> Result<(), VaultError> {
        let aad = vault_aad(vault.schema_version, vault.sync_version);
        let plaintext = serde_json::to_vec(vault)?;
        let blob = cipher.seal(key, &plaintext, &aad)?;
        store.put(SYNC_BASE_KEY, &blob)?;
        store.put(SYNC_BASE_AAD_KEY, aad.as_bytes())?;
        cipher.persist_ledger(store)
    }

    /// Loads the last-synced snapshot. A base that no longer opens under
    /// the current key is dropped with a warning: merging without a base
    /// surfaces more conflicts but never loses data.
    fn load_base(
        &self,
        cipher: &EnvelopeCipher,
        key: &SubKey,
        store: &dyn VaultStore,
    ) -> Result<Option<Vault>, VaultError> {
        let Some(blob) = store.get(SYNC_BASE_KEY)? else {
            return Ok(None);
        };
        let Some(aad_bytes) = store.get(SYNC_BASE_AAD_KEY)? else {
            return Ok(None);
        };
        let aad = String::from_utf8(aad_bytes)?;
        let Ok(plain) = cipher.open(key, &blob, &aad) else {
            tracing::warn!("sync base snapshot unreadable, merging without a base");
            return Ok(None);
        };
        match serde_json::from_slice(&plain) {
            Ok(base) => Ok(Some(base)),
            Err(err) => {
                tracing::warn!(error = %err, "sync base snapshot malformed, merging without a base");
                Ok(None)
            }
        }
    }
}
