//! Stateful seal/open pipeline for vault payloads.
//!
//! `EnvelopeCipher` owns the nonce ledger and the randomness source, so
//! every encryption in the process goes through one reuse check. Vault and
//! settings blobs are length-padded before sealing; entry fields live
//! inside an already padded blob and are sealed as-is.

use std::sync::Arc;

use keyloft_crypto::{
    aes_gcm_decrypt, aes_gcm_encrypt, generate_nonce, pad, unpad, RandomSource, SubKey,
    AES_GCM_NONCE_LENGTH,
};
use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::audit::{AuditEvent, AuditLog, AuditSeverity};
use crate::error::VaultError;
use crate::nonce_ledger::NonceLedger;
use crate::store::VaultStore;

/// Extra nonce generations allowed after the first collides. Exhausting
/// the budget means the randomness source is broken, not unlucky.
pub const NONCE_RETRY_BUDGET: u32 = 5;

/// HKDF purpose label for the key sealing the main vault blob.
pub const VAULT_MAIN_PURPOSE: &str = "vault-main";
/// HKDF purpose label for the device settings blob.
pub const SETTINGS_PURPOSE: &str = "settings-encryption";
/// HKDF purpose label for the sync transport configuration blob.
pub const SYNC_CONFIG_PURPOSE: &str = "sync-config";

pub struct EnvelopeCipher {
    rng: Arc<dyn RandomSource>,
    audit: Arc<dyn AuditLog>,
    ledger: Mutex<NonceLedger>,
}

impl EnvelopeCipher {
    pub fn new(rng: Arc<dyn RandomSource>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            rng,
            audit,
            ledger: Mutex::new(NonceLedger::new()),
        }
    }

    /// Builds a cipher whose ledger is restored from the store.
    pub fn load(
        store: &dyn VaultStore,
        rng: Arc<dyn RandomSource>,
        audit: Arc<dyn AuditLog>,
    ) -> Result<Self, VaultError> {
        let ledger = NonceLedger::load(store)?;
        Ok(Self {
            rng,
            audit,
            ledger: Mutex::new(ledger),
        })
    }

    /// Seals a padded payload: vault blobs, settings, sync config.
    pub fn seal(&self, key: &SubKey, plaintext: &[u8], aad: &str) -> Result<Vec<u8>, VaultError> {
        let padded = Zeroizing::new(pad(plaintext));
        self.seal_raw(key, &padded, aad)
    }

    /// Seals without padding. Entry fields already sit inside the padded
    /// vault blob; only top-level records get their own padding.
    pub fn seal_field(
        &self,
        key: &SubKey,
        plaintext: &[u8],
        aad: &str,
    ) -> Result<Vec<u8>, VaultError> {
        self.seal_raw(key, plaintext, aad)
    }

    fn seal_raw(&self, key: &SubKey, plaintext: &[u8], aad: &str) -> Result<Vec<u8>, VaultError> {
        let nonce = self.reserve_nonce()?;
        let blob = aes_gcm_encrypt(key.as_bytes(), &nonce, plaintext, aad.as_bytes())?;
        Ok(blob)
    }

    /// Opens a padded payload sealed with [`seal`](Self::seal).
    pub fn open(&self, key: &SubKey, blob: &[u8], aad: &str) -> Result<Vec<u8>, VaultError> {
        let padded = aes_gcm_decrypt(key.as_bytes(), blob, aad.as_bytes())?;
        Ok(unpad(&padded))
    }

    /// Opens an unpadded field sealed with [`seal_field`](Self::seal_field).
    pub fn open_field(&self, key: &SubKey, blob: &[u8], aad: &str) -> Result<Vec<u8>, VaultError> {
        Ok(aes_gcm_decrypt(key.as_bytes(), blob, aad.as_bytes())?)
    }

    /// Draws a fresh nonce the ledger has never seen and records it.
    ///
    /// The reservation is in-memory only. Callers persist the ciphertext
    /// first and the ledger after, so a crash in between burns a nonce
    /// instead of forgetting one.
    fn reserve_nonce(&self) -> Result<[u8; AES_GCM_NONCE_LENGTH], VaultError> {
        let mut ledger = self.ledger.lock();
        for _ in 0..=NONCE_RETRY_BUDGET {
            let nonce = generate_nonce(self.rng.as_ref())?;
            if !ledger.contains(&nonce) {
                ledger.record(nonce);
                return Ok(nonce);
            }
        }
        let attempts = NONCE_RETRY_BUDGET + 1;
        tracing::error!(attempts, "nonce generation kept colliding, aborting encryption");
        self.audit.record(AuditEvent::new(
            AuditSeverity::Critical,
            "nonce-collision",
            format!("nonce collided on {attempts} consecutive generations"),
        ));
        Err(VaultError::NonceCollision { attempts })
    }

    /// Writes the ledger to the store. Call after the sealed payload
    /// itself has been persisted.
    pub fn persist_ledger(&self, store: &dyn VaultStore) -> Result<(), VaultError> {
        self.ledger.lock().persist(store)
    }

    pub fn nonce_history_len(&self) -> usize {
        self.ledger.lock().len()
    }
}
