//! Versioned KDF parameter table and the unlock/migration logic on top.
//!
//! Parameters only ever get stronger: new vaults use the current version,
//! old vaults keep working through the fallback chain in
//! [`KdfManager::attempt_unlock`] until [`KdfManager::migrate`] re-keys
//! them.

use std::sync::Arc;

use keyloft_crypto::{KdfParams, MasterKey};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::executor::KeyDerivationExecutor;
use crate::header::VaultHeader;

/// First version ever shipped. Vaults created before headers existed are
/// all version 1.
pub const OLDEST_KDF_VERSION: u32 = 1;
/// Version used for new vaults and migration targets.
pub const CURRENT_KDF_VERSION: u32 = 3;

/// Canonical Argon2id parameters for a KDF version.
///
/// Unknown versions degrade to the oldest parameters with a warning
/// instead of failing: state written by a future build must stay
/// readable, and the unlock fallback chain sorts out whether the derived
/// key actually opens anything.
pub fn params_for_version(version: u32) -> KdfParams {
    match version {
        1 => KdfParams {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
            hash_len: 32,
        },
        2 => KdfParams {
            memory_kib: 46_080,
            iterations: 2,
            parallelism: 2,
            hash_len: 32,
        },
        3 => KdfParams {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
            hash_len: 32,
        },
        unknown => {
            tracing::warn!(
                version = unknown,
                "unknown kdf version, degrading to oldest parameters"
            );
            params_for_version(OLDEST_KDF_VERSION)
        }
    }
}

fn known_version(version: u32) -> bool {
    (OLDEST_KDF_VERSION..=CURRENT_KDF_VERSION).contains(&version)
}

/// Result of a successful unlock attempt.
#[derive(Debug)]
pub struct UnlockOutcome {
    pub master: MasterKey,
    /// KDF version whose key actually opened the vault.
    pub used_version: u32,
    /// True when the vault still owes a KDF migration: parameters behind
    /// current, header absent, or header disagreeing with the data.
    pub migration_pending: bool,
}

pub struct KdfManager {
    executor: Arc<dyn KeyDerivationExecutor>,
}

impl KdfManager {
    pub fn new(executor: Arc<dyn KeyDerivationExecutor>) -> Self {
        Self { executor }
    }

    pub async fn derive_master_key(
        &self,
        password: &[u8],
        salt: &[u8],
        version: u32,
    ) -> Result<MasterKey, VaultError> {
        let params = params_for_version(version);
        self.executor.derive(password, salt, &params).await
    }

    /// Like [`derive_master_key`](Self::derive_master_key) but also hands
    /// back the raw bytes. Callers wipe them after use; only migration
    /// and recovery-share export need this form.
    pub async fn derive_master_key_with_raw(
        &self,
        password: &[u8],
        salt: &[u8],
        version: u32,
    ) -> Result<(MasterKey, Zeroizing<Vec<u8>>), VaultError> {
        let params = params_for_version(version);
        self.executor.derive_with_raw(password, salt, &params).await
    }

    /// True when unlocking should be followed by a KDF migration.
    pub fn needs_migration(&self, header: Option<&VaultHeader>) -> bool {
        match header {
            None => true,
            Some(header) => header.kdf_version < CURRENT_KDF_VERSION,
        }
    }

    /// Tries candidate KDF versions until one derives a key that `verify`
    /// accepts, typically by opening the persisted vault blob.
    ///
    /// Order: the header's version first (absent, corrupt, or unknown
    /// headers start at the oldest version, which covers vaults created
    /// before headers existed), then the oldest, then the remaining known
    /// versions newest-first. The tail covers a migration interrupted
    /// after the data was re-sealed but before the header was replaced.
    /// Each candidate costs a full Argon2id derivation; the chain is only
    /// exhausted on a genuinely wrong password.
    pub async fn attempt_unlock<F>(
        &self,
        password: &[u8],
        salt: &[u8],
        header: Option<&VaultHeader>,
        verify: F,
    ) -> Result<UnlockOutcome, VaultError>
    where
        F: Fn(&MasterKey) -> bool,
    {
        let start = match header {
            Some(h) if known_version(h.kdf_version) => h.kdf_version,
            Some(h) => {
                tracing::warn!(
                    version = h.kdf_version,
                    "header names an unknown kdf version, starting at oldest"
                );
                OLDEST_KDF_VERSION
            }
            None => OLDEST_KDF_VERSION,
        };

        let mut candidates = Vec::new();
        let order = std::iter::once(start)
            .chain(std::iter::once(OLDEST_KDF_VERSION))
            .chain((OLDEST_KDF_VERSION..=CURRENT_KDF_VERSION).rev());
        for version in order {
            if !candidates.contains(&version) {
                candidates.push(version);
            }
        }

        for version in candidates {
            let master = self.derive_master_key(password, salt, version).await?;
            if !verify(&master) {
                tracing::debug!(version, "kdf candidate rejected, trying next");
                continue;
            }

            let migration_pending = match header {
                None => true,
                Some(h) => {
                    let canonical_mismatch = known_version(h.kdf_version)
                        && h.kdf_params != params_for_version(h.kdf_version);
                    version < CURRENT_KDF_VERSION
                        || version != h.kdf_version
                        || canonical_mismatch
                }
            };
            return Ok(UnlockOutcome {
                master,
                used_version: version,
                migration_pending,
            });
        }

        Err(VaultError::InvalidPassword)
    }

    /// Re-derives with current parameters and returns the matching fresh
    /// header. Does not touch the data: re-keying invalidates every
    /// ciphertext bound to the old key, and re-sealing them is the
    /// caller's job.
    pub async fn migrate(
        &self,
        password: &[u8],
        salt: &[u8],
    ) -> Result<(MasterKey, VaultHeader), VaultError> {
        let params = params_for_version(CURRENT_KDF_VERSION);
        let master = self.executor.derive(password, salt, &params).await?;
        Ok((master, VaultHeader::new(CURRENT_KDF_VERSION, params)))
    }
}
