//! Offload boundary for expensive key derivation.
//!
//! Argon2id runs for tens of milliseconds and touches tens of megabytes;
//! the executor keeps that work and its raw intermediate bytes away from
//! the caller's state. [`IsolatedExecutor`] runs derivations on a
//! dedicated worker with request/response correlation and a timeout;
//! [`InProcessExecutor`] is the synchronous fallback with the same
//! signatures and the same wipe guarantees, so callers never know which
//! mode is active.

mod in_process;
mod isolated;

use std::time::Duration;

use async_trait::async_trait;
use keyloft_crypto::{KdfParams, MasterKey};
use zeroize::{Zeroize, Zeroizing};

use crate::error::VaultError;

pub use in_process::InProcessExecutor;
pub use isolated::IsolatedExecutor;

/// Default time allowed for one derivation before the request is abandoned.
pub const DERIVE_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait KeyDerivationExecutor: Send + Sync {
    /// Derives a master key handle. No raw copy survives the call.
    async fn derive(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<MasterKey, VaultError>;

    /// Derives the key and additionally hands back the raw bytes in a
    /// wipe-on-drop wrapper. Only KDF migration and share export need the
    /// raw form; everything else goes through [`derive`](Self::derive).
    async fn derive_with_raw(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<(MasterKey, Zeroizing<Vec<u8>>), VaultError>;

    /// Overwrites a buffer with zeros.
    fn secure_wipe(&self, buf: &mut [u8]) {
        buf.zeroize();
    }
}
