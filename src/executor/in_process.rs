//! Synchronous fallback executor. Runs the derivation on the calling
//! task; raw bytes still live only inside wipe-on-drop wrappers.

use async_trait::async_trait;
use keyloft_crypto::{kdf, KdfParams, MasterKey};
use zeroize::Zeroizing;

use super::KeyDerivationExecutor;
use crate::error::VaultError;

pub struct InProcessExecutor;

#[async_trait]
impl KeyDerivationExecutor for InProcessExecutor {
    async fn derive(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<MasterKey, VaultError> {
        Ok(kdf::derive_master_key(password, salt, params)?)
    }

    async fn derive_with_raw(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<(MasterKey, Zeroizing<Vec<u8>>), VaultError> {
        let raw = kdf::derive_key(password, salt, params)?;
        let master = MasterKey::from_slice(&raw)?;
        Ok((master, raw))
    }
}
