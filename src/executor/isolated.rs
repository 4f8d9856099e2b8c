//! Dedicated-thread executor with correlation IDs and timeouts.
//!
//! Requests cross an mpsc channel to a worker thread that runs Argon2id
//! and answers over a oneshot. A timed-out request is simply abandoned:
//! the worker finishes, fails to deliver the reply, and the dropped reply
//! wipes the derived bytes on its way out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keyloft_crypto::{kdf, CryptoError, KdfParams, MasterKey};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{KeyDerivationExecutor, DERIVE_TIMEOUT};
use crate::error::VaultError;

struct DeriveRequest {
    id: Uuid,
    password: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    params: KdfParams,
    reply: oneshot::Sender<Result<DeriveReply, CryptoError>>,
}

/// Always carries the raw bytes; `derive` drops them unread, and the
/// `Zeroizing` wrapper wipes on that drop.
struct DeriveReply {
    master: MasterKey,
    raw: Zeroizing<Vec<u8>>,
}

pub struct IsolatedExecutor {
    requests: mpsc::Sender<DeriveRequest>,
    in_flight: Arc<Mutex<HashMap<Uuid, Instant>>>,
    timeout: Duration,
}

impl IsolatedExecutor {
    pub fn new() -> Self {
        Self::with_timeout(DERIVE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<DeriveRequest>(16);
        std::thread::spawn(move || worker_loop(rx));
        Self {
            requests: tx,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Requests still awaiting a reply. Abandoned requests are removed
    /// when they time out, so this converges back to zero.
    pub fn pending_requests(&self) -> usize {
        self.in_flight.lock().len()
    }

    async fn submit(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<DeriveReply, VaultError> {
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = DeriveRequest {
            id,
            password: Zeroizing::new(password.to_vec()),
            salt: salt.to_vec(),
            params: params.clone(),
            reply: reply_tx,
        };

        self.in_flight.lock().insert(id, Instant::now());
        if self.requests.send(request).await.is_err() {
            self.in_flight.lock().remove(&id);
            return Err(VaultError::ExecutorUnavailable);
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(outcome)) => {
                if let Some(started) = self.in_flight.lock().remove(&id) {
                    tracing::debug!(
                        correlation_id = %id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "key derivation finished"
                    );
                }
                Ok(outcome?)
            }
            Ok(Err(_)) => {
                self.in_flight.lock().remove(&id);
                Err(VaultError::ExecutorUnavailable)
            }
            Err(_) => {
                self.in_flight.lock().remove(&id);
                let timeout_ms = self.timeout.as_millis() as u64;
                tracing::warn!(
                    correlation_id = %id,
                    timeout_ms,
                    "key derivation timed out, abandoning request"
                );
                Err(VaultError::ExecutorTimeout {
                    correlation_id: id,
                    timeout_ms,
                })
            }
        }
    }
}

impl Default for IsolatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyDerivationExecutor for IsolatedExecutor {
    async fn derive(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<MasterKey, VaultError> {
        let reply = self.submit(password, salt, params).await?;
        Ok(reply.master)
    }

    async fn derive_with_raw(
        &self,
        password: &[u8],
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<(MasterKey, Zeroizing<Vec<u8>>), VaultError> {
        let reply = self.submit(password, salt, params).await?;
        Ok((reply.master, reply.raw))
    }
}

fn worker_loop(mut rx: mpsc::Receiver<DeriveRequest>) {
    while let Some(request) = rx.blocking_recv() {
        let DeriveRequest {
            id,
            password,
            salt,
            params,
            reply,
        } = request;
        let outcome = run_derivation(&password, &salt, &params);
        if reply.send(outcome).is_err() {
            tracing::debug!(correlation_id = %id, "derivation reply dropped, caller gave up");
        }
    }
}

fn run_derivation(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<DeriveReply, CryptoError> {
    let raw = kdf::derive_key(password, salt, params)?;
    let master = MasterKey::from_slice(&raw)?;
    Ok(DeriveReply { master, raw })
}
