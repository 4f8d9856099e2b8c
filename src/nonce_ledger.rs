//! Rolling history of AES-GCM nonces already used under the vault keys.
//!
//! GCM is catastrophically broken by nonce reuse under one key, so every
//! freshly generated nonce is checked against this ledger before it seals
//! anything. A collision here means the randomness source is misbehaving,
//! which the envelope escalates rather than papering over.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use keyloft_crypto::AES_GCM_NONCE_LENGTH;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::store::{VaultStore, NONCE_LEDGER_KEY};

/// Maximum nonces retained. On overflow the oldest half is dropped.
pub const NONCE_HISTORY_CAP: usize = 10_000;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerRecord {
    ivs: Vec<String>,
    last_rotation: i64,
}

pub struct NonceLedger {
    /// Insertion order, oldest first. Drives overflow eviction.
    order: Vec<[u8; AES_GCM_NONCE_LENGTH]>,
    seen: HashSet<[u8; AES_GCM_NONCE_LENGTH]>,
    last_rotation: i64,
}

impl NonceLedger {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            seen: HashSet::new(),
            last_rotation: 0,
        }
    }

    /// Loads the persisted ledger. A missing record yields an empty ledger;
    /// individual entries that fail to decode are skipped, not fatal, so a
    /// partially damaged ledger degrades to a shorter history.
    pub fn load(store: &dyn VaultStore) -> Result<Self, VaultError> {
        let Some(bytes) = store.get(NONCE_LEDGER_KEY)? else {
            return Ok(Self::new());
        };
        let record: LedgerRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %err, "nonce ledger unreadable, starting fresh");
                return Ok(Self::new());
            }
        };

        let mut ledger = Self::new();
        ledger.last_rotation = record.last_rotation;
        for iv in &record.ivs {
            let decoded = match STANDARD.decode(iv) {
                Ok(decoded) => decoded,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping undecodable ledger nonce");
                    continue;
                }
            };
            let Ok(nonce) = <[u8; AES_GCM_NONCE_LENGTH]>::try_from(decoded.as_slice()) else {
                tracing::warn!(len = decoded.len(), "skipping ledger nonce of wrong length");
                continue;
            };
            if ledger.seen.insert(nonce) {
                ledger.order.push(nonce);
            }
        }
        Ok(ledger)
    }

    pub fn contains(&self, nonce: &[u8; AES_GCM_NONCE_LENGTH]) -> bool {
        self.seen.contains(nonce)
    }

    /// Records a nonce as used, rotating out the oldest half at capacity.
    pub fn record(&mut self, nonce: [u8; AES_GCM_NONCE_LENGTH]) {
        if !self.seen.insert(nonce) {
            return;
        }
        self.order.push(nonce);
        if self.order.len() > NONCE_HISTORY_CAP {
            let drop = self.order.len() / 2;
            for old in self.order.drain(..drop) {
                self.seen.remove(&old);
            }
            self.last_rotation = Utc::now().timestamp_millis();
            tracing::debug!(dropped = drop, "nonce ledger rotated");
        }
    }

    pub fn persist(&self, store: &dyn VaultStore) -> Result<(), VaultError> {
        let record = LedgerRecord {
            ivs: self.order.iter().map(|iv| STANDARD.encode(iv)).collect(),
            last_rotation: self.last_rotation,
        };
        let bytes = serde_json::to_vec(&record)?;
        store.put(NONCE_LEDGER_KEY, &bytes)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for NonceLedger {
    fn default() -> Self {
        Self::new()
    }
}
