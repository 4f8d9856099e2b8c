//! In-memory store for tests and ephemeral vaults.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::VaultStore;
use crate::error::VaultError;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record; used to provision one store from another.
    pub fn dump(&self) -> HashMap<String, Vec<u8>> {
        self.records.read().clone()
    }

    /// Replace all records with the given snapshot.
    pub fn load_from(&self, records: HashMap<String, Vec<u8>>) {
        *self.records.write() = records;
    }
}

impl VaultStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        self.records.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        self.records.write().remove(key);
        Ok(())
    }
}
