//! SQLite-backed store. Single `vault_records` key/value table; every
//! value is already sealed or integrity-checked by the layers above.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::VaultStore;
use crate::error::VaultError;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the vault database at `path`.
    pub fn open(path: &Path) -> Result<Self, VaultError> {
        let conn = Connection::open(path).map_err(map_db_err)?;
        Self::with_connection(conn)
    }

    /// Opens a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self, VaultError> {
        let conn = Connection::open_in_memory().map_err(map_db_err)?;
        Self::with_connection(conn)
    }

    pub fn with_connection(conn: Connection) -> Result<Self, VaultError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vault_records (
                key   TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );",
        )
        .map_err(map_db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl VaultStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, VaultError> {
        self.conn
            .lock()
            .query_row(
                "SELECT value FROM vault_records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_db_err)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO vault_records (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(map_db_err)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        self.conn
            .lock()
            .execute("DELETE FROM vault_records WHERE key = ?1", params![key])
            .map_err(map_db_err)?;
        Ok(())
    }
}

fn map_db_err(err: rusqlite::Error) -> VaultError {
    VaultError::Storage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("vault-blob").unwrap().is_none());

        store.put("vault-blob", b"sealed bytes").unwrap();
        assert_eq!(
            store.get("vault-blob").unwrap(),
            Some(b"sealed bytes".to_vec())
        );

        store.put("vault-blob", b"newer").unwrap();
        assert_eq!(store.get("vault-blob").unwrap(), Some(b"newer".to_vec()));

        store.delete("vault-blob").unwrap();
        assert!(store.get("vault-blob").unwrap().is_none());
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.delete("never-written").unwrap();
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.sqlite");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("vault-header", b"persisted").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("vault-header").unwrap(),
            Some(b"persisted".to_vec())
        );
    }
}
