//! Optional durable key-value state: in-memory or SQLite.
//!
//! The pipeline works correctly with [`MemoryStore`]; [`SqliteStore`] only
//! adds survival of fingerprints and approval requests across restarts.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use sqlite::State;
use tracing::info;

use crate::error::StorageError;

pub trait Store: Send + Sync {
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
    #[cfg(test)]
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// All `(key, value)` pairs whose key starts with `prefix`, key-ordered.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError>;
}

pub type SharedStore = Arc<dyn Store>;

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    #[cfg(test)]
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    conn: Mutex<sqlite::Connection>,
}

impl SqliteStore {
    /// Open (or create) the state database and ensure the schema exists.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = sqlite::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
             );",
        )?;
        info!("State DB opened at {path}");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, sqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for SqliteStore {
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let db = self.conn();
        let mut stmt = db.prepare("INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)")?;
        stmt.bind((1, key))?;
        stmt.bind((2, value))?;
        stmt.next()?;
        Ok(())
    }

    #[cfg(test)]
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT value FROM kv WHERE key = ?")?;
        stmt.bind((1, key))?;
        if let State::Row = stmt.next()? {
            return Ok(Some(stmt.read::<String, _>(0)?));
        }
        Ok(None)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let db = self.conn();
        let mut stmt = db.prepare("DELETE FROM kv WHERE key = ?")?;
        stmt.bind((1, key))?;
        stmt.next()?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let db = self.conn();
        let mut stmt =
            db.prepare("SELECT key, value FROM kv WHERE substr(key, 1, ?) = ? ORDER BY key")?;
        stmt.bind((1, prefix.chars().count() as i64))?;
        stmt.bind((2, prefix))?;
        let mut rows = Vec::new();
        while let State::Row = stmt.next()? {
            rows.push((stmt.read::<String, _>(0)?, stmt.read::<String, _>(1)?));
        }
        Ok(rows)
    }
}
