use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub const KEY_TRADES: &str = "local_trades";
pub const KEY_STRATEGIES: &str = "local_strategies";
pub const KEY_LABELS: &str = "local_emotions";
pub const KEY_ACCOUNTS: &str = "local_portfolios";
pub const KEY_ACTIVE_ACCOUNTS: &str = "app_active_portfolios";
pub const KEY_LOSS_COLOR: &str = "app_loss_color";

/// Every key this client persists. A factory reset removes all of them.
pub const ALL_KEYS: &[&str] = &[
    KEY_TRADES,
    KEY_STRATEGIES,
    KEY_LABELS,
    KEY_ACCOUNTS,
    KEY_ACTIVE_ACCOUNTS,
    KEY_LOSS_COLOR,
];

/// Synchronous string-keyed store holding the durable mirror of local state.
pub trait LocalStore: Send {
    fn get_raw(&self, key: &str) -> Result<Option<String>>;
    fn set_raw(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    /// Remove every key, including ones this client does not know about.
    fn clear(&mut self) -> Result<()>;
}

/// Read a JSON value, falling back to `default` when the key is missing or
/// unreadable. Failures are logged, never returned.
pub fn get_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str, default: T) -> T {
    match store.get_raw(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding unreadable local value");
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            tracing::warn!(key, error = %e, "local store read failed");
            default
        }
    }
}

/// Serialize and write a value. Durability is best-effort: failures are
/// logged and swallowed.
pub fn set_json<T: Serialize + ?Sized>(store: &mut dyn LocalStore, key: &str, value: &T) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(key, error = %e, "could not serialize local value");
            return;
        }
    };
    if let Err(e) = store.set_raw(key, &raw) {
        tracing::warn!(key, error = %e, "local store write failed");
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT DEFAULT (datetime('now'))
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn key_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT count(*) FROM kv", [], |r| r.get(0))?)
    }
}

impl LocalStore for SqliteStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    fn set_raw(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
impl LocalStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set_raw(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.values.clear();
        Ok(())
    }
}
