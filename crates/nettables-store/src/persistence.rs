//! SQLite storage for persistent entries.
//!
//! The server saves the full set of persistent entries whenever one of them
//! changes and reloads it on start. Values are stored as CBOR blobs.
//! Every call runs on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::debug;

use nettables_core::{Entry, Value};

use crate::error::{Result, StoreError};
use crate::migration;

/// Persistent entry database.
#[derive(Clone)]
pub struct PersistentStore {
    conn: Arc<Mutex<Connection>>,
}

impl PersistentStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An in-memory database, for tests.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Replace the stored set with `entries`.
    pub async fn save(&self, entries: &[Entry]) -> Result<usize> {
        let rows = entries
            .iter()
            .map(|e| Ok((e.name().to_owned(), encode_value(e.value())?)))
            .collect::<Result<Vec<(String, Vec<u8>)>>>()?;
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM persistent_entries", [])?;
            let now = migration::now_millis();
            for (name, value) in &rows {
                tx.execute(
                    "INSERT INTO persistent_entries (name, value, updated_at) VALUES (?1, ?2, ?3)",
                    params![name, value, now],
                )?;
            }
            tx.commit()?;
            debug!(count = rows.len(), "saved persistent entries");
            Ok(rows.len())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Every stored entry, sorted by name.
    pub async fn load(&self) -> Result<Vec<(String, Value)>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<Vec<(String, Value)>> {
            let conn = conn.lock();
            let mut stmt =
                conn.prepare("SELECT name, value FROM persistent_entries ORDER BY name")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(name, blob)| Ok((name, decode_value(&blob)?)))
                .collect()
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore").finish_non_exhaustive()
    }
}

fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_value(bytes: &[u8]) -> Result<Value> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
