//! Schema upgrades for the persistent entry database.
//!
//! The schema version lives in SQLite's `user_version` header field. Step `n`
//! in [`STEPS`] upgrades a database from version `n` to `n + 1`; all pending
//! steps run in a single transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Upgrade scripts, oldest first.
const STEPS: &[&str] = &[
    // 0 -> 1: persistent entries keyed by name, values CBOR-encoded.
    "CREATE TABLE persistent_entries (
         name TEXT PRIMARY KEY,
         value BLOB NOT NULL,
         updated_at INTEGER NOT NULL
     );",
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = STEPS.len() as u32;

/// Version recorded in the database header. Zero for a fresh file.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Upgrade the schema to [`CURRENT_VERSION`]. A no-op when already current.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at schema {}, this build understands up to {}",
            found, CURRENT_VERSION
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in &STEPS[found as usize..] {
        tx.execute_batch(step)?;
    }
    // PRAGMA does not take bound parameters.
    tx.execute_batch(&format!("PRAGMA user_version = {}", CURRENT_VERSION))?;
    tx.commit()?;
    Ok(())
}

/// Milliseconds since the Unix epoch, or zero for a clock set before it.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
