//! SQLite-based sync state storage.
//!
//! Provides persistent storage for:
//! - The correlation table and known local ids (see [`crate::sync::CorrelationStore`])
//! - Remembered local record versions
//! - Key-value store for application state (last sync timestamp)

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use super::{data_dir, migrations};
use crate::error::{CoreError, DatabaseError};

const LAST_SYNC_KEY: &str = "last_sync_at";

/// SQLite database holding sync state.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/contactsync/sync.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("sync.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open the database at an explicit path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Upper bound of the last converged sync window.
    ///
    /// # Errors
    /// Returns `Corrupt` if the stored value is not an RFC 3339 timestamp.
    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let Some(raw) = self.kv_get(LAST_SYNC_KEY)? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| DatabaseError::Corrupt {
                column: LAST_SYNC_KEY.to_string(),
                message: e.to_string(),
            })
    }

    pub fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.kv_set(LAST_SYNC_KEY, &at.to_rfc3339())
    }

    /// Drop every piece of sync state so the next run starts from full history.
    ///
    /// # Errors
    /// Returns an error if any table cannot be cleared.
    pub fn reset_sync_state(&self) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "DELETE FROM correlations;
             DELETE FROM known_local_ids;
             DELETE FROM local_versions;",
        )?;
        tx.execute("DELETE FROM kv WHERE key = ?1", params![LAST_SYNC_KEY])?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().as_deref(), Some("hello"));
        db.kv_delete("test").unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
    }

    #[test]
    fn last_sync_roundtrip() {
        let db = Database::open_memory().unwrap();
        assert!(db.last_sync_at().unwrap().is_none());

        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        db.set_last_sync_at(at).unwrap();
        assert_eq!(db.last_sync_at().unwrap(), Some(at));
    }

    #[test]
    fn last_sync_reports_corrupt_value() {
        let db = Database::open_memory().unwrap();
        db.kv_set(LAST_SYNC_KEY, "yesterday").unwrap();
        assert!(matches!(
            db.last_sync_at(),
            Err(DatabaseError::Corrupt { .. })
        ));
    }

    #[test]
    fn reset_clears_state_but_keeps_other_keys() {
        let db = Database::open_memory().unwrap();
        db.set_last_sync_at(Utc::now()).unwrap();
        db.kv_set("other", "x").unwrap();
        db.conn()
            .execute(
                "INSERT INTO correlations (local_id, remote_id) VALUES ('L1', 'R1')",
                [],
            )
            .unwrap();

        db.reset_sync_state().unwrap();

        assert!(db.last_sync_at().unwrap().is_none());
        assert_eq!(db.kv_get("other").unwrap().as_deref(), Some("x"));
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM correlations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn open_at_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.kv_set("k", "v").unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("v"));
    }
}
