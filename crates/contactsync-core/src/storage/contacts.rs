//! SQLite-backed local contact store.
//!
//! Records are stored whole as JSON next to a millisecond `updated_at`.
//! The store offers no change notification and no multi-field queries, so
//! the sync engine discovers local changes by listing everything.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::contact::ContactRecord;
use crate::error::{DatabaseError, Result};
use crate::storage::Config;
use crate::sync::{LocalContactStore, LocalRecord, LocalScan, SyncError, SyncFailure};

/// Local contact store persisted in `contacts.db`.
pub struct SqliteContactStore {
    conn: Connection,
}

impl SqliteContactStore {
    /// Open the store at the configured path (`<data dir>/contacts.db` by default).
    ///
    /// # Errors
    /// Returns an error if the path cannot be resolved or the database opened.
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.contacts_db_path()?;
        Ok(Self::open_at(&path)?)
    }

    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub fn open_at(path: &Path) -> std::result::Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> std::result::Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> std::result::Result<Self, DatabaseError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS contacts (
                id         TEXT PRIMARY KEY,
                record     TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_contacts_updated_at ON contacts(updated_at);",
        )
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn count(&self) -> std::result::Result<usize, SyncError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .map_err(store_error)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Decode one stored row. An undecodable row is `Malformed`, which the
    /// sync engine skips and reports for that contact alone.
    fn row_to_record(
        id: String,
        raw: &str,
        millis: i64,
    ) -> std::result::Result<LocalRecord, SyncError> {
        let record: ContactRecord = serde_json::from_str(raw)
            .map_err(|e| SyncError::Malformed(format!("local contact {id}: {e}")))?;
        let updated_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            SyncError::Malformed(format!("local contact {id}: invalid updated_at {millis}"))
        })?;
        Ok(LocalRecord {
            local_id: id,
            updated_at,
            record,
        })
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, id: &str, raw: &str, millis: i64) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO contacts (id, record, updated_at) VALUES (?1, ?2, ?3)",
            params![id, raw, millis],
        )?;
        Ok(())
    }

    /// Millisecond timestamp strictly after `previous`, rounded up so it is
    /// never earlier than the current instant.
    fn next_stamp(previous: Option<i64>) -> i64 {
        let instant = Utc::now();
        let partial = i64::from(instant.timestamp_subsec_nanos() % 1_000_000 != 0);
        let now = instant.timestamp_millis() + partial;
        match previous {
            Some(prev) if prev >= now => prev + 1,
            _ => now,
        }
    }

    fn encode(record: &ContactRecord) -> std::result::Result<String, SyncError> {
        serde_json::to_string(record).map_err(|e| SyncError::LocalStore(e.to_string()))
    }
}

fn store_error(err: rusqlite::Error) -> SyncError {
    SyncError::LocalStore(DatabaseError::from(err).to_string())
}

impl LocalContactStore for SqliteContactStore {
    fn list_all(&self) -> std::result::Result<LocalScan, SyncError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, record, updated_at FROM contacts ORDER BY id")
            .map_err(store_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(store_error)?;

        let mut scan = LocalScan::default();
        for row in rows {
            let (id, raw, millis) = row.map_err(store_error)?;
            match Self::row_to_record(id.clone(), &raw, millis) {
                Ok(record) => scan.records.push(record),
                Err(SyncError::Malformed(reason)) => scan.unreadable.push(SyncFailure {
                    contact_key: id,
                    reason,
                }),
                Err(e) => return Err(e),
            }
        }
        Ok(scan)
    }

    fn get(&self, local_id: &str) -> std::result::Result<Option<LocalRecord>, SyncError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, record, updated_at FROM contacts WHERE id = ?1",
                params![local_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(store_error)?;
        row.map(|(id, raw, millis)| Self::row_to_record(id, &raw, millis))
            .transpose()
    }

    fn create(&self, record: &ContactRecord) -> std::result::Result<LocalRecord, SyncError> {
        let id = Uuid::new_v4().to_string();
        let stamp = Self::next_stamp(None);
        self.conn
            .execute(
                "INSERT INTO contacts (id, record, updated_at) VALUES (?1, ?2, ?3)",
                params![id, Self::encode(record)?, stamp],
            )
            .map_err(store_error)?;
        Self::row_to_record(id, &Self::encode(record)?, stamp)
    }

    fn update(
        &self,
        local_id: &str,
        record: &ContactRecord,
    ) -> std::result::Result<LocalRecord, SyncError> {
        let previous: Option<i64> = self
            .conn
            .query_row(
                "SELECT updated_at FROM contacts WHERE id = ?1",
                params![local_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)?;
        let Some(previous) = previous else {
            return Err(SyncError::LocalStore(format!("no local contact {local_id}")));
        };

        let stamp = Self::next_stamp(Some(previous));
        let encoded = Self::encode(record)?;
        self.conn
            .execute(
                "UPDATE contacts SET record = ?2, updated_at = ?3 WHERE id = ?1",
                params![local_id, encoded, stamp],
            )
            .map_err(store_error)?;
        Self::row_to_record(local_id.to_string(), &encoded, stamp)
    }

    fn delete(&self, local_id: &str) -> std::result::Result<(), SyncError> {
        self.conn
            .execute("DELETE FROM contacts WHERE id = ?1", params![local_id])
            .map_err(store_error)?;
        Ok(())
    }
}
