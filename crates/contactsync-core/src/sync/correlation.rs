//! Identity and version correlation between the two contact repositories.
//!
//! The store keeps three pieces of state in the sync database:
//! - `correlations`: local id ↔ remote id plus the last confirmed remote
//!   version tag, each id unique
//! - `known_local_ids`: every local id the engine has seen; the local diff
//!   uses it to detect creations and deletions
//! - `local_versions`: last-seen version of each local record

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeSet;

use crate::error::{CoreError, DatabaseError};
use crate::storage::Database;
use crate::sync::types::{ContactRef, Correlation, SyncStatus};

/// Persistent correlation store.
pub struct CorrelationStore {
    db: Database,
}

impl CorrelationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the store backed by `~/.config/contactsync/sync.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub fn open() -> Result<Self, CoreError> {
        Ok(Self::new(Database::open()?))
    }

    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn lookup_remote_id(&self, local_id: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .db
            .conn()
            .query_row(
                "SELECT remote_id FROM correlations WHERE local_id = ?1",
                params![local_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn lookup_local_id(&self, remote_id: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .db
            .conn()
            .query_row(
                "SELECT local_id FROM correlations WHERE remote_id = ?1",
                params![remote_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Full correlation row for either side's id.
    pub fn correlation(&self, id: ContactRef<'_>) -> Result<Option<Correlation>, DatabaseError> {
        let (sql, key) = match id {
            ContactRef::Local(id) => (
                "SELECT local_id, remote_id, version_tag FROM correlations WHERE local_id = ?1",
                id,
            ),
            ContactRef::Remote(id) => (
                "SELECT local_id, remote_id, version_tag FROM correlations WHERE remote_id = ?1",
                id,
            ),
        };
        Ok(self
            .db
            .conn()
            .query_row(sql, params![key], |row| {
                Ok(Correlation {
                    local_id: row.get(0)?,
                    remote_id: row.get(1)?,
                    last_version_tag: row.get(2)?,
                })
            })
            .optional()?)
    }

    /// Pair `local_id` with `remote_id`, displacing any previous pairing of either.
    ///
    /// The recorded version tag survives only when the pair is unchanged.
    /// The local id joins the known set.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn link(&self, local_id: &str, remote_id: &str) -> Result<(), DatabaseError> {
        let tx = self.db.conn().unchecked_transaction()?;
        tx.execute(
            "DELETE FROM correlations WHERE remote_id = ?1 AND local_id <> ?2",
            params![remote_id, local_id],
        )?;
        tx.execute(
            "INSERT INTO correlations (local_id, remote_id) VALUES (?1, ?2)
             ON CONFLICT(local_id) DO UPDATE SET
                version_tag = CASE WHEN correlations.remote_id = excluded.remote_id
                                   THEN correlations.version_tag ELSE NULL END,
                remote_id = excluded.remote_id",
            params![local_id, remote_id],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO known_local_ids (local_id) VALUES (?1)",
            params![local_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record the version tag confirmed by a successful write or read.
    ///
    /// No-op for an uncorrelated remote id.
    pub fn record_version_tag(&self, remote_id: &str, tag: &str) -> Result<(), DatabaseError> {
        self.db.conn().execute(
            "UPDATE correlations SET version_tag = ?2 WHERE remote_id = ?1",
            params![remote_id, tag],
        )?;
        Ok(())
    }

    pub fn version_tag(&self, remote_id: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .db
            .conn()
            .query_row(
                "SELECT version_tag FROM correlations WHERE remote_id = ?1",
                params![remote_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    /// True iff a tag was previously recorded for `remote_id` and differs from `tag`.
    pub fn has_version_changed(&self, remote_id: &str, tag: &str) -> Result<bool, DatabaseError> {
        Ok(self
            .version_tag(remote_id)?
            .is_some_and(|recorded| recorded != tag))
    }

    /// Snapshot of the known local id set.
    pub fn known_local_ids(&self) -> Result<BTreeSet<String>, DatabaseError> {
        let mut stmt = self
            .db
            .conn()
            .prepare("SELECT local_id FROM known_local_ids")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn is_known(&self, local_id: &str) -> Result<bool, DatabaseError> {
        let found: Option<i64> = self
            .db
            .conn()
            .query_row(
                "SELECT 1 FROM known_local_ids WHERE local_id = ?1",
                params![local_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn add_known_local_id(&self, local_id: &str) -> Result<(), DatabaseError> {
        self.db.conn().execute(
            "INSERT OR IGNORE INTO known_local_ids (local_id) VALUES (?1)",
            params![local_id],
        )?;
        Ok(())
    }

    pub fn remove_known_local_id(&self, local_id: &str) -> Result<(), DatabaseError> {
        self.db.conn().execute(
            "DELETE FROM known_local_ids WHERE local_id = ?1",
            params![local_id],
        )?;
        Ok(())
    }

    pub fn remember_local_version(&self, local_id: &str, version: &str) -> Result<(), DatabaseError> {
        self.db.conn().execute(
            "INSERT OR REPLACE INTO local_versions (local_id, version) VALUES (?1, ?2)",
            params![local_id, version],
        )?;
        Ok(())
    }

    pub fn local_version(&self, local_id: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .db
            .conn()
            .query_row(
                "SELECT version FROM local_versions WHERE local_id = ?1",
                params![local_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Drop the correlation for either side's id, together with the local
    /// id's membership in the known set and its remembered version.
    ///
    /// Returns the removed correlation, if there was one.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub fn forget(&self, id: ContactRef<'_>) -> Result<Option<Correlation>, DatabaseError> {
        let existing = self.correlation(id.clone())?;
        let local_id = match (&existing, &id) {
            (Some(c), _) => Some(c.local_id.clone()),
            (None, ContactRef::Local(local)) => Some((*local).to_string()),
            (None, ContactRef::Remote(_)) => None,
        };

        let tx = self.db.conn().unchecked_transaction()?;
        if let Some(local_id) = &local_id {
            tx.execute(
                "DELETE FROM correlations WHERE local_id = ?1",
                params![local_id],
            )?;
            tx.execute(
                "DELETE FROM known_local_ids WHERE local_id = ?1",
                params![local_id],
            )?;
            tx.execute(
                "DELETE FROM local_versions WHERE local_id = ?1",
                params![local_id],
            )?;
        }
        tx.commit()?;
        Ok(existing)
    }

    pub fn correlated_count(&self) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM correlations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        self.db.last_sync_at()
    }

    pub fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.db.set_last_sync_at(at)
    }

    /// Forget every correlation, known id, remembered version and the last sync time.
    pub fn reset(&self) -> Result<(), DatabaseError> {
        self.db.reset_sync_state()
    }

    pub fn status(&self) -> Result<SyncStatus, DatabaseError> {
        Ok(SyncStatus {
            last_sync_at: self.last_sync_at()?,
            correlated_count: self.correlated_count()?,
            known_count: self.known_local_ids()?.len(),
        })
    }
}
