//! Core types for contact synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::contact::ContactRecord;
use crate::error::{DatabaseError, ValidationError};

/// Time window a pass covers: `[from, to)`, `from = None` meaning full history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
}

impl Window {
    pub fn new(from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Window covering everything up to `to`.
    pub fn full_history(to: DateTime<Utc>) -> Self {
        Self { from: None, to }
    }

    pub fn is_full_history(&self) -> bool {
        self.from.is_none()
    }

    /// True when `at` lies in `[from, to)`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && at < self.to
    }

    /// The window following this one, ending at `now`.
    pub fn advance(&self, now: DateTime<Utc>) -> Self {
        Self {
            from: Some(self.to),
            to: now,
        }
    }
}

/// A remote-side change as reported by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChangeEntry {
    pub remote_id: String,
    pub version_tag: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub record: Option<ContactRecord>,
}

impl RemoteChangeEntry {
    pub fn live(
        remote_id: impl Into<String>,
        version_tag: impl Into<String>,
        updated_at: DateTime<Utc>,
        record: ContactRecord,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            version_tag: version_tag.into(),
            updated_at,
            deleted: false,
            record: Some(record),
        }
    }

    pub fn tombstone(
        remote_id: impl Into<String>,
        version_tag: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            version_tag: version_tag.into(),
            updated_at,
            deleted: true,
            record: None,
        }
    }

    /// Record carried by a live entry.
    ///
    /// # Errors
    /// Returns `Malformed` when a live entry has no record or the record
    /// fails validation.
    pub fn live_record(&self) -> Result<&ContactRecord, SyncError> {
        live_record(&self.remote_id, self.record.as_ref())
    }
}

/// A local-side change derived by diffing the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalChangeEntry {
    pub local_id: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub record: Option<ContactRecord>,
}

impl LocalChangeEntry {
    pub fn live(
        local_id: impl Into<String>,
        updated_at: DateTime<Utc>,
        record: ContactRecord,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            updated_at,
            deleted: false,
            record: Some(record),
        }
    }

    pub fn tombstone(local_id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            local_id: local_id.into(),
            updated_at,
            deleted: true,
            record: None,
        }
    }

    /// Record carried by a live entry.
    ///
    /// # Errors
    /// Returns `Malformed` when a live entry has no record or the record
    /// fails validation.
    pub fn live_record(&self) -> Result<&ContactRecord, SyncError> {
        live_record(&self.local_id, self.record.as_ref())
    }
}

fn live_record<'a>(
    id: &str,
    record: Option<&'a ContactRecord>,
) -> Result<&'a ContactRecord, SyncError> {
    let record = record.ok_or_else(|| ValidationError::MissingRecord(id.to_string()))?;
    record.validate()?;
    Ok(record)
}

/// Persisted local-id ↔ remote-id pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub local_id: String,
    pub remote_id: String,
    pub last_version_tag: Option<String>,
}

/// Either side's identifier, for operations that accept both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactRef<'a> {
    Local(&'a str),
    Remote(&'a str),
}

/// Which side a change originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

/// One applied change, reported per logical contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Local id when the contact was driven by a local change, remote id otherwise.
    pub contact_key: String,
    pub origin: Origin,
    pub action: Action,
    pub timestamp: DateTime<Utc>,
}

/// A contact skipped during a pass because its data was unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub contact_key: String,
    pub reason: String,
}

/// Entries deferred by one pass and re-evaluated by the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarriedState {
    pub local: BTreeMap<String, LocalChangeEntry>,
    pub remote: BTreeMap<String, RemoteChangeEntry>,
}

impl CarriedState {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

/// Result of a single pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// False when at least one contact hit a version conflict.
    pub completable: bool,
    pub outcomes: Vec<SyncOutcome>,
    pub carried_local: BTreeMap<String, LocalChangeEntry>,
    pub carried_remote: BTreeMap<String, RemoteChangeEntry>,
    pub failures: Vec<SyncFailure>,
    /// High-watermark reported by the remote feed.
    pub watermark: Option<DateTime<Utc>>,
}

impl PassReport {
    /// Deferred entries to hand to the next pass.
    pub fn take_carried(&mut self) -> CarriedState {
        CarriedState {
            local: std::mem::take(&mut self.carried_local),
            remote: std::mem::take(&mut self.carried_remote),
        }
    }
}

/// Counts of applied changes by action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Result of a converged orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// One outcome per logical contact, the last pass that touched it winning.
    pub outcomes: Vec<SyncOutcome>,
    pub failures: Vec<SyncFailure>,
    pub passes: u32,
    /// Window of the final, converged pass.
    pub window: Window,
    pub watermark: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn summary(&self) -> SyncSummary {
        self.outcomes
            .iter()
            .fold(SyncSummary::default(), |mut acc, outcome| {
                match outcome.action {
                    Action::Created => acc.created += 1,
                    Action::Updated => acc.updated += 1,
                    Action::Deleted => acc.deleted += 1,
                }
                acc
            })
    }
}

/// Current sync status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last converged sync timestamp.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub correlated_count: usize,
    pub known_count: usize,
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote record changed since its version tag was read.
    #[error("Version conflict on {id}")]
    VersionConflict { id: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("Local store error: {0}")]
    LocalStore(String),

    #[error("Sync state error: {0}")]
    Database(#[from] DatabaseError),
}

impl SyncError {
    pub fn conflict(id: impl Into<String>) -> Self {
        SyncError::VersionConflict { id: id.into() }
    }

    /// Errors that abort the whole attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Unauthorized(_)
                | SyncError::LocalStore(_)
                | SyncError::Database(_)
        )
    }

    /// Errors resolved by deferring the contact to the next pass.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::VersionConflict { .. })
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Malformed(err.to_string())
    }
}
