//! Local contact store contract and the full-scan change diff.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::contact::ContactRecord;
use crate::sync::correlation::CorrelationStore;
use crate::sync::types::{LocalChangeEntry, SyncError, SyncFailure, Window};

/// A record as held by the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub local_id: String,
    pub updated_at: DateTime<Utc>,
    pub record: ContactRecord,
}

impl LocalRecord {
    /// Version token derived from the last-modified time.
    pub fn version(&self) -> String {
        version_token(self.updated_at)
    }
}

/// Version token for a local last-modified time.
pub fn version_token(updated_at: DateTime<Utc>) -> String {
    updated_at.timestamp_millis().to_string()
}

/// Everything the local store holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalScan {
    pub records: Vec<LocalRecord>,
    /// Rows that exist but could not be decoded, keyed by local id.
    pub unreadable: Vec<SyncFailure>,
}

/// Local changes for one window, plus the records that could not be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalDiff {
    pub changes: Vec<LocalChangeEntry>,
    pub failures: Vec<SyncFailure>,
}

/// A local contact store whose only query primitive is "list everything".
///
/// Every write bumps the record's `updated_at`. A single undecodable row
/// must not fail `list_all`; it is returned in [`LocalScan::unreadable`],
/// and `get` reports it as [`SyncError::Malformed`].
pub trait LocalContactStore {
    fn list_all(&self) -> Result<LocalScan, SyncError>;

    fn get(&self, local_id: &str) -> Result<Option<LocalRecord>, SyncError>;

    fn create(&self, record: &ContactRecord) -> Result<LocalRecord, SyncError>;

    fn update(&self, local_id: &str, record: &ContactRecord) -> Result<LocalRecord, SyncError>;

    fn delete(&self, local_id: &str) -> Result<(), SyncError>;
}

/// Derive local creates, updates and deletes for `window`.
///
/// A record is emitted when its id is not yet known, or when it was modified
/// inside the window and its version differs from the remembered one. The
/// remembered version is refreshed for every emitted record. Known ids that
/// no longer appear in the store are emitted as deletes stamped `window.to`.
/// Unreadable rows are reported as failures and never count as deleted.
///
/// # Errors
/// Propagates local store and sync state failures.
pub fn diff_local_changes(
    store: &dyn LocalContactStore,
    correlations: &CorrelationStore,
    window: &Window,
) -> Result<LocalDiff, SyncError> {
    let known = correlations.known_local_ids()?;
    let scan = store.list_all()?;
    let mut seen: BTreeSet<String> = scan
        .unreadable
        .iter()
        .map(|failure| failure.contact_key.clone())
        .collect();
    let mut changes = Vec::new();

    for local in scan.records {
        seen.insert(local.local_id.clone());

        let version = local.version();
        let is_new = !known.contains(&local.local_id);
        let is_modified = window.contains(local.updated_at)
            && correlations.local_version(&local.local_id)?.as_deref() != Some(version.as_str());

        if is_new || is_modified {
            correlations.remember_local_version(&local.local_id, &version)?;
            changes.push(LocalChangeEntry::live(
                local.local_id,
                local.updated_at,
                local.record,
            ));
        }
    }

    for gone in known.difference(&seen) {
        changes.push(LocalChangeEntry::tombstone(gone.clone(), window.to));
    }

    for failure in &scan.unreadable {
        warn!(contact = %failure.contact_key, reason = %failure.reason,
              "skipping unreadable local contact");
    }
    debug!(
        scanned = seen.len(),
        changed = changes.len(),
        unreadable = scan.unreadable.len(),
        "local diff complete"
    );
    Ok(LocalDiff {
        changes,
        failures: scan.unreadable,
    })
}
