use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::ContactRecord;
use crate::sync::credential::Credential;
use crate::sync::types::{RemoteChangeEntry, SyncError, SyncFailure, Window};

/// Changes returned by one feed request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteFeed {
    pub entries: Vec<RemoteChangeEntry>,
    /// Entries that could not be decoded; the rest of the feed stays usable.
    #[serde(default)]
    pub rejected: Vec<SyncFailure>,
    /// Feed high-watermark timestamp.
    pub watermark: Option<DateTime<Utc>>,
}

/// Identity and version of a record after a successful remote write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWriteReceipt {
    pub remote_id: String,
    pub version_tag: String,
    pub updated_at: DateTime<Utc>,
}

/// A remote contact directory with a poll-based change feed and
/// version-tag concurrency control.
///
/// Writes that carry an `expected_tag` must fail with
/// [`SyncError::VersionConflict`] when the stored record has moved on.
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// Records modified within `window`, tombstones included when
    /// `window.from` is set.
    async fn fetch_changes(
        &self,
        window: &Window,
        credential: &Credential,
    ) -> Result<RemoteFeed, SyncError>;

    async fn create(
        &self,
        record: &ContactRecord,
        credential: &Credential,
    ) -> Result<RemoteWriteReceipt, SyncError>;

    async fn update(
        &self,
        remote_id: &str,
        record: &ContactRecord,
        expected_tag: Option<&str>,
        credential: &Credential,
    ) -> Result<RemoteWriteReceipt, SyncError>;

    async fn delete(
        &self,
        remote_id: &str,
        expected_tag: Option<&str>,
        credential: &Credential,
    ) -> Result<(), SyncError>;
}
