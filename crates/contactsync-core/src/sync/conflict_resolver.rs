//! Per-contact conflict resolution.
//!
//! [`decide`] is a pure function from a contact's pending changes and its
//! correlation to the action to take. [`Resolver`] carries that action out
//! against both repositories and updates the correlation store once the
//! write is confirmed.
//!
//! Resolution is whole-record last-writer-wins: when both sides changed a
//! correlated contact, the strictly later `updated_at` wins and a tie goes
//! to the local side.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::sync::correlation::CorrelationStore;
use crate::sync::credential::Credential;
use crate::sync::local::{version_token, LocalContactStore};
use crate::sync::remote::RemoteDirectory;
use crate::sync::types::{
    Action, ContactRef, Correlation, LocalChangeEntry, Origin, RemoteChangeEntry, SyncError,
    SyncOutcome,
};

/// Action chosen for one logical contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Create a local record from the remote one.
    Import,
    /// Overwrite the correlated local record from the remote one.
    PullUpdate { local_id: String },
    /// Create a remote record from the local one.
    PushCreate,
    /// Overwrite the correlated remote record from the local one.
    PushUpdate { remote_id: String },
    /// Delete the local record and forget the correlation.
    DeleteLocal { local_id: String },
    /// Delete the remote record and forget the correlation.
    DeleteRemote { remote_id: String },
    /// Drop an uncorrelated local id from the known set.
    ForgetLocal { local_id: String },
    Skip,
}

impl Resolution {
    /// Side whose change drives the action.
    pub fn origin(&self) -> Origin {
        match self {
            Resolution::Import | Resolution::PullUpdate { .. } | Resolution::DeleteLocal { .. } => {
                Origin::Remote
            }
            _ => Origin::Local,
        }
    }
}

/// Decide what to do with a contact given its pending changes.
///
/// A remote entry is only meaningful alongside a local entry through the
/// correlation; without one the local change is handled on its own.
pub fn decide(
    local: Option<&LocalChangeEntry>,
    remote: Option<&RemoteChangeEntry>,
    correlation: Option<&Correlation>,
) -> Resolution {
    match (local, remote, correlation) {
        (None, None, _) => Resolution::Skip,

        (None, Some(r), None) if r.deleted => Resolution::Skip,
        (None, Some(_), None) => Resolution::Import,
        (None, Some(r), Some(c)) if r.deleted => Resolution::DeleteLocal {
            local_id: c.local_id.clone(),
        },
        (None, Some(_), Some(c)) => Resolution::PullUpdate {
            local_id: c.local_id.clone(),
        },

        (Some(l), _, None) if l.deleted => Resolution::ForgetLocal {
            local_id: l.local_id.clone(),
        },
        (Some(_), _, None) => Resolution::PushCreate,

        (Some(l), _, Some(c)) if l.deleted => Resolution::DeleteRemote {
            remote_id: c.remote_id.clone(),
        },
        (Some(_), None, Some(c)) => Resolution::PushUpdate {
            remote_id: c.remote_id.clone(),
        },
        (Some(_), Some(r), Some(c)) if r.deleted => Resolution::DeleteLocal {
            local_id: c.local_id.clone(),
        },
        (Some(l), Some(r), Some(c)) => {
            if r.updated_at > l.updated_at {
                Resolution::PullUpdate {
                    local_id: c.local_id.clone(),
                }
            } else {
                Resolution::PushUpdate {
                    remote_id: c.remote_id.clone(),
                }
            }
        }
    }
}

/// Applies resolutions against both repositories.
pub struct Resolver<'a> {
    pub remote: &'a dyn RemoteDirectory,
    pub local: &'a dyn LocalContactStore,
    pub correlations: &'a CorrelationStore,
    pub credential: &'a Credential,
}

impl Resolver<'_> {
    /// Resolve and apply one contact's pending changes.
    ///
    /// Returns the applied outcome, or `None` when nothing had to be written.
    ///
    /// # Errors
    /// `VersionConflict` when either side moved on since its change was read;
    /// `Malformed` when the winning record is unusable; fatal errors from
    /// either repository or the sync state.
    pub async fn resolve(
        &self,
        local: Option<&LocalChangeEntry>,
        remote: Option<&RemoteChangeEntry>,
    ) -> Result<Option<SyncOutcome>, SyncError> {
        let correlation = self.correlation_for(local, remote)?;
        let resolution = decide(local, remote, correlation.as_ref());
        let contact_key = match (local, remote) {
            (Some(l), _) => l.local_id.clone(),
            (None, Some(r)) => r.remote_id.clone(),
            (None, None) => return Ok(None),
        };

        debug!(contact = %contact_key, ?resolution, "resolved contact");

        let applied = match &resolution {
            Resolution::Skip => return Ok(None),
            Resolution::Import => self.import(required(remote)?)?,
            Resolution::PullUpdate { local_id } => {
                self.pull_update(local_id, required(remote)?)?
            }
            Resolution::PushCreate => self.push_create(required(local)?).await?,
            Resolution::PushUpdate { remote_id } => {
                self.push_update(remote_id, required(local)?, remote).await?
            }
            Resolution::DeleteLocal { local_id } => {
                self.delete_local(local_id, required(remote)?)?
            }
            Resolution::DeleteRemote { remote_id } => {
                self.delete_remote(remote_id, required(local)?, remote).await?
            }
            Resolution::ForgetLocal { local_id } => {
                self.correlations.forget(ContactRef::Local(local_id))?;
                (Action::Deleted, required(local)?.updated_at)
            }
        };

        let (action, timestamp) = applied;
        Ok(Some(SyncOutcome {
            contact_key,
            origin: resolution.origin(),
            action,
            timestamp,
        }))
    }

    fn correlation_for(
        &self,
        local: Option<&LocalChangeEntry>,
        remote: Option<&RemoteChangeEntry>,
    ) -> Result<Option<Correlation>, SyncError> {
        if let Some(l) = local {
            return Ok(self.correlations.correlation(ContactRef::Local(&l.local_id))?);
        }
        match remote {
            Some(r) => Ok(self.correlations.correlation(ContactRef::Remote(&r.remote_id))?),
            None => Ok(None),
        }
    }

    /// Tag the remote write is conditioned on.
    fn expected_tag(
        &self,
        remote_id: &str,
        remote: Option<&RemoteChangeEntry>,
    ) -> Result<Option<String>, SyncError> {
        match remote {
            Some(r) if r.remote_id == remote_id => Ok(Some(r.version_tag.clone())),
            _ => Ok(self.correlations.version_tag(remote_id)?),
        }
    }

    /// Fails with `VersionConflict` when the local record changed since the
    /// diff remembered it. Returns false when the record no longer exists.
    fn ensure_local_unchanged(&self, local_id: &str) -> Result<bool, SyncError> {
        let Some(current) = self.local.get(local_id)? else {
            return Ok(false);
        };
        let remembered = self.correlations.local_version(local_id)?;
        if remembered.is_some_and(|v| v != current.version()) {
            return Err(SyncError::conflict(local_id));
        }
        Ok(true)
    }

    fn confirm_link(
        &self,
        local_id: &str,
        remote_id: &str,
        tag: &str,
        local_version: &str,
    ) -> Result<(), SyncError> {
        self.correlations.link(local_id, remote_id)?;
        self.correlations.record_version_tag(remote_id, tag)?;
        self.correlations
            .remember_local_version(local_id, local_version)?;
        Ok(())
    }

    fn import(&self, r: &RemoteChangeEntry) -> Result<(Action, DateTime<Utc>), SyncError> {
        let record = r.live_record()?;
        let created = self.local.create(record)?;
        self.confirm_link(
            &created.local_id,
            &r.remote_id,
            &r.version_tag,
            &created.version(),
        )?;
        Ok((Action::Created, created.updated_at))
    }

    fn pull_update(
        &self,
        local_id: &str,
        r: &RemoteChangeEntry,
    ) -> Result<(Action, DateTime<Utc>), SyncError> {
        let record = r.live_record()?;
        if !self.ensure_local_unchanged(local_id)? {
            // Deleted locally mid-pass; the next diff reports the tombstone.
            return Err(SyncError::conflict(local_id));
        }
        let updated = self.local.update(local_id, record)?;
        self.confirm_link(local_id, &r.remote_id, &r.version_tag, &updated.version())?;
        Ok((Action::Updated, updated.updated_at))
    }

    async fn push_create(
        &self,
        l: &LocalChangeEntry,
    ) -> Result<(Action, DateTime<Utc>), SyncError> {
        let record = l.live_record()?;
        let receipt = self.remote.create(record, self.credential).await?;
        self.confirm_link(
            &l.local_id,
            &receipt.remote_id,
            &receipt.version_tag,
            &version_token(l.updated_at),
        )?;
        Ok((Action::Created, receipt.updated_at))
    }

    async fn push_update(
        &self,
        remote_id: &str,
        l: &LocalChangeEntry,
        remote: Option<&RemoteChangeEntry>,
    ) -> Result<(Action, DateTime<Utc>), SyncError> {
        let record = l.live_record()?;
        let expected = self.expected_tag(remote_id, remote)?;
        let receipt = self
            .remote
            .update(remote_id, record, expected.as_deref(), self.credential)
            .await?;
        self.confirm_link(
            &l.local_id,
            &receipt.remote_id,
            &receipt.version_tag,
            &version_token(l.updated_at),
        )?;
        Ok((Action::Updated, receipt.updated_at))
    }

    fn delete_local(
        &self,
        local_id: &str,
        r: &RemoteChangeEntry,
    ) -> Result<(Action, DateTime<Utc>), SyncError> {
        if self.ensure_local_unchanged(local_id)? {
            self.local.delete(local_id)?;
        }
        self.correlations.forget(ContactRef::Local(local_id))?;
        Ok((Action::Deleted, r.updated_at))
    }

    async fn delete_remote(
        &self,
        remote_id: &str,
        l: &LocalChangeEntry,
        remote: Option<&RemoteChangeEntry>,
    ) -> Result<(Action, DateTime<Utc>), SyncError> {
        let expected = self.expected_tag(remote_id, remote)?;
        self.remote
            .delete(remote_id, expected.as_deref(), self.credential)
            .await?;
        self.correlations.forget(ContactRef::Remote(remote_id))?;
        Ok((Action::Deleted, l.updated_at))
    }
}

fn required<T>(entry: Option<&T>) -> Result<&T, SyncError> {
    entry.ok_or_else(|| SyncError::Malformed("resolution without its change entry".into()))
}
