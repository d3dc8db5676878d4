//! One synchronization attempt over a fixed window.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::sync::conflict_resolver::Resolver;
use crate::sync::correlation::CorrelationStore;
use crate::sync::credential::Credential;
use crate::sync::local::{diff_local_changes, LocalContactStore};
use crate::sync::remote::RemoteDirectory;
use crate::sync::types::{
    CarriedState, PassReport, RemoteChangeEntry, SyncError, SyncFailure, SyncOutcome, Window,
};

/// Runs single passes against a remote directory and a local store.
pub struct PassRunner<'a> {
    remote: &'a dyn RemoteDirectory,
    local: &'a dyn LocalContactStore,
    correlations: &'a CorrelationStore,
}

/// What happened to one contact within a pass.
enum Applied {
    Done(Option<SyncOutcome>),
    Deferred,
    Failed(String),
}

impl<'a> PassRunner<'a> {
    pub fn new(
        remote: &'a dyn RemoteDirectory,
        local: &'a dyn LocalContactStore,
        correlations: &'a CorrelationStore,
    ) -> Self {
        Self {
            remote,
            local,
            correlations,
        }
    }

    /// Run one pass over `window`, re-evaluating the entries `carried` over
    /// from the previous pass.
    ///
    /// Local changes are applied first, each paired with the correlated
    /// remote change if there is one; the remaining remote changes follow.
    /// A version conflict defers the contact and makes the pass not
    /// completable. Writes already made are kept when a fatal error aborts
    /// the pass.
    ///
    /// # Errors
    /// Returns the first fatal error: feed or diff failure, transport or
    /// authorization failure, local store or sync state failure.
    pub async fn run(
        &self,
        window: &Window,
        credential: &Credential,
        carried: CarriedState,
    ) -> Result<PassReport, SyncError> {
        info!(from = ?window.from, to = %window.to, carried_local = carried.local.len(),
              carried_remote = carried.remote.len(), "starting sync pass");

        let (feed, local_diff) = tokio::join!(
            self.remote.fetch_changes(window, credential),
            async { diff_local_changes(self.local, self.correlations, window) },
        );
        let feed = feed?;
        let local_diff = local_diff?;

        let mut local_set = carried.local;
        for entry in local_diff.changes {
            local_set.insert(entry.local_id.clone(), entry);
        }
        let mut remote_set = self.merge_remote(carried.remote, feed.entries)?;

        let resolver = Resolver {
            remote: self.remote,
            local: self.local,
            correlations: self.correlations,
            credential,
        };

        let mut report = PassReport {
            completable: true,
            watermark: feed.watermark,
            ..PassReport::default()
        };
        report.failures.extend(local_diff.failures);
        report.failures.extend(feed.rejected);

        for (local_id, entry) in local_set {
            let paired = match self.correlations.lookup_remote_id(&local_id)? {
                Some(remote_id) => remote_set.remove(&remote_id),
                None => None,
            };
            let result = resolver.resolve(Some(&entry), paired.as_ref()).await;
            match classify(&local_id, result)? {
                Applied::Done(outcome) => report.outcomes.extend(outcome),
                Applied::Deferred => {
                    report.completable = false;
                    report.carried_local.insert(local_id, entry);
                    if let Some(paired) = paired {
                        report.carried_remote.insert(paired.remote_id.clone(), paired);
                    }
                }
                Applied::Failed(reason) => report.failures.push(SyncFailure {
                    contact_key: local_id,
                    reason,
                }),
            }
        }

        for (remote_id, entry) in remote_set {
            let result = resolver.resolve(None, Some(&entry)).await;
            match classify(&remote_id, result)? {
                Applied::Done(outcome) => report.outcomes.extend(outcome),
                Applied::Deferred => {
                    report.completable = false;
                    report.carried_remote.insert(remote_id, entry);
                }
                Applied::Failed(reason) => report.failures.push(SyncFailure {
                    contact_key: remote_id,
                    reason,
                }),
            }
        }

        info!(
            completable = report.completable,
            outcomes = report.outcomes.len(),
            deferred = report.carried_local.len() + report.carried_remote.len(),
            failures = report.failures.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    /// Carried entries overridden by fresh ones, minus entries whose version
    /// tag is already recorded.
    fn merge_remote(
        &self,
        carried: BTreeMap<String, RemoteChangeEntry>,
        fresh: Vec<RemoteChangeEntry>,
    ) -> Result<BTreeMap<String, RemoteChangeEntry>, SyncError> {
        let mut merged = carried;
        for entry in fresh {
            merged.insert(entry.remote_id.clone(), entry);
        }

        let mut pending = BTreeMap::new();
        for (remote_id, entry) in merged {
            let recorded = self.correlations.version_tag(&remote_id)?.is_some();
            if recorded
                && !self
                    .correlations
                    .has_version_changed(&remote_id, &entry.version_tag)?
            {
                debug!(remote_id = %remote_id, "remote entry already applied");
                continue;
            }
            pending.insert(remote_id, entry);
        }
        Ok(pending)
    }
}

fn classify(
    contact_key: &str,
    result: Result<Option<SyncOutcome>, SyncError>,
) -> Result<Applied, SyncError> {
    match result {
        Ok(outcome) => Ok(Applied::Done(outcome)),
        Err(e) if e.is_recoverable() => {
            warn!(contact = %contact_key, error = %e, "contact changed mid-pass, deferring");
            Ok(Applied::Deferred)
        }
        Err(SyncError::Malformed(reason)) => {
            warn!(contact = %contact_key, reason = %reason, "skipping malformed contact");
            Ok(Applied::Failed(reason))
        }
        Err(e) => Err(e),
    }
}
