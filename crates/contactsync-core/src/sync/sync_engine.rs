//! Sync engine driving passes until the two repositories converge.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, info, warn};

use crate::sync::correlation::CorrelationStore;
use crate::sync::credential::CredentialProvider;
use crate::sync::local::LocalContactStore;
use crate::sync::pass::PassRunner;
use crate::sync::remote::RemoteDirectory;
use crate::sync::types::{
    CarriedState, SyncError, SyncFailure, SyncOutcome, SyncReport, SyncStatus, Window,
};

/// Orchestrator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Running(Window),
    Retrying(Window),
    Converged,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Running(_) => write!(f, "running"),
            SyncState::Retrying(_) => write!(f, "retrying"),
            SyncState::Converged => write!(f, "converged"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

/// Sync engine managing bidirectional sync.
///
/// One call to [`SyncEngine::run`] is one attempt: it re-runs passes over
/// successive windows until a pass completes without a version conflict,
/// then persists the final window's upper bound as the last sync time.
/// There is no pass limit; every transition is logged.
pub struct SyncEngine<'a> {
    remote: &'a dyn RemoteDirectory,
    local: &'a dyn LocalContactStore,
    correlations: &'a CorrelationStore,
    credentials: &'a dyn CredentialProvider,
    clock: Box<dyn Fn() -> DateTime<Utc> + 'a>,
    state: SyncState,
}

impl<'a> SyncEngine<'a> {
    /// Create new sync engine.
    pub fn new(
        remote: &'a dyn RemoteDirectory,
        local: &'a dyn LocalContactStore,
        correlations: &'a CorrelationStore,
        credentials: &'a dyn CredentialProvider,
    ) -> Self {
        Self {
            remote,
            local,
            correlations,
            credentials,
            clock: Box::new(Utc::now),
            state: SyncState::Idle,
        }
    }

    /// Replace the clock used to close each window.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Get current sync status.
    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        Ok(self.correlations.status()?)
    }

    fn transition(&mut self, next: SyncState) {
        match &next {
            SyncState::Running(w) | SyncState::Retrying(w) => {
                info!(from = %self.state, to = %next, window_from = ?w.from, window_to = %w.to,
                      "sync state transition");
            }
            _ => info!(from = %self.state, to = %next, "sync state transition"),
        }
        self.state = next;
    }

    fn fail(&mut self, err: SyncError) -> SyncError {
        error!(error = %err, "sync attempt failed");
        self.transition(SyncState::Failed);
        err
    }

    /// Run one sync attempt to convergence.
    ///
    /// # Errors
    /// Returns the fatal error that aborted a pass. The last sync time is
    /// left untouched in that case, so the next attempt covers the same
    /// changes again.
    pub async fn run(&mut self) -> Result<SyncReport, SyncError> {
        let (remote, local, correlations, credentials) =
            (self.remote, self.local, self.correlations, self.credentials);

        let from = match correlations.last_sync_at() {
            Ok(from) => from,
            Err(e) => return Err(self.fail(e.into())),
        };
        let mut window = Window::new(from, (self.clock)());
        let mut carried = CarriedState::default();
        let mut outcomes: BTreeMap<String, SyncOutcome> = BTreeMap::new();
        let mut failures: BTreeMap<String, SyncFailure> = BTreeMap::new();
        let mut passes = 0u32;
        let mut watermark = None;

        self.transition(SyncState::Running(window));

        loop {
            passes += 1;

            let credential = match credentials.credential().await {
                Ok(credential) => credential,
                Err(e) => return Err(self.fail(e)),
            };

            let runner = PassRunner::new(remote, local, correlations);
            let mut report = match runner.run(&window, &credential, carried).await {
                Ok(report) => report,
                Err(e) => return Err(self.fail(e)),
            };

            for outcome in report.outcomes.drain(..) {
                failures.remove(&outcome.contact_key);
                outcomes.insert(outcome.contact_key.clone(), outcome);
            }
            for failure in report.failures.drain(..) {
                failures.insert(failure.contact_key.clone(), failure);
            }
            watermark = report.watermark.or(watermark);

            if report.completable {
                if let Err(e) = correlations.set_last_sync_at(window.to) {
                    return Err(self.fail(e.into()));
                }
                self.transition(SyncState::Converged);
                return Ok(SyncReport {
                    outcomes: outcomes.into_values().collect(),
                    failures: failures.into_values().collect(),
                    passes,
                    window,
                    watermark,
                });
            }

            carried = report.take_carried();
            warn!(
                pass = passes,
                deferred = carried.local.len() + carried.remote.len(),
                "pass not completable, retrying"
            );
            window = window.advance((self.clock)());
            self.transition(SyncState::Retrying(window));
            self.transition(SyncState::Running(window));
        }
    }
}
