//! Two-way contact synchronization.
//!
//! Keeps a remote directory (poll-based change feed, version-tag concurrency
//! control) and a local contact store (list-everything only) converged.
//! The [`SyncEngine`] re-runs [`PassRunner`] passes over successive time
//! windows until one completes without a concurrent remote modification.

pub mod conflict_resolver;
pub mod correlation;
pub mod credential;
pub mod http_directory;
pub mod local;
pub mod memory_directory;
pub mod pass;
pub mod remote;
pub mod sync_engine;
pub mod types;

#[cfg(test)]
mod sync_engine_tests;
#[cfg(test)]
mod types_tests;

pub use conflict_resolver::{decide, Resolution, Resolver};
pub use correlation::CorrelationStore;
pub use credential::{Credential, CredentialProvider, StaticCredentials};
pub use http_directory::HttpDirectory;
pub use local::{diff_local_changes, LocalContactStore, LocalDiff, LocalRecord, LocalScan};
pub use memory_directory::{Fault, MemoryDirectory};
pub use pass::PassRunner;
pub use remote::{RemoteDirectory, RemoteFeed, RemoteWriteReceipt};
pub use sync_engine::{SyncEngine, SyncState};
pub use types::{
    Action, CarriedState, ContactRef, Correlation, LocalChangeEntry, Origin, PassReport,
    RemoteChangeEntry, SyncError, SyncFailure, SyncOutcome, SyncReport, SyncStatus, SyncSummary,
    Window,
};
