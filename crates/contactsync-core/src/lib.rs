//! # contactsync Core Library
//!
//! Two-way synchronization between a remote contact directory and a local
//! contact store. All operations are available through the standalone
//! `contactsync` CLI, which is a thin layer over this library.
//!
//! ## Architecture
//!
//! - **Sync**: correlation store, remote change feed, local change diff,
//!   conflict resolution, pass runner and the orchestrating engine
//! - **Storage**: SQLite-backed sync state and local contact store,
//!   TOML-based configuration
//! - **Integrations**: OAuth2 flow and keyring-backed directory credentials
//!
//! ## Key Components
//!
//! - [`SyncEngine`]: runs passes until the two stores converge
//! - [`CorrelationStore`]: local/remote identity links and version tags
//! - [`HttpDirectory`]: the remote directory over HTTP
//! - [`SqliteContactStore`]: the reference local contact store
//! - [`Config`]: Application configuration management

pub mod contact;
pub mod error;
pub mod integrations;
pub mod storage;
pub mod sync;

pub use contact::{ContactField, ContactRecord, ImHandle, PostalAddress};
pub use error::{ConfigError, CoreError, DatabaseError, OAuthError, ValidationError};
pub use integrations::KeyringCredentials;
pub use storage::{Config, Database, SqliteContactStore};
pub use sync::{
    CorrelationStore, Credential, CredentialProvider, HttpDirectory, LocalContactStore,
    MemoryDirectory, RemoteDirectory, SyncEngine, SyncError, SyncOutcome, SyncReport, SyncState,
};
