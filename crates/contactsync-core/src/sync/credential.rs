//! Access credentials for the remote directory.

use async_trait::async_trait;
use std::fmt;

use crate::sync::types::SyncError;

/// Bearer token presented to the remote directory.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Source of credentials, consulted once per pass.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A currently valid credential.
    ///
    /// # Errors
    /// Returns `Unauthorized` when no usable credential exists.
    async fn credential(&self) -> Result<Credential, SyncError>;
}

/// Provider returning a fixed token.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credential);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Credential::bearer(token))
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Result<Credential, SyncError> {
        Ok(self.0.clone())
    }
}
