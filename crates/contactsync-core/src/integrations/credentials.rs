//! Directory credentials backed by the OS keyring.

use async_trait::async_trait;
use tracing::info;

use super::keyring_store;
use super::oauth::{self, OAuthConfig, OAuthTokens, CLIENT_SECRET_KEY, TOKENS_KEY};
use crate::error::OAuthError;
use crate::storage::OAuthSettings;
use crate::sync::credential::{Credential, CredentialProvider};
use crate::sync::types::SyncError;

/// Hands out the stored access token, refreshing it when expired.
pub struct KeyringCredentials {
    settings: OAuthSettings,
}

impl KeyringCredentials {
    pub fn new(settings: OAuthSettings) -> Self {
        Self { settings }
    }

    /// Store a pre-issued access token. It never expires and cannot be refreshed.
    pub fn set_token(token: &str) -> Result<(), OAuthError> {
        oauth::store_tokens(&OAuthTokens::static_token(token))
    }

    /// Persist the OAuth client secret used for code exchange and refresh.
    pub fn set_client_secret(secret: &str) -> Result<(), OAuthError> {
        keyring_store::set(CLIENT_SECRET_KEY, secret)
    }

    /// Forget stored tokens. The client secret is kept.
    pub fn logout() -> Result<(), OAuthError> {
        keyring_store::delete(TOKENS_KEY)
    }

    /// Stored tokens, if any.
    pub fn tokens() -> Result<Option<OAuthTokens>, OAuthError> {
        oauth::load_tokens()
    }

    /// Run the browser authorization flow and store the resulting tokens.
    pub async fn login(&self) -> Result<OAuthTokens, OAuthError> {
        let config = OAuthConfig::load(&self.settings)?;
        oauth::authorize(&config).await
    }

    async fn refreshed(&self, refresh: &str) -> Result<OAuthTokens, OAuthError> {
        let config = OAuthConfig::load(&self.settings)?;
        let tokens = oauth::refresh_token(&config, refresh).await?;
        oauth::store_tokens(&tokens)?;
        info!("access token refreshed");
        Ok(tokens)
    }
}

fn unauthorized(err: OAuthError) -> SyncError {
    SyncError::Unauthorized(err.to_string())
}

#[async_trait]
impl CredentialProvider for KeyringCredentials {
    async fn credential(&self) -> Result<Credential, SyncError> {
        let tokens = oauth::load_tokens()
            .map_err(unauthorized)?
            .ok_or_else(|| {
                unauthorized(OAuthError::NotAuthenticated {
                    service: "directory".to_string(),
                })
            })?;

        if !oauth::is_expired(&tokens) {
            return Ok(Credential::bearer(tokens.access_token));
        }

        let refresh = tokens
            .refresh_token
            .as_deref()
            .ok_or_else(|| unauthorized(OAuthError::TokenExpired))?;
        let refreshed = self.refreshed(refresh).await.map_err(unauthorized)?;
        Ok(Credential::bearer(refreshed.access_token))
    }
}
