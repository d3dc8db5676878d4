//! Lightweight OAuth2 Authorization Code flow for desktop apps.
//!
//! 1. Opens browser to authorization URL
//! 2. Starts a tiny localhost HTTP server to receive the callback
//! 3. Exchanges the code for an access token (+ refresh token)
//! 4. Stores tokens in OS keyring

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::keyring_store;
use crate::error::OAuthError;
use crate::storage::OAuthSettings;

/// Keyring entry holding the serialized [`OAuthTokens`].
pub const TOKENS_KEY: &str = "directory_tokens";
/// Keyring entry holding the OAuth client secret.
pub const CLIENT_SECRET_KEY: &str = "directory_client_secret";

const CALLBACK_TIMEOUT_SECS: u64 = 300;
const EXPIRY_BUFFER_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthTokens {
    /// A pre-issued token with no expiry and no refresh token.
    pub fn static_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_port: u16,
}

impl OAuthConfig {
    pub fn from_settings(settings: &OAuthSettings, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: settings.client_id.clone(),
            client_secret: client_secret.into(),
            auth_url: settings.auth_url.clone(),
            token_url: settings.token_url.clone(),
            scopes: settings.scopes.clone(),
            redirect_port: settings.redirect_port,
        }
    }

    /// Build from settings plus the client secret stored in the keyring.
    ///
    /// # Errors
    /// `CredentialsNotConfigured` when no client id is set.
    pub fn load(settings: &OAuthSettings) -> Result<Self, OAuthError> {
        if settings.client_id.trim().is_empty() {
            return Err(OAuthError::CredentialsNotConfigured {
                service: "directory".to_string(),
            });
        }
        let secret = keyring_store::get(CLIENT_SECRET_KEY)?.unwrap_or_default();
        Ok(Self::from_settings(settings, secret))
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.redirect_port)
    }

    pub fn auth_url_full(&self) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri()),
            urlencoding::encode(&scopes),
        )
    }
}

/// Run the full OAuth2 flow: open browser -> listen for callback -> exchange code.
///
/// # Errors
/// Fails if the browser cannot be opened, no callback arrives within five
/// minutes, the callback carries no code, or the token exchange fails.
pub async fn authorize(config: &OAuthConfig) -> Result<OAuthTokens, OAuthError> {
    let listener = TcpListener::bind(("127.0.0.1", config.redirect_port))
        .await
        .map_err(|e| OAuthError::AuthorizationFailed(e.to_string()))?;

    let auth_url = config.auth_url_full();
    open::that(&auth_url).map_err(|e| OAuthError::AuthorizationFailed(e.to_string()))?;
    info!(port = config.redirect_port, "waiting for OAuth callback");

    let accepted = tokio::time::timeout(
        Duration::from_secs(CALLBACK_TIMEOUT_SECS),
        listener.accept(),
    )
    .await
    .map_err(|_| OAuthError::CallbackTimeout(CALLBACK_TIMEOUT_SECS))?;
    let (mut stream, _) = accepted.map_err(|e| OAuthError::InvalidCallback(e.to_string()))?;

    let mut buf = [0u8; 4096];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| OAuthError::InvalidCallback(e.to_string()))?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let code = extract_code(&request)
        .ok_or_else(|| OAuthError::InvalidCallback("no code in callback".to_string()))?;

    let response = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html><body><h2>Authentication successful!</h2><p>You can close this tab.</p><script>window.close()</script></body></html>";
    // The browser tab is cosmetic; a failed write does not invalidate the code.
    let _ = stream.write_all(response.as_bytes()).await;
    drop(stream);
    drop(listener);

    let tokens = exchange_code(config, &code).await?;
    store_tokens(&tokens)?;
    Ok(tokens)
}

/// Exchange authorization code for tokens.
///
/// # Errors
/// `TokenExchangeFailed` on transport failure or an `error` response.
pub async fn exchange_code(config: &OAuthConfig, code: &str) -> Result<OAuthTokens, OAuthError> {
    let redirect_uri = config.redirect_uri();
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri.as_str()),
    ];

    let body = post_form(&config.token_url, &params)
        .await
        .map_err(OAuthError::TokenExchangeFailed)?;
    parse_token_response(&body, None, Utc::now().timestamp())
        .map_err(OAuthError::TokenExchangeFailed)
}

/// Refresh an access token using a refresh token.
///
/// # Errors
/// `TokenRefreshFailed` on transport failure or an `error` response.
pub async fn refresh_token(config: &OAuthConfig, refresh: &str) -> Result<OAuthTokens, OAuthError> {
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("refresh_token", refresh),
        ("grant_type", "refresh_token"),
    ];

    debug!("refreshing access token");
    let body = post_form(&config.token_url, &params)
        .await
        .map_err(OAuthError::TokenRefreshFailed)?;
    parse_token_response(&body, Some(refresh), Utc::now().timestamp())
        .map_err(OAuthError::TokenRefreshFailed)
}

async fn post_form(url: &str, params: &[(&str, &str)]) -> Result<serde_json::Value, String> {
    let resp = Client::new()
        .post(url)
        .form(params)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    resp.json().await.map_err(|e| e.to_string())
}

/// Decode a token endpoint response. A refresh response without a new
/// refresh token keeps `previous_refresh`.
fn parse_token_response(
    body: &serde_json::Value,
    previous_refresh: Option<&str>,
    now: i64,
) -> Result<OAuthTokens, String> {
    if let Some(error) = body.get("error") {
        return Err(format!("OAuth error: {error}"));
    }

    let access_token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .ok_or("response without access_token")?;
    let expires_at = body
        .get("expires_in")
        .and_then(|v| v.as_i64())
        .map(|ei| now + ei);

    Ok(OAuthTokens {
        access_token: access_token.to_string(),
        refresh_token: body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| previous_refresh.map(String::from)),
        expires_at,
        token_type: body
            .get("token_type")
            .and_then(|v| v.as_str())
            .unwrap_or("Bearer")
            .to_string(),
        scope: body.get("scope").and_then(|v| v.as_str()).map(String::from),
    })
}

/// Persist tokens to the keyring.
pub fn store_tokens(tokens: &OAuthTokens) -> Result<(), OAuthError> {
    let json = serde_json::to_string(tokens)
        .map_err(|e| OAuthError::Keyring(format!("encode tokens: {e}")))?;
    keyring_store::set(TOKENS_KEY, &json)
}

/// Load stored tokens from keyring. Unreadable entries count as absent.
pub fn load_tokens() -> Result<Option<OAuthTokens>, OAuthError> {
    Ok(keyring_store::get(TOKENS_KEY)?.and_then(|json| serde_json::from_str(&json).ok()))
}

/// Check if stored tokens are expired (with 60s buffer).
pub fn is_expired(tokens: &OAuthTokens) -> bool {
    is_expired_at(tokens, Utc::now().timestamp())
}

fn is_expired_at(tokens: &OAuthTokens, now: i64) -> bool {
    match tokens.expires_at {
        Some(exp) => now > exp - EXPIRY_BUFFER_SECS,
        None => false,
    }
}

fn extract_code(request: &str) -> Option<String> {
    let first_line = request.lines().next()?;
    let path = first_line.split_whitespace().nth(1)?;
    let url = url::Url::parse(&format!("http://localhost{path}")).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
}
