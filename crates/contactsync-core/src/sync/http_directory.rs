//! JSON REST directory client.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET  /contacts?max-results=N[&updated-min=..&showdeleted=true][&updated-max=..]`
//! - `POST /contacts`
//! - `PUT  /contacts/{id}` with `If-Match`
//! - `DELETE /contacts/{id}` with `If-Match`
//!
//! Every request carries a bearer token and `GData-Version: 3.0`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::contact::ContactRecord;
use crate::error::CoreError;
use crate::storage::Config;
use crate::sync::credential::Credential;
use crate::sync::remote::{RemoteDirectory, RemoteFeed, RemoteWriteReceipt};
use crate::sync::types::{RemoteChangeEntry, SyncError, SyncFailure, Window};

const GDATA_VERSION: &str = "3.0";

#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    contact: Option<ContactRecord>,
}

impl WireEntry {
    fn into_change(self) -> Result<RemoteChangeEntry, SyncError> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::Malformed("entry without id".into()))?;
        let etag = self
            .etag
            .ok_or_else(|| SyncError::Malformed(format!("entry {id} without etag")))?;
        let updated = self
            .updated
            .ok_or_else(|| SyncError::Malformed(format!("entry {id} without updated")))?;
        Ok(RemoteChangeEntry {
            remote_id: id,
            version_tag: etag,
            updated_at: updated,
            deleted: self.deleted,
            record: if self.deleted { None } else { self.contact },
        })
    }

    /// Decode one raw feed entry. A failure is keyed by the entry's id, or
    /// by its position when the id is missing.
    fn decode(index: usize, raw: serde_json::Value) -> Result<RemoteChangeEntry, SyncFailure> {
        let contact_key = raw
            .get("id")
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.is_empty())
            .map_or_else(|| format!("entry #{index}"), str::to_string);
        let decoded = serde_json::from_value::<WireEntry>(raw)
            .map_err(|e| SyncError::Malformed(format!("entry {contact_key}: {e}")))
            .and_then(WireEntry::into_change);
        decoded.map_err(|e| {
            let reason = match e {
                SyncError::Malformed(reason) => reason,
                other => other.to_string(),
            };
            SyncFailure {
                contact_key,
                reason,
            }
        })
    }

    fn into_receipt(self) -> Result<RemoteWriteReceipt, SyncError> {
        let change = self.into_change()?;
        Ok(RemoteWriteReceipt {
            remote_id: change.remote_id,
            version_tag: change.version_tag,
            updated_at: change.updated_at,
        })
    }
}

/// Remote directory reached over HTTP.
pub struct HttpDirectory {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl HttpDirectory {
    /// # Errors
    /// Returns `Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        page_size: u32,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size,
        })
    }

    /// Build from the `[remote]` config section.
    ///
    /// # Errors
    /// Returns an error if `remote.base_url` is unset or the client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, CoreError> {
        Ok(Self::new(
            config.require_base_url()?,
            Duration::from_secs(config.remote.request_timeout_secs),
            config.remote.page_size,
        )?)
    }

    /// Feed URL for `window`. Tombstones are requested only for bounded windows.
    pub fn feed_url(&self, window: &Window) -> String {
        let mut params = vec![("max-results", self.page_size.to_string())];
        if let Some(from) = window.from {
            params.push(("updated-min", timestamp(from)));
            params.push(("showdeleted", "true".to_string()));
        }
        params.push(("updated-max", timestamp(window.to)));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}/contacts?{}", self.base_url, query)
    }

    fn contact_url(&self, remote_id: &str) -> String {
        format!(
            "{}/contacts/{}",
            self.base_url,
            urlencoding::encode(remote_id)
        )
    }

    fn authorized(&self, request: RequestBuilder, credential: &Credential) -> RequestBuilder {
        request
            .bearer_auth(credential.token())
            .header("GData-Version", GDATA_VERSION)
    }

    async fn send(request: RequestBuilder) -> Result<Response, SyncError> {
        request.send().await.map_err(transport)
    }

    async fn read_entry(response: Response) -> Result<WireEntry, SyncError> {
        let body = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|e| SyncError::Malformed(e.to_string()))
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn transport(err: reqwest::Error) -> SyncError {
    SyncError::Transport(err.to_string())
}

/// Map a non-success status to the sync error taxonomy.
fn status_error(status: StatusCode, what: &str, remote_id: Option<&str>) -> SyncError {
    match status {
        StatusCode::PRECONDITION_FAILED => SyncError::conflict(remote_id.unwrap_or(what)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Unauthorized(format!("{what}: {status}"))
        }
        _ => SyncError::Transport(format!("{what}: {status}")),
    }
}

#[async_trait]
impl RemoteDirectory for HttpDirectory {
    async fn fetch_changes(
        &self,
        window: &Window,
        credential: &Credential,
    ) -> Result<RemoteFeed, SyncError> {
        let url = self.feed_url(window);
        debug!(url = %url, "fetching remote changes");
        let response = Self::send(self.authorized(self.client.get(&url), credential)).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "fetch contacts", None));
        }

        let body = response.bytes().await.map_err(transport)?;
        let feed: FeedDocument =
            serde_json::from_slice(&body).map_err(|e| SyncError::Malformed(e.to_string()))?;
        let mut entries = Vec::new();
        let mut rejected = Vec::new();
        for (index, raw) in feed.entries.into_iter().enumerate() {
            match WireEntry::decode(index, raw) {
                Ok(entry) => entries.push(entry),
                Err(failure) => {
                    warn!(entry = %failure.contact_key, reason = %failure.reason,
                          "skipping malformed feed entry");
                    rejected.push(failure);
                }
            }
        }
        debug!(count = entries.len(), rejected = rejected.len(), "remote changes fetched");

        Ok(RemoteFeed {
            entries,
            rejected,
            watermark: feed.updated,
        })
    }

    async fn create(
        &self,
        record: &ContactRecord,
        credential: &Credential,
    ) -> Result<RemoteWriteReceipt, SyncError> {
        let url = format!("{}/contacts", self.base_url);
        let request = self.authorized(self.client.post(&url), credential).json(record);
        let response = Self::send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "create contact", None));
        }
        Self::read_entry(response).await?.into_receipt()
    }

    async fn update(
        &self,
        remote_id: &str,
        record: &ContactRecord,
        expected_tag: Option<&str>,
        credential: &Credential,
    ) -> Result<RemoteWriteReceipt, SyncError> {
        let mut request = self
            .authorized(self.client.put(self.contact_url(remote_id)), credential)
            .json(record);
        if let Some(tag) = expected_tag {
            request = request.header("If-Match", tag);
        }
        let response = Self::send(request).await?;
        match response.status() {
            status if status.is_success() => Self::read_entry(response).await?.into_receipt(),
            // Deleted since it was read; the next feed carries the tombstone.
            StatusCode::NOT_FOUND => Err(SyncError::conflict(remote_id)),
            status => Err(status_error(status, "update contact", Some(remote_id))),
        }
    }

    async fn delete(
        &self,
        remote_id: &str,
        expected_tag: Option<&str>,
        credential: &Credential,
    ) -> Result<(), SyncError> {
        let mut request =
            self.authorized(self.client.delete(self.contact_url(remote_id)), credential);
        if let Some(tag) = expected_tag {
            request = request.header("If-Match", tag);
        }
        let response = Self::send(request).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(status_error(status, "delete contact", Some(remote_id))),
        }
    }
}
