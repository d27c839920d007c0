//! HTTP remote store client.
//!
//! Talks to the Tally sync API:
//! - `GET  {base}/v1/collections/{key}` returns `{"records": [...]}`
//! - `POST {base}/v1/collections/{key}/records` upserts `{"records": [...]}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{RemoteResult, RemoteStore};
use crate::error::{Error, RemoteError, Result};
use crate::models::{CollectionKey, CollectionSnapshot, Record};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote store backed by the Tally sync API
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    records: &'a [Record],
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpRemoteStore {
    /// Build a client for an API base URL and optional bearer token
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|error| {
                Error::InvalidInput(format!("Failed to construct HTTP client: {error}"))
            })?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: CollectionKey) -> String {
        format!("{}/v1/collections/{}", self.base_url, collection.as_str())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_collection(&self, collection: CollectionKey) -> RemoteResult<CollectionSnapshot> {
        let response = self
            .authorized(self.client.get(self.collection_url(collection)))
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected(parse_api_error(status, &body)));
        }

        let payload = response
            .json::<CollectionResponse>()
            .await
            .map_err(map_transport_error)?;
        let (snapshot, rejected) = CollectionSnapshot::from_records(collection, payload.records);
        if !rejected.is_empty() {
            tracing::warn!(
                "Excluded {} malformed remote record(s) from {}",
                rejected.len(),
                collection
            );
        }
        Ok(snapshot)
    }

    async fn push_records(&self, collection: CollectionKey, records: &[Record]) -> RemoteResult<()> {
        let url = format!("{}/records", self.collection_url(collection));
        let response = self
            .authorized(self.client.post(url))
            .json(&PushRequest { records })
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected(parse_api_error(status, &body)));
        }
        Ok(())
    }
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        RemoteError::Connectivity(error.to_string())
    } else if error.is_decode() {
        RemoteError::Rejected(format!("invalid response body: {error}"))
    } else {
        RemoteError::Rejected(error.to_string())
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("remote URL must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint(" https://sync.example.com/ ".to_string()).unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn collection_urls_use_wire_keys() {
        let store = HttpRemoteStore::new("https://sync.example.com/", None).unwrap();
        assert_eq!(
            store.collection_url(CollectionKey::Investments),
            "https://sync.example.com/v1/collections/investments"
        );
    }

    #[test]
    fn parse_api_error_prefers_message_fields() {
        assert_eq!(
            parse_api_error(StatusCode::CONFLICT, r#"{"message":" version mismatch "}"#),
            "version mismatch (409)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::FORBIDDEN, "denied"),
            "denied (403)"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let store =
            HttpRemoteStore::new("https://sync.example.com", Some("secret".to_string())).unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn blank_token_is_dropped() {
        let store = HttpRemoteStore::new("http://localhost:8080", Some("  ".to_string())).unwrap();
        assert!(store.token.is_none());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connectivity_error() {
        let store = HttpRemoteStore::new("http://127.0.0.1:9", None).unwrap();
        let error = store
            .fetch_collection(CollectionKey::Accounts)
            .await
            .unwrap_err();
        assert!(error.is_connectivity(), "unexpected error: {error}");
    }
}
