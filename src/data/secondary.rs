//! Secondary API client
//!
//! A slow-moving, rate-limited external API consulted when the persistent
//! store and the refresh pipeline have nothing to offer. Responses are kept
//! as opaque JSON payloads; only emptiness is inspected.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use super::{DataKind, Record};

/// Default per-request timeout for the HTTP client
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when calling the secondary API
#[derive(Debug, Error)]
pub enum SecondaryError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API returned status {0}")]
    Status(StatusCode),

    /// The API reported an error in its response body
    #[error("API error: {0}")]
    Api(String),
}

/// External data API used as the secondary provider
#[async_trait]
pub trait SecondaryApi: Send + Sync {
    /// Fetches a record; `Ok(None)` means the API has no data for the key
    async fn fetch_external(
        &self,
        symbol: &str,
        kind: DataKind,
        params: &BTreeMap<String, String>,
    ) -> Result<Option<Record>, SecondaryError>;
}

/// Client for a JSON-over-HTTP financial data API
///
/// Requests go to `{base_url}/{kind}?symbol=...` with the request parameters
/// and, when configured, a `token` query parameter.
#[derive(Debug, Clone)]
pub struct HttpSecondaryClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Base URL for the API
    base_url: String,
    /// Optional API token
    api_key: Option<String>,
}

impl HttpSecondaryClient {
    /// Creates a client for the given base URL
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, SecondaryError> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Creates a client with a custom HTTP client
    pub fn with_client(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http_client: client,
            base_url: base_url.into(),
            api_key,
        }
    }

    fn endpoint(&self, kind: DataKind) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), kind)
    }
}

#[async_trait]
impl SecondaryApi for HttpSecondaryClient {
    async fn fetch_external(
        &self,
        symbol: &str,
        kind: DataKind,
        params: &BTreeMap<String, String>,
    ) -> Result<Option<Record>, SecondaryError> {
        let mut query: Vec<(&str, &str)> = vec![("symbol", symbol)];
        query.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(ref token) = self.api_key {
            query.push(("token", token.as_str()));
        }

        let response = self
            .http_client
            .get(self.endpoint(kind))
            .query(&query)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => return Err(SecondaryError::Status(status)),
            _ => {}
        }

        let body: serde_json::Value = response.json().await?;
        interpret_body(symbol, kind, body)
    }
}

/// Maps a response body onto "record", "no data" or "error"
fn interpret_body(
    symbol: &str,
    kind: DataKind,
    body: serde_json::Value,
) -> Result<Option<Record>, SecondaryError> {
    use serde_json::Value;

    match &body {
        Value::Null => return Ok(None),
        Value::Array(items) if items.is_empty() => return Ok(None),
        Value::Object(map) => {
            if let Some(Value::String(message)) = map.get("error") {
                return Err(SecondaryError::Api(message.clone()));
            }
            if map.is_empty() {
                return Ok(None);
            }
            if let Some(Value::Array(data)) = map.get("data") {
                if data.is_empty() {
                    return Ok(None);
                }
            }
        }
        _ => {}
    }

    Ok(Some(Record::new(symbol, kind, body)))
}
