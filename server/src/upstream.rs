//! Fleetdash request forwarding to the cloud backend.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use fleetdash_client_server_lib::auth::AccessToken;
use fleetdash_server_backbone::HttpMethod;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct UpstreamRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub bearer: &'a AccessToken,
    /// Raw query string, appended verbatim.
    pub query: Option<&'a str>,
    pub body: Option<&'a Value>,
}

/// Status and body relayed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

impl UpstreamResponse {
    /// JSON when the body parses, otherwise the raw text as a JSON string.
    pub fn from_text(status: u16, text: String) -> Self {
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[rocket::async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: UpstreamRequest<'_>) -> Result<UpstreamResponse, UpstreamError>;
}

pub type SharedUpstream = Arc<dyn Upstream>;

pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(UPSTREAM_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

pub fn target_url(base: &str, query: Option<&str>) -> Result<Url, UpstreamError> {
    let mut url = Url::parse(base).map_err(|e| UpstreamError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    if let Some(extra) = query.filter(|q| !q.is_empty()) {
        let merged = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
            _ => extra.to_string(),
        };
        url.set_query(Some(&merged));
    }

    Ok(url)
}

#[rocket::async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: UpstreamRequest<'_>) -> Result<UpstreamResponse, UpstreamError> {
        let url = target_url(request.url, request.query)?;

        let builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        let mut builder = builder.bearer_auth(request.bearer.as_str());
        if let Some(body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        Ok(UpstreamResponse::from_text(status, text))
    }
}
