//! Fleetdash HTTP client for the proxy server.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::session::Session;
use anyhow::{anyhow, bail, Context, Result};
use fleetdash_client_server_lib::auth::REFRESH_TOKEN_COOKIE;
use fleetdash_client_server_lib::telemetry::{records_from_json, TelemetryRecord};
use fleetdash_server_backbone::routes::{
    ROUTE_COMMAND, ROUTE_HISTORY, ROUTE_LATEST, ROUTE_SERIES, ROUTE_STATUS,
};
use fleetdash_server_backbone::types::{CommandRequest, ErrorBody, HistoryQuery, ServerStatus};
use reqwest::header::{HeaderValue, COOKIE};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct DashboardClient {
    base: Url,
    cookie_name: String,
    client: Client,
}

impl DashboardClient {
    pub fn new(server_addr: &str) -> Result<Self> {
        let base = Url::parse(server_addr)
            .with_context(|| format!("Invalid server address: {}", server_addr))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            bail!("Invalid server URL scheme: {}", base.scheme());
        }

        let client = Client::builder()
            .user_agent(concat!("fleetdash/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("building dashboard HTTP client")?;

        Ok(Self {
            base,
            cookie_name: REFRESH_TOKEN_COOKIE.to_string(),
            client,
        })
    }

    /// Use a non-default refresh cookie name (must match the server's).
    pub fn with_cookie_name(mut self, name: &str) -> Self {
        self.cookie_name = name.to_string();
        self
    }

    fn url(&self, route: &str) -> Result<Url> {
        self.base
            .join(route)
            .with_context(|| format!("Failed to build URL for {}", route))
    }

    fn authorized(&self, builder: RequestBuilder, session: &Session) -> Result<RequestBuilder> {
        let cookie = format!("{}={}", self.cookie_name, session.refresh_token().as_str());
        let value = HeaderValue::from_str(&cookie).context("Refresh token is not a valid header")?;
        Ok(builder.header(COOKIE, value))
    }

    pub async fn history(
        &self,
        session: &Session,
        query: &HistoryQuery,
    ) -> Result<Vec<TelemetryRecord>> {
        let request = self.client.get(self.url(ROUTE_HISTORY)?).query(query);
        let body = send(self.authorized(request, session)?).await?;
        records_from_json(body).context("Failed to decode telemetry history")
    }

    /// Server-built series table (`{"keys": [...], "rows": [...]}`).
    pub async fn series(
        &self,
        session: &Session,
        query: &HistoryQuery,
        fields: &[&str],
    ) -> Result<Value> {
        send(self.series_request(session, query, fields)?).await
    }

    fn series_request(
        &self,
        session: &Session,
        query: &HistoryQuery,
        fields: &[&str],
    ) -> Result<RequestBuilder> {
        let request = self
            .client
            .get(self.url(ROUTE_SERIES)?)
            .query(query)
            .query(&[("fields", fields.join(","))]);
        self.authorized(request, session)
    }

    pub async fn latest_positions(&self, session: &Session) -> Result<Value> {
        let request = self.client.get(self.url(ROUTE_LATEST)?);
        send(self.authorized(request, session)?).await
    }

    pub async fn send_command(&self, session: &Session, command: &CommandRequest) -> Result<Value> {
        let request = self.client.post(self.url(ROUTE_COMMAND)?).json(command);
        send(self.authorized(request, session)?).await
    }

    pub async fn status(&self) -> Result<ServerStatus> {
        let response = self
            .client
            .get(self.url(ROUTE_STATUS)?)
            .send()
            .await
            .context("Failed to reach server")?;
        let body = decode(response).await?;
        serde_json::from_value(body).context("Failed to decode server status")
    }
}

async fn send(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await.context("Failed to reach server")?;
    decode(response).await
}

async fn decode(response: Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await.context("Failed to read response body")?;

    if !status.is_success() {
        return Err(error_from_body(status.as_u16(), &text));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn error_from_body(status: u16, text: &str) -> anyhow::Error {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => anyhow!("{} (status {})", body.error, status),
        Err(_) if text.trim().is_empty() => anyhow!("Request failed with status {}", status),
        Err(_) => anyhow!("Request failed with status {}: {}", status, text.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetdash_client_server_lib::auth::RefreshToken;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(DashboardClient::new("ftp://example.com").is_err());
        assert!(DashboardClient::new("not a url").is_err());
        assert!(DashboardClient::new("https://fleet.example.com/").is_ok());
    }

    #[test]
    fn routes_join_onto_base() {
        let client = DashboardClient::new("http://127.0.0.1:8000/").unwrap();
        assert_eq!(
            client.url(ROUTE_HISTORY).unwrap().as_str(),
            "http://127.0.0.1:8000/api/telemetry/history"
        );
    }

    #[test]
    fn series_request_carries_fields_and_cookie() {
        let client = DashboardClient::new("http://127.0.0.1:8000/")
            .unwrap()
            .with_cookie_name("fleet_rt");
        let session = Session::new(RefreshToken::new("rt-1").unwrap());
        let query = HistoryQuery {
            device_id: Some("A".into()),
            ..HistoryQuery::default()
        };

        let request = client
            .series_request(&session, &query, &["voltage", "accel_x"])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().path(), ROUTE_SERIES);
        assert_eq!(request.url().query(), Some("deviceId=A&fields=voltage%2Caccel_x"));
        assert_eq!(request.headers()[COOKIE], "fleet_rt=rt-1");
    }

    #[test]
    fn error_messages_come_from_the_body() {
        let err = error_from_body(401, r#"{"error":"Missing refresh token"}"#);
        assert_eq!(err.to_string(), "Missing refresh token (status 401)");

        let err = error_from_body(502, "bad gateway");
        assert_eq!(err.to_string(), "Request failed with status 502: bad gateway");

        let err = error_from_body(500, "");
        assert_eq!(err.to_string(), "Request failed with status 500");
    }
}
