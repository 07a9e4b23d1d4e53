//! Fleetdash OAuth refresh-token exchange.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use fleetdash_client_server_lib::auth::{AccessToken, RefreshToken};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token endpoint is not configured")]
    NotConfigured,
    #[error("token endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint rejected the refresh token ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("token endpoint response has no usable access_token")]
    MalformedResponse,
}

/// Turns a refresh token into a short-lived access token.
#[rocket::async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, refresh_token: &RefreshToken) -> Result<AccessToken, AuthError>;
}

pub type SharedTokenExchange = Arc<dyn TokenExchange>;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// `grant_type=refresh_token` against the identity provider's token endpoint.
pub struct OidcTokenExchange {
    client: Client,
    token_endpoint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl OidcTokenExchange {
    pub fn new(
        token_endpoint: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(EXCHANGE_TIMEOUT).build()?;
        Ok(Self {
            client,
            token_endpoint,
            client_id,
            client_secret,
        })
    }
}

#[rocket::async_trait]
impl TokenExchange for OidcTokenExchange {
    async fn exchange(&self, refresh_token: &RefreshToken) -> Result<AccessToken, AuthError> {
        let endpoint = self.token_endpoint.as_deref().ok_or(AuthError::NotConfigured)?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        if let Some(client_id) = self.client_id.as_deref() {
            form.push(("client_id", client_id));
        }
        if let Some(client_secret) = self.client_secret.as_deref() {
            form.push(("client_secret", client_secret));
        }

        let response = self.client.post(endpoint).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|_| AuthError::MalformedResponse)?;

        debug!(
            "[OAUTH] Exchanged refresh token (type: {}, expires in: {:?}s)",
            token_response.token_type.as_deref().unwrap_or("unknown"),
            token_response.expires_in
        );

        token_response
            .access_token
            .as_deref()
            .and_then(|token| AccessToken::new(token).ok())
            .ok_or(AuthError::MalformedResponse)
    }
}
