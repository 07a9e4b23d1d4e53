//! Fleetdash proxy errors.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::oauth::AuthError;
use crate::upstream::UpstreamError;
use fleetdash_server_backbone::types::{
    ErrorBody, MSG_INVALID_REQUEST, MSG_MISCONFIGURED, MSG_MISSING_REFRESH_TOKEN,
    MSG_TOKEN_EXCHANGE_FAILED, MSG_UPSTREAM_PAYLOAD, MSG_UPSTREAM_UNREACHABLE,
};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("missing refresh token")]
    MissingRefreshToken,
    #[error("configuration missing: {0}")]
    Misconfigured(&'static str),
    #[error("token exchange failed: {0}")]
    TokenExchange(#[source] AuthError),
    #[error("upstream call failed: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("upstream payload unusable: {0}")]
    UpstreamPayload(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<AuthError> for ProxyError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotConfigured => ProxyError::Misconfigured("token endpoint"),
            other => ProxyError::TokenExchange(other),
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> Status {
        match self {
            ProxyError::MissingRefreshToken => Status::Unauthorized,
            ProxyError::InvalidRequest(_) => Status::BadRequest,
            _ => Status::InternalServerError,
        }
    }

    /// The only text callers get to see; causes stay in the log.
    pub fn public_message(&self) -> &'static str {
        match self {
            ProxyError::MissingRefreshToken => MSG_MISSING_REFRESH_TOKEN,
            ProxyError::Misconfigured(_) => MSG_MISCONFIGURED,
            ProxyError::TokenExchange(_) => MSG_TOKEN_EXCHANGE_FAILED,
            ProxyError::Upstream(_) => MSG_UPSTREAM_UNREACHABLE,
            ProxyError::UpstreamPayload(_) => MSG_UPSTREAM_PAYLOAD,
            ProxyError::InvalidRequest(_) => MSG_INVALID_REQUEST,
        }
    }
}

impl<'r> Responder<'r, 'static> for ProxyError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let (method, uri) = (req.method(), req.uri());
        match &self {
            ProxyError::MissingRefreshToken | ProxyError::InvalidRequest(_) => {
                debug!("[PROXY] {} {}: {}", method, uri, self)
            }
            ProxyError::Misconfigured(_) => error!("[PROXY] {} {}: {}", method, uri, self),
            _ => warn!("[PROXY] {} {}: {}", method, uri, self),
        }
        (self.status(), Json(ErrorBody::new(self.public_message()))).respond_to(req)
    }
}
