//! Fleetdash proxy authentication.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::ServerConfig;
use fleetdash_client_server_lib::auth::{RefreshToken, REFRESH_TOKEN_COOKIE};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

/// Refresh token taken from the incoming request's cookie.
pub struct RefreshCookie {
    pub token: RefreshToken,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CookieError {
    Missing,
    Invalid,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RefreshCookie {
    type Error = CookieError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cookie_name = req
            .rocket()
            .state::<ServerConfig>()
            .map(|config| config.refresh_cookie.as_str())
            .unwrap_or(REFRESH_TOKEN_COOKIE);

        let raw = match req.cookies().get(cookie_name) {
            Some(cookie) if !cookie.value().trim().is_empty() => cookie.value().to_string(),
            _ => {
                debug!("[AUTH] No {} cookie on {}", cookie_name, req.uri());
                return Outcome::Error((Status::Unauthorized, CookieError::Missing));
            }
        };

        match RefreshToken::new(&raw) {
            Ok(token) => Outcome::Success(RefreshCookie { token }),
            Err(e) => {
                debug!("[AUTH] Rejecting malformed refresh token: {}", e);
                Outcome::Error((Status::Unauthorized, CookieError::Invalid))
            }
        }
    }
}
