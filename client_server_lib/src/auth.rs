//! Fleetdash OAuth token handling
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::io;

/// Cookie carrying the long-lived OAuth refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

// Identity providers issue opaque refresh tokens well below this size.
pub const MAX_TOKEN_CHARS: usize = 8192;

/// Long-lived OAuth refresh token. Never printed in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

/// Short-lived bearer token attached to upstream calls.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl RefreshToken {
    pub fn new(raw: &str) -> io::Result<Self> {
        validate_token(raw).map(|token| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AccessToken {
    pub fn new(raw: &str) -> io::Result<Self> {
        validate_token(raw).map(|token| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefreshToken(<{} chars>)", self.0.len())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} chars>)", self.0.len())
    }
}

fn validate_token(raw: &str) -> io::Result<&str> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Missing refresh token".to_string(),
        ));
    }

    // Tokens travel in cookies and headers, so whitespace or control chars mean corruption.
    if token.len() > MAX_TOKEN_CHARS || token.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Invalid token".to_string(),
        ));
    }

    Ok(token)
}

/// Parse a refresh token as stored on disk (one token, optional trailing newline).
pub fn parse_refresh_token(contents: Vec<u8>) -> io::Result<RefreshToken> {
    let token = String::from_utf8(contents)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    RefreshToken::new(&token)
}
