//! Fleetdash proxy configuration.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use fleetdash_client_server_lib::auth::REFRESH_TOKEN_COOKIE;
use std::env;
use std::net::{IpAddr, Ipv4Addr};

const DEFAULT_PORT: u16 = 8000;

/// Upstream endpoints and identity-provider settings.
///
/// Every URL is optional: an absent one only fails the requests that need it.
#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    pub address: Option<IpAddr>,
    pub port: u16,
    pub token_endpoint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub history_url: Option<String>,
    pub latest_url: Option<String>,
    pub command_url: Option<String>,
    pub refresh_cookie: String,
}

/// Which upstream a proxy route forwards to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamTarget {
    History,
    Latest,
    Command,
}

impl UpstreamTarget {
    pub fn name(&self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Latest => "latest",
            Self::Command => "command",
        }
    }
}

impl ServerConfig {
    /// Read `FLEETDASH_*` variables (a `.env` file is honored) and the
    /// `--network-type` argument.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }

        let port = match env::var("FLEETDASH_PORT") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Ignoring invalid FLEETDASH_PORT={raw}, using {DEFAULT_PORT}");
                DEFAULT_PORT
            }),
            Err(_) => DEFAULT_PORT,
        };

        Self {
            address: Some(bind_address(network_type_arg(env::args().skip(1)).as_deref())),
            port,
            token_endpoint: var("FLEETDASH_TOKEN_ENDPOINT"),
            client_id: var("FLEETDASH_CLIENT_ID"),
            client_secret: var("FLEETDASH_CLIENT_SECRET"),
            history_url: var("FLEETDASH_HISTORY_URL"),
            latest_url: var("FLEETDASH_LATEST_URL"),
            command_url: var("FLEETDASH_COMMAND_URL"),
            refresh_cookie: var("FLEETDASH_REFRESH_COOKIE")
                .unwrap_or_else(|| REFRESH_TOKEN_COOKIE.to_string()),
        }
    }

    pub fn upstream_url(&self, target: UpstreamTarget) -> Option<&str> {
        match target {
            UpstreamTarget::History => self.history_url.as_deref(),
            UpstreamTarget::Latest => self.latest_url.as_deref(),
            UpstreamTarget::Command => self.command_url.as_deref(),
        }
    }

    /// Log which pieces are missing so misconfiguration shows up at startup.
    pub fn report(&self) {
        if self.token_endpoint.is_none() {
            warn!("FLEETDASH_TOKEN_ENDPOINT not set; every proxied request will fail");
        }
        if self.client_id.is_none() {
            warn!("FLEETDASH_CLIENT_ID not set");
        }
        for target in [
            UpstreamTarget::History,
            UpstreamTarget::Latest,
            UpstreamTarget::Command,
        ] {
            if self.upstream_url(target).is_none() {
                warn!("No {} upstream URL configured", target.name());
            }
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn network_type_arg(mut args: impl Iterator<Item = String>) -> Option<String> {
    let mut network_type = None;
    while let Some(arg) = args.next() {
        if arg == "--network-type" {
            if let Some(value) = args.next() {
                network_type = Some(value);
            }
        } else if let Some(value) = arg.strip_prefix("--network-type=") {
            network_type = Some(value.to_string());
        }
    }
    network_type
}

fn bind_address(network_type: Option<&str>) -> IpAddr {
    match network_type {
        Some("http") => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        Some("https") | None => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Some(other) => {
            error!("Unknown --network-type={other}. Use http or https.");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
