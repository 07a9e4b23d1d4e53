//! Fleetdash proxy server.
//! Attaches a freshly exchanged bearer token to dashboard requests and
//! relays them to the cloud backend.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

#[macro_use]
extern crate log;

use std::sync::Arc;

use fleetdash_client_server_lib::series::{build_series, parse_field_list};
use fleetdash_client_server_lib::telemetry::records_from_json;
use fleetdash_server_backbone::types::{
    ErrorBody, ServerStatus, MSG_INTERNAL, MSG_INVALID_REQUEST, MSG_MISSING_REFRESH_TOKEN,
    MSG_NOT_FOUND,
};
use fleetdash_server_backbone::HttpMethod;
use rocket::http::uri::Origin;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, launch, post, routes, Build, Rocket, State};
use serde_json::Value;
use url::form_urlencoded;

mod auth;
mod config;
mod error;
mod oauth;
mod upstream;


use crate::auth::{CookieError, RefreshCookie};
use crate::config::{ServerConfig, UpstreamTarget};
use crate::error::ProxyError;
use crate::oauth::{OidcTokenExchange, SharedTokenExchange};
use crate::upstream::{HttpUpstream, SharedUpstream, UpstreamRequest, UpstreamResponse};

type Relayed = (Status, Json<Value>);

fn relay(response: UpstreamResponse) -> Relayed {
    (Status::new(response.status), Json(response.body))
}

/// Exchange the caller's refresh token and forward one request upstream.
#[allow(clippy::too_many_arguments)]
async fn forward(
    cookie: Result<RefreshCookie, CookieError>,
    config: &ServerConfig,
    tokens: &SharedTokenExchange,
    upstream: &SharedUpstream,
    target: UpstreamTarget,
    method: HttpMethod,
    query: Option<&str>,
    body: Option<&Value>,
) -> Result<UpstreamResponse, ProxyError> {
    let cookie = cookie.map_err(|_| ProxyError::MissingRefreshToken)?;
    let url = config
        .upstream_url(target)
        .ok_or(ProxyError::Misconfigured(target.name()))?;

    let access_token = tokens.exchange(&cookie.token).await?;

    let response = upstream
        .forward(UpstreamRequest {
            method,
            url,
            bearer: &access_token,
            query,
            body,
        })
        .await?;

    if response.is_success() {
        debug!("[PROXY] {} upstream answered {}", target.name(), response.status);
    } else {
        info!("[PROXY] {} upstream answered {}", target.name(), response.status);
    }
    Ok(response)
}

#[get("/api/telemetry/history")]
async fn history(
    cookie: Result<RefreshCookie, CookieError>,
    origin: &Origin<'_>,
    config: &State<ServerConfig>,
    tokens: &State<SharedTokenExchange>,
    upstream: &State<SharedUpstream>,
) -> Result<Relayed, ProxyError> {
    let query = origin.query();
    let query = query.as_ref().map(|q| q.as_str());
    forward(
        cookie,
        config,
        tokens,
        upstream,
        UpstreamTarget::History,
        HttpMethod::Get,
        query,
        None,
    )
    .await
    .map(relay)
}

#[get("/api/telemetry/latest")]
async fn latest(
    cookie: Result<RefreshCookie, CookieError>,
    config: &State<ServerConfig>,
    tokens: &State<SharedTokenExchange>,
    upstream: &State<SharedUpstream>,
) -> Result<Relayed, ProxyError> {
    forward(
        cookie,
        config,
        tokens,
        upstream,
        UpstreamTarget::Latest,
        HttpMethod::Get,
        None,
        None,
    )
    .await
    .map(relay)
}

#[post("/api/devices/command", data = "<data>")]
async fn command(
    cookie: Result<RefreshCookie, CookieError>,
    data: String,
    config: &State<ServerConfig>,
    tokens: &State<SharedTokenExchange>,
    upstream: &State<SharedUpstream>,
) -> Result<Relayed, ProxyError> {
    // The cookie is checked before the body so an anonymous caller always sees 401.
    let cookie = Ok(cookie.map_err(|_| ProxyError::MissingRefreshToken)?);
    let body: Value =
        serde_json::from_str(&data).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    forward(
        cookie,
        config,
        tokens,
        upstream,
        UpstreamTarget::Command,
        HttpMethod::Post,
        None,
        Some(&body),
    )
    .await
    .map(relay)
}

/// Split `fields=a,b` off the incoming query; the rest goes upstream untouched.
fn split_series_query(raw: Option<&str>) -> (Vec<String>, Option<String>) {
    let mut fields = Vec::new();
    let mut rest = form_urlencoded::Serializer::new(String::new());
    let mut forwarded = 0;

    for (key, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        if key == "fields" {
            fields.extend(parse_field_list(&value));
        } else {
            rest.append_pair(&key, &value);
            forwarded += 1;
        }
    }

    let rest = rest.finish();
    (fields, (forwarded > 0).then_some(rest))
}

#[get("/api/telemetry/series")]
async fn series(
    cookie: Result<RefreshCookie, CookieError>,
    origin: &Origin<'_>,
    config: &State<ServerConfig>,
    tokens: &State<SharedTokenExchange>,
    upstream: &State<SharedUpstream>,
) -> Result<Relayed, ProxyError> {
    let cookie = Ok(cookie.map_err(|_| ProxyError::MissingRefreshToken)?);
    let raw_query = origin.query();
    let (fields, query) = split_series_query(raw_query.as_ref().map(|q| q.as_str()));
    if fields.is_empty() {
        return Err(ProxyError::InvalidRequest("no fields requested".into()));
    }

    let response = forward(
        cookie,
        config,
        tokens,
        upstream,
        UpstreamTarget::History,
        HttpMethod::Get,
        query.as_deref(),
        None,
    )
    .await?;

    if !response.is_success() {
        return Ok(relay(response));
    }

    let records = records_from_json(response.body)
        .map_err(|e| ProxyError::UpstreamPayload(e.to_string()))?;
    let table = build_series(&records, &fields);
    let body =
        serde_json::to_value(&table).map_err(|e| ProxyError::UpstreamPayload(e.to_string()))?;

    Ok((Status::Ok, Json(body)))
}

#[get("/status")]
fn status() -> Json<ServerStatus> {
    Json(ServerStatus { ok: true })
}

#[catch(400)]
fn bad_request() -> Json<ErrorBody> {
    Json(ErrorBody::new(MSG_INVALID_REQUEST))
}

#[catch(401)]
fn unauthorized() -> Json<ErrorBody> {
    Json(ErrorBody::new(MSG_MISSING_REFRESH_TOKEN))
}

#[catch(404)]
fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody::new(MSG_NOT_FOUND))
}

#[catch(422)]
fn unprocessable() -> Json<ErrorBody> {
    Json(ErrorBody::new(MSG_INVALID_REQUEST))
}

#[catch(500)]
fn internal_error() -> Json<ErrorBody> {
    Json(ErrorBody::new(MSG_INTERNAL))
}

pub fn build(
    config: ServerConfig,
    tokens: SharedTokenExchange,
    upstream: SharedUpstream,
) -> Rocket<Build> {
    let mut rocket_config = rocket::Config {
        port: config.port,
        ..rocket::Config::default()
    };
    if let Some(address) = config.address {
        rocket_config.address = address;
    }

    rocket::custom(rocket_config)
        .manage(config)
        .manage(tokens)
        .manage(upstream)
        .mount("/", routes![history, latest, command, series, status])
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized,
                not_found,
                unprocessable,
                internal_error
            ],
        )
}

#[launch]
fn rocket() -> _ {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    config.report();

    let tokens: SharedTokenExchange = Arc::new(
        OidcTokenExchange::new(
            config.token_endpoint.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
        )
        .expect("Failed to build token exchange client"),
    );
    let upstream: SharedUpstream =
        Arc::new(HttpUpstream::new().expect("Failed to build upstream client"));

    info!(
        "Starting fleetdash proxy on port {} (refresh cookie: {})",
        config.port, config.refresh_cookie
    );

    build(config, tokens, upstream)
}
