pub mod routes {
    use super::HttpMethod;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
    pub struct RouteSpec {
        pub method: HttpMethod,
        pub path: &'static str,
        pub params: &'static [&'static str],
        pub upstream: bool,
    }

    const PARAM_NONE: &[&str] = &[];
    const PARAM_HISTORY: &[&str] = &["deviceId", "from", "to", "limit"];
    const PARAM_SERIES: &[&str] = &["fields", "deviceId", "from", "to", "limit"];

    pub const ROUTE_HISTORY: &str = "/api/telemetry/history";
    pub const ROUTE_SERIES: &str = "/api/telemetry/series";
    pub const ROUTE_LATEST: &str = "/api/telemetry/latest";
    pub const ROUTE_COMMAND: &str = "/api/devices/command";
    pub const ROUTE_STATUS: &str = "/status";

    pub const SIGN_IN_ROUTE: &str = "/sign-in";
    pub const AUTH_CALLBACK_ROUTE: &str = "/auth/callback";
    pub const PUBLIC_ROUTES: &[&str] = &[SIGN_IN_ROUTE, AUTH_CALLBACK_ROUTE];

    pub const BASE_ROUTES: &[RouteSpec] = &[
        RouteSpec {
            method: HttpMethod::Get,
            path: ROUTE_HISTORY,
            params: PARAM_HISTORY,
            upstream: true,
        },
        RouteSpec {
            method: HttpMethod::Get,
            path: ROUTE_SERIES,
            params: PARAM_SERIES,
            upstream: true,
        },
        RouteSpec {
            method: HttpMethod::Get,
            path: ROUTE_LATEST,
            params: PARAM_NONE,
            upstream: true,
        },
        RouteSpec {
            method: HttpMethod::Post,
            path: ROUTE_COMMAND,
            params: PARAM_NONE,
            upstream: true,
        },
        RouteSpec {
            method: HttpMethod::Get,
            path: ROUTE_STATUS,
            params: PARAM_NONE,
            upstream: false,
        },
    ];

    pub fn is_public(route: &str) -> bool {
        PUBLIC_ROUTES.contains(&route)
    }
}

pub mod types {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    pub const MSG_MISSING_REFRESH_TOKEN: &str = "Missing refresh token";
    pub const MSG_MISCONFIGURED: &str = "Server misconfigured";
    pub const MSG_TOKEN_EXCHANGE_FAILED: &str = "Failed to refresh access token";
    pub const MSG_UPSTREAM_UNREACHABLE: &str = "Failed to reach upstream service";
    pub const MSG_UPSTREAM_PAYLOAD: &str = "Upstream service returned an unusable response";
    pub const MSG_INVALID_REQUEST: &str = "Invalid request";
    pub const MSG_NOT_FOUND: &str = "Not found";
    pub const MSG_INTERNAL: &str = "Internal server error";

    /// Fixed-shape failure body returned by every proxy route.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ErrorBody {
        pub error: String,
    }

    impl ErrorBody {
        pub fn new(error: impl Into<String>) -> Self {
            Self {
                error: error.into(),
            }
        }
    }

    /// Query parameters of the historical telemetry endpoint.
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryQuery {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub device_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub from: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub limit: Option<u32>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CommandRequest {
        pub device_id: String,
        pub command: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        pub params: Value,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ServerStatus {
        pub ok: bool,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
    Put,
}
