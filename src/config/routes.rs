use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{GatewayError, GatewayResult};

/// One routing rule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    pub id: String,
    /// `lb://<service>` or `http(s)://host[:port]`
    pub uri: String,
    /// Lower wins; ties keep declaration order
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub predicates: Vec<PredicateConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

/// Parsed route destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriTarget {
    Service(String),
    Static {
        scheme: String,
        host: String,
        port: u16,
    },
}

impl RouteConfig {
    pub fn target(&self) -> GatewayResult<UriTarget> {
        let uri: Uri = self.uri.parse().map_err(|e| {
            GatewayError::config(format!("Route '{}' has invalid uri '{}': {}", self.id, self.uri, e))
        })?;

        let scheme = uri.scheme_str().unwrap_or_default().to_ascii_lowercase();
        let authority = uri.authority().ok_or_else(|| {
            GatewayError::config(format!("Route '{}' uri '{}' has no authority", self.id, self.uri))
        })?;

        match scheme.as_str() {
            "lb" => Ok(UriTarget::Service(authority.host().to_string())),
            "http" | "https" => {
                let default_port = if scheme == "https" { 443 } else { 80 };
                Ok(UriTarget::Static {
                    host: authority.host().to_string(),
                    port: authority.port_u16().unwrap_or(default_port),
                    scheme,
                })
            }
            other => Err(GatewayError::config(format!(
                "Route '{}' uri scheme '{}' is not supported (use lb, http or https)",
                self.id, other
            ))),
        }
    }
}

/// Request predicates; all of a route's predicates must hold
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredicateConfig {
    /// `*` / `{name}` match one segment, `**` any number
    Path { pattern: String },
    Method { methods: Vec<String> },
    /// Value must fully match `pattern`; only presence is checked without one
    Header {
        name: String,
        #[serde(default)]
        pattern: Option<String>,
    },
    /// Same wildcard grammar as paths over `.`-separated labels
    Host { pattern: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    Bearer,
    ApiKey,
}

/// Filters run in declared order; post phases run for every outcome
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    AddHeader {
        name: String,
        value: String,
    },
    StripPrefix {
        parts: usize,
    },
    RateLimit {
        /// `client_ip`, `route` or `header:<name>`
        #[serde(default = "default_rate_limit_key")]
        key: String,
        replenish_rate: f64,
        burst_capacity: u32,
    },
    Auth {
        scheme: AuthScheme,
        verifier: String,
        /// Credential header for `api_key` (default `x-api-key`)
        #[serde(default)]
        header: Option<String>,
    },
    RewriteResponse {
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        set_headers: BTreeMap<String, String>,
        #[serde(default)]
        remove_headers: Vec<String>,
    },
    Cors {
        allowed_origins: Vec<String>,
        #[serde(default = "default_cors_methods")]
        allowed_methods: Vec<String>,
        /// Empty echoes the requested headers on preflight
        #[serde(default)]
        allowed_headers: Vec<String>,
        #[serde(default)]
        exposed_headers: Vec<String>,
        #[serde(default)]
        allow_credentials: bool,
        #[serde(default)]
        max_age_secs: Option<u64>,
    },
    Retry {
        #[serde(default = "default_retries")]
        retries: u32,
        #[serde(default = "default_retry_statuses")]
        statuses: Vec<u16>,
    },
}

fn default_rate_limit_key() -> String {
    "client_ip".to_string()
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_retries() -> u32 {
    2
}

fn default_retry_statuses() -> Vec<u16> {
    vec![502, 503, 504]
}

impl FilterConfig {
    pub fn name(&self) -> &'static str {
        match self {
            FilterConfig::AddHeader { .. } => "add_header",
            FilterConfig::StripPrefix { .. } => "strip_prefix",
            FilterConfig::RateLimit { .. } => "rate_limit",
            FilterConfig::Auth { .. } => "auth",
            FilterConfig::RewriteResponse { .. } => "rewrite_response",
            FilterConfig::Cors { .. } => "cors",
            FilterConfig::Retry { .. } => "retry",
        }
    }
}
