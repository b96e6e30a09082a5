use hyper::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER, WWW_AUTHENTICATE};
use hyper::{Body, Response, StatusCode};
use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the gateway
///
/// Every variant maps to a distinct HTTP status and a machine-readable error
/// code (see [`GatewayError::into_response`]). None of them terminates the
/// process.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// No route predicate set matched the request
    #[error("No route matched {method} {path}")]
    NoRouteMatched { method: String, path: String },

    /// Missing or invalid credential
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Token bucket for the key is empty
    #[error("Rate limit exceeded for {key}, retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    /// Every instance of the service pool is ineligible
    #[error("No backend available for service {service}")]
    NoBackendAvailable { service: String },

    /// Connection failure or open circuit
    #[error("Upstream {target} unavailable: {message}")]
    UpstreamUnavailable { target: String, message: String },

    /// Upstream did not answer within the read timeout
    #[error("Upstream {target} timed out after {timeout:?}")]
    UpstreamTimeout { target: String, timeout: Duration },

    /// Rejected configuration snapshot (reload time only)
    #[error("Configuration invalid: {message}")]
    ConfigurationInvalid { message: String },

    /// Admission limit reached
    #[error("Gateway overloaded: {limit} requests already in flight")]
    Overloaded { limit: usize },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn no_route_matched<M: Into<String>, P: Into<String>>(method: M, path: P) -> Self {
        Self::NoRouteMatched {
            method: method.into(),
            path: path.into(),
        }
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn rate_limited<S: Into<String>>(key: S, retry_after: Duration) -> Self {
        Self::RateLimited {
            key: key.into(),
            retry_after,
        }
    }

    pub fn no_backend_available<S: Into<String>>(service: S) -> Self {
        Self::NoBackendAvailable {
            service: service.into(),
        }
    }

    pub fn upstream_unavailable<T: Into<String>, S: Into<String>>(target: T, message: S) -> Self {
        Self::UpstreamUnavailable {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn upstream_timeout<T: Into<String>>(target: T, timeout: Duration) -> Self {
        Self::UpstreamTimeout {
            target: target.into(),
            timeout,
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationInvalid {
            message: message.into(),
        }
    }

    pub fn overloaded(limit: usize) -> Self {
        Self::Overloaded { limit }
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if a dispatch failing with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamUnavailable { .. } | GatewayError::UpstreamTimeout { .. }
        )
    }

    /// Check if the error should be reported to the backend's circuit
    pub fn counts_as_upstream_failure(&self) -> bool {
        self.is_retryable()
    }

    /// HTTP status used at the boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoRouteMatched { .. } => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NoBackendAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ConfigurationInvalid { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Io { .. } | GatewayError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code carried in the response body
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::NoRouteMatched { .. } => "no_route_matched",
            GatewayError::Unauthorized { .. } => "unauthorized",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::NoBackendAvailable { .. } => "no_backend_available",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::ConfigurationInvalid { .. } => "configuration_invalid",
            GatewayError::Overloaded { .. } => "overloaded",
            GatewayError::Io { .. } | GatewayError::Internal { .. } => "internal_error",
        }
    }

    /// Retry hint in whole seconds, if the error carries one
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after, .. } => {
                let secs = retry_after.as_secs_f64().ceil() as u64;
                Some(secs.max(1))
            }
            GatewayError::Overloaded { .. } => Some(1),
            _ => None,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GatewayError::NoRouteMatched { .. } => ErrorSeverity::Low,
            GatewayError::Unauthorized { .. } => ErrorSeverity::Low,
            GatewayError::RateLimited { .. } => ErrorSeverity::Low,
            GatewayError::NoBackendAvailable { .. } => ErrorSeverity::High,
            GatewayError::UpstreamUnavailable { .. } => ErrorSeverity::Medium,
            GatewayError::UpstreamTimeout { .. } => ErrorSeverity::Medium,
            GatewayError::ConfigurationInvalid { .. } => ErrorSeverity::Critical,
            GatewayError::Overloaded { .. } => ErrorSeverity::High,
            GatewayError::Io { .. } => ErrorSeverity::Medium,
            GatewayError::Internal { .. } => ErrorSeverity::High,
        }
    }

    /// Build the uniform JSON error response
    pub fn into_response(&self) -> Response<Body> {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(secs) = self.retry_after_secs() {
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        if matches!(self, GatewayError::Unauthorized { .. }) {
            headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::io(err.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::config(format!("TOML parsing error: {}", err))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::internal(format!("JSON serialization error: {}", err))
    }
}

impl From<hyper::http::Error> for GatewayError {
    fn from(err: hyper::http::Error) -> Self {
        GatewayError::internal(format!("HTTP error: {}", err))
    }
}

impl From<hyper::http::uri::InvalidUri> for GatewayError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        GatewayError::internal(format!("Invalid URI: {}", err))
    }
}
