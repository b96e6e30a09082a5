//! # 过滤器模块
//!
//! 每条路由带有一个有序过滤链。请求阶段按声明顺序执行，第一个终止结果
//! （短路响应或拒绝）跳过剩余过滤器和转发；响应阶段总是执行，
//! 因此错误响应同样带上 CORS 等响应头。
//!
//! - [`builtin`]: 请求头添加、路径前缀剥离、响应改写
//! - [`rate_limit`]: 令牌桶限流
//! - [`auth`]: 凭证提取与可插拔校验器
//! - [`cors`]: 跨域预检与响应头
//! - [`retry`]: 幂等请求的有限重试
//! - [`executor`]: 过滤链执行器

pub mod auth; // 认证过滤器与凭证校验器
pub mod builtin; // 内置改写过滤器
pub mod cors; // 跨域过滤器
pub mod executor; // 过滤链执行器
pub mod rate_limit; // 令牌桶限流
pub mod retry; // 重试策略

use hyper::header::{HeaderValue, HOST, ORIGIN};
use hyper::{Body, Method, Request, Response};
use std::net::SocketAddr;

use crate::config::FilterConfig;
use crate::error::{GatewayError, GatewayResult};

pub use auth::{AuthFilter, CredentialVerifier, Principal, StaticTokenVerifier, VerifierRegistry};
pub use builtin::{AddHeaderFilter, RewriteResponseFilter, StripPrefixFilter};
pub use cors::{CorsFilter, CorsPolicy};
pub use executor::FilterChainExecutor;
pub use rate_limit::{KeyResolver, RateLimitFilter, RateLimiter};
pub use retry::RetryPolicy;

/// Outcome of a request-phase filter
pub enum FilterResult {
    Continue,
    /// Answer the client directly (e.g. CORS preflight)
    ShortCircuit(Response<Body>),
    /// Stop with an error response
    Reject(GatewayError),
}

/// Request facts captured before any filter runs
#[derive(Debug, Clone)]
pub struct ExchangeInfo {
    pub request_id: String,
    pub route_id: String,
    pub method: Method,
    pub path: String,
    pub host: Option<HeaderValue>,
    pub origin: Option<HeaderValue>,
    pub client: Option<SocketAddr>,
    pub preflight: bool,
}

impl ExchangeInfo {
    pub fn new<B>(
        req: &Request<B>,
        request_id: impl Into<String>,
        route_id: impl Into<String>,
        client: Option<SocketAddr>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            route_id: route_id.into(),
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            host: req.headers().get(HOST).cloned(),
            origin: req.headers().get(ORIGIN).cloned(),
            client,
            preflight: cors::is_preflight(req),
        }
    }
}

/// Compiled filter of a route
#[derive(Debug)]
pub enum Filter {
    AddHeader(AddHeaderFilter),
    StripPrefix(StripPrefixFilter),
    RateLimit(RateLimitFilter),
    Auth(AuthFilter),
    RewriteResponse(RewriteResponseFilter),
    Cors(CorsFilter),
    Retry(RetryPolicy),
}

impl Filter {
    pub fn compile(config: &FilterConfig, verifiers: &VerifierRegistry) -> GatewayResult<Self> {
        let filter = match config {
            FilterConfig::AddHeader { name, value } => {
                Filter::AddHeader(AddHeaderFilter::new(name, value)?)
            }
            FilterConfig::StripPrefix { parts } => {
                Filter::StripPrefix(StripPrefixFilter::new(*parts))
            }
            FilterConfig::RateLimit {
                key,
                replenish_rate,
                burst_capacity,
            } => Filter::RateLimit(RateLimitFilter::new(key, *replenish_rate, *burst_capacity)?),
            FilterConfig::Auth {
                scheme,
                verifier,
                header,
            } => Filter::Auth(AuthFilter::new(
                *scheme,
                verifier,
                header.as_deref(),
                verifiers,
            )?),
            FilterConfig::RewriteResponse {
                status,
                set_headers,
                remove_headers,
            } => Filter::RewriteResponse(RewriteResponseFilter::new(
                *status,
                set_headers,
                remove_headers,
            )?),
            FilterConfig::Cors {
                allowed_origins,
                allowed_methods,
                allowed_headers,
                exposed_headers,
                allow_credentials,
                max_age_secs,
            } => Filter::Cors(CorsFilter::new(CorsPolicy::new(
                allowed_origins,
                allowed_methods,
                allowed_headers,
                exposed_headers,
                *allow_credentials,
                *max_age_secs,
            )?)),
            FilterConfig::Retry { retries, statuses } => {
                Filter::Retry(RetryPolicy::new(*retries, statuses))
            }
        };
        Ok(filter)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Filter::AddHeader(_) => "add_header",
            Filter::StripPrefix(_) => "strip_prefix",
            Filter::RateLimit(_) => "rate_limit",
            Filter::Auth(_) => "auth",
            Filter::RewriteResponse(_) => "rewrite_response",
            Filter::Cors(_) => "cors",
            Filter::Retry(_) => "retry",
        }
    }

    pub async fn on_request(&self, req: &mut Request<Body>, info: &ExchangeInfo) -> FilterResult {
        match self {
            Filter::AddHeader(f) => f.on_request(req),
            Filter::StripPrefix(f) => f.on_request(req),
            Filter::RateLimit(f) => f.on_request(req, info),
            Filter::Auth(f) => f.on_request(req).await,
            Filter::Cors(f) => f.on_request(req),
            Filter::RewriteResponse(_) | Filter::Retry(_) => FilterResult::Continue,
        }
    }

    pub fn on_response(&self, resp: &mut Response<Body>, info: &ExchangeInfo) {
        match self {
            Filter::RewriteResponse(f) => f.on_response(resp),
            Filter::Cors(f) => f.on_response(resp, info),
            _ => {}
        }
    }
}

#[cfg(test)]
pub(crate) fn test_info(route_id: &str) -> ExchangeInfo {
    ExchangeInfo {
        request_id: "test-request".to_string(),
        route_id: route_id.to_string(),
        method: Method::GET,
        path: "/".to_string(),
        host: None,
        origin: None,
        client: Some(SocketAddr::from(([127, 0, 0, 1], 40000))),
        preflight: false,
    }
}
