use hyper::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN,
    VARY,
};
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode};
use std::str::FromStr;

use super::{ExchangeInfo, FilterResult};
use crate::error::{GatewayError, GatewayResult};

/// `OPTIONS` carrying `Origin` and `Access-Control-Request-Method`
pub fn is_preflight<B>(req: &Request<B>) -> bool {
    req.method() == Method::OPTIONS
        && req.headers().contains_key(ORIGIN)
        && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
}

/// Cross-origin policy of a route
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    any_origin: bool,
    allowed_origins: Vec<String>,
    allowed_methods: Vec<Method>,
    allowed_headers: Vec<HeaderName>,
    exposed_headers: Vec<HeaderName>,
    allow_credentials: bool,
    max_age_secs: Option<u64>,
}

impl CorsPolicy {
    pub fn new(
        allowed_origins: &[String],
        allowed_methods: &[String],
        allowed_headers: &[String],
        exposed_headers: &[String],
        allow_credentials: bool,
        max_age_secs: Option<u64>,
    ) -> GatewayResult<Self> {
        let methods = allowed_methods
            .iter()
            .map(|m| {
                Method::from_str(&m.to_ascii_uppercase())
                    .map_err(|e| GatewayError::config(format!("Invalid CORS method '{}': {}", m, e)))
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(Self {
            any_origin: allowed_origins.iter().any(|o| o == "*"),
            allowed_origins: allowed_origins
                .iter()
                .filter(|o| *o != "*")
                .map(|o| o.trim_end_matches('/').to_ascii_lowercase())
                .collect(),
            allowed_methods: methods,
            allowed_headers: parse_header_names(allowed_headers)?,
            exposed_headers: parse_header_names(exposed_headers)?,
            allow_credentials,
            max_age_secs,
        })
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.any_origin
            || self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin.trim_end_matches('/')))
    }

    fn method_allowed(&self, method: &str) -> bool {
        self.allowed_methods.iter().any(|m| m.as_str() == method)
    }

    fn headers_allowed(&self, requested: &[String]) -> bool {
        self.allowed_headers.is_empty()
            || requested
                .iter()
                .all(|h| self.allowed_headers.iter().any(|a| a.as_str() == h))
    }

    /// `*` is only used when credentials are not allowed
    fn allow_origin_value(&self, origin: &HeaderValue) -> HeaderValue {
        if self.any_origin && !self.allow_credentials {
            HeaderValue::from_static("*")
        } else {
            origin.clone()
        }
    }

    fn apply_origin(&self, headers: &mut HeaderMap, origin: &HeaderValue) {
        let value = self.allow_origin_value(origin);
        let echoed = value != "*";
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if echoed {
            add_vary_origin(headers);
        }
    }

    fn preflight_response(&self, req: &Request<Body>) -> Response<Body> {
        let headers = req.headers();
        let origin = headers.get(ORIGIN).cloned();
        let requested_method = headers
            .get(ACCESS_CONTROL_REQUEST_METHOD)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let requested_headers: Vec<String> = headers
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let allowed = origin
            .as_ref()
            .and_then(|o| o.to_str().ok())
            .is_some_and(|o| self.origin_allowed(o))
            && self.method_allowed(requested_method)
            && self.headers_allowed(&requested_headers);

        let mut response = Response::new(Body::empty());
        let Some(origin) = origin.filter(|_| allowed) else {
            *response.status_mut() = StatusCode::FORBIDDEN;
            return response;
        };

        *response.status_mut() = StatusCode::NO_CONTENT;
        let out = response.headers_mut();
        self.apply_origin(out, &origin);

        if let Some(methods) = join_values(self.allowed_methods.iter().map(|m| m.as_str())) {
            out.insert(ACCESS_CONTROL_ALLOW_METHODS, methods);
        }
        let allow_headers = if self.allowed_headers.is_empty() {
            join_values(requested_headers.iter().map(|h| h.as_str()))
        } else {
            join_values(self.allowed_headers.iter().map(|h| h.as_str()))
        };
        if let Some(allow_headers) = allow_headers {
            out.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        }
        if let Some(max_age) = self.max_age_secs {
            out.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
        }
        response
    }
}

fn parse_header_names(names: &[String]) -> GatewayResult<Vec<HeaderName>> {
    names
        .iter()
        .map(|name| {
            HeaderName::from_str(name)
                .map_err(|e| GatewayError::config(format!("Invalid CORS header '{}': {}", name, e)))
        })
        .collect()
}

fn join_values<'a>(values: impl Iterator<Item = &'a str>) -> Option<HeaderValue> {
    let joined = values.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        return None;
    }
    HeaderValue::from_str(&joined).ok()
}

fn add_vary_origin(headers: &mut HeaderMap) {
    let present = headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("origin") || v.trim() == "*");
    if !present {
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
}

/// Preflight answers in the request phase, response headers in the post phase
#[derive(Debug, Clone)]
pub struct CorsFilter {
    policy: CorsPolicy,
}

impl CorsFilter {
    pub fn new(policy: CorsPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CorsPolicy {
        &self.policy
    }

    pub fn on_request(&self, req: &Request<Body>) -> FilterResult {
        if is_preflight(req) {
            FilterResult::ShortCircuit(self.policy.preflight_response(req))
        } else {
            FilterResult::Continue
        }
    }

    pub fn on_response(&self, resp: &mut Response<Body>, info: &ExchangeInfo) {
        if info.preflight {
            return;
        }
        let Some(origin) = info.origin.as_ref() else {
            return;
        };
        let allowed = origin
            .to_str()
            .map(|o| self.policy.origin_allowed(o))
            .unwrap_or(false);
        if !allowed {
            return;
        }

        let headers = resp.headers_mut();
        self.policy.apply_origin(headers, origin);
        if let Some(exposed) = join_values(self.policy.exposed_headers.iter().map(|h| h.as_str())) {
            headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, exposed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_info;

    const FRONTEND: &str = "http://localhost:3000";

    fn policy(origins: &[&str], credentials: bool) -> CorsPolicy {
        CorsPolicy::new(
            &origins.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
            &["GET".to_string(), "POST".to_string()],
            &[],
            &["x-request-id".to_string()],
            credentials,
            Some(3600),
        )
        .unwrap()
    }

    fn preflight(origin: &str, method: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/students")
            .header(ORIGIN, origin)
            .header(ACCESS_CONTROL_REQUEST_METHOD, method)
            .header(ACCESS_CONTROL_REQUEST_HEADERS, "Authorization, Content-Type")
            .body(Body::empty())
            .unwrap() // OK in tests - valid request
    }

    fn short_circuit(result: FilterResult) -> Response<Body> {
        match result {
            FilterResult::ShortCircuit(resp) => resp,
            _ => panic!("expected short circuit"),
        }
    }

    #[test]
    fn test_preflight_allowed() {
        let filter = CorsFilter::new(policy(&[FRONTEND], true));
        let resp = short_circuit(filter.on_request(&preflight(FRONTEND, "POST")));

        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let h = resp.headers();
        assert_eq!(h[ACCESS_CONTROL_ALLOW_ORIGIN], FRONTEND);
        assert_eq!(h[ACCESS_CONTROL_ALLOW_METHODS], "GET, POST");
        assert_eq!(h[ACCESS_CONTROL_ALLOW_HEADERS], "authorization, content-type");
        assert_eq!(h[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(h[ACCESS_CONTROL_MAX_AGE], "3600");
        assert_eq!(h[VARY], "Origin");
    }

    #[test]
    fn test_preflight_denied() {
        let filter = CorsFilter::new(policy(&[FRONTEND], false));

        let resp = short_circuit(filter.on_request(&preflight("http://evil.test", "GET")));
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(!resp.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));

        let resp = short_circuit(filter.on_request(&preflight(FRONTEND, "DELETE")));
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_plain_options_is_not_preflight() {
        let filter = CorsFilter::new(policy(&["*"], false));
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(filter.on_request(&req), FilterResult::Continue));
    }

    #[test]
    fn test_response_headers_idempotent() {
        let filter = CorsFilter::new(policy(&[FRONTEND], false));
        let mut info = test_info("students");
        info.origin = Some(HeaderValue::from_static(FRONTEND));

        let mut resp = Response::new(Body::empty());
        filter.on_response(&mut resp, &info);
        let first = resp.headers().clone();
        filter.on_response(&mut resp, &info);

        assert_eq!(resp.headers(), &first);
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], FRONTEND);
        assert_eq!(resp.headers()[ACCESS_CONTROL_EXPOSE_HEADERS], "x-request-id");
        assert_eq!(resp.headers().get_all(VARY).iter().count(), 1);
    }

    #[test]
    fn test_wildcard_origin() {
        let mut info = test_info("students");
        info.origin = Some(HeaderValue::from_static("http://anything.test"));

        let filter = CorsFilter::new(policy(&["*"], false));
        let mut resp = Response::new(Body::empty());
        filter.on_response(&mut resp, &info);
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(!resp.headers().contains_key(VARY));

        // Credentials never combine with '*'
        let filter = CorsFilter::new(policy(&["*"], true));
        let mut resp = Response::new(Body::empty());
        filter.on_response(&mut resp, &info);
        assert_eq!(
            resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://anything.test"
        );
    }

    #[test]
    fn test_disallowed_origin_gets_no_headers() {
        let filter = CorsFilter::new(policy(&[FRONTEND], false));
        let mut info = test_info("students");
        info.origin = Some(HeaderValue::from_static("http://evil.test"));

        let mut resp = Response::new(Body::empty());
        filter.on_response(&mut resp, &info);
        assert!(resp.headers().is_empty());
    }
}
