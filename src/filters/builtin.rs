//! 内置的请求/响应改写过滤器

use hyper::header::{HeaderName, HeaderValue};
use hyper::http::uri::PathAndQuery;
use hyper::{Body, Request, Response, StatusCode, Uri};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::FilterResult;
use crate::error::{GatewayError, GatewayResult};

fn header_name(name: &str) -> GatewayResult<HeaderName> {
    HeaderName::from_str(name)
        .map_err(|e| GatewayError::config(format!("Invalid header name '{}': {}", name, e)))
}

fn header_value(name: &str, value: &str) -> GatewayResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GatewayError::config(format!("Invalid value for header '{}': {}", name, e)))
}

/// Sets a request header, replacing existing values
#[derive(Debug, Clone)]
pub struct AddHeaderFilter {
    name: HeaderName,
    value: HeaderValue,
}

impl AddHeaderFilter {
    pub fn new(name: &str, value: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
            value: header_value(name, value)?,
        })
    }

    pub fn on_request(&self, req: &mut Request<Body>) -> FilterResult {
        req.headers_mut().insert(self.name.clone(), self.value.clone());
        FilterResult::Continue
    }
}

/// Drops the first `parts` path segments, keeping the query
#[derive(Debug, Clone)]
pub struct StripPrefixFilter {
    parts: usize,
}

impl StripPrefixFilter {
    pub fn new(parts: usize) -> Self {
        Self { parts }
    }

    pub fn strip(&self, uri: &Uri) -> GatewayResult<Uri> {
        let remaining: Vec<&str> = uri
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(self.parts)
            .collect();

        let mut path = format!("/{}", remaining.join("/"));
        if path.len() > 1 && uri.path().ends_with('/') {
            path.push('/');
        }
        if let Some(query) = uri.query() {
            path.push('?');
            path.push_str(query);
        }

        let mut parts = uri.clone().into_parts();
        parts.path_and_query = Some(PathAndQuery::from_str(&path)?);
        Uri::from_parts(parts).map_err(|e| GatewayError::internal(e.to_string()))
    }

    pub fn on_request(&self, req: &mut Request<Body>) -> FilterResult {
        match self.strip(req.uri()) {
            Ok(uri) => {
                *req.uri_mut() = uri;
                FilterResult::Continue
            }
            Err(err) => FilterResult::Reject(err),
        }
    }
}

/// Status override plus header set/remove on the response
#[derive(Debug, Clone)]
pub struct RewriteResponseFilter {
    status: Option<StatusCode>,
    set_headers: Vec<(HeaderName, HeaderValue)>,
    remove_headers: Vec<HeaderName>,
}

impl RewriteResponseFilter {
    pub fn new(
        status: Option<u16>,
        set_headers: &BTreeMap<String, String>,
        remove_headers: &[String],
    ) -> GatewayResult<Self> {
        let status = status
            .map(|s| {
                StatusCode::from_u16(s)
                    .map_err(|e| GatewayError::config(format!("Invalid status {}: {}", s, e)))
            })
            .transpose()?;
        let set_headers = set_headers
            .iter()
            .map(|(name, value)| Ok((header_name(name)?, header_value(name, value)?)))
            .collect::<GatewayResult<Vec<_>>>()?;
        let remove_headers = remove_headers
            .iter()
            .map(|name| header_name(name))
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(Self {
            status,
            set_headers,
            remove_headers,
        })
    }

    pub fn on_response(&self, resp: &mut Response<Body>) {
        if let Some(status) = self.status {
            *resp.status_mut() = status;
        }
        let headers = resp.headers_mut();
        for name in &self.remove_headers {
            headers.remove(name);
        }
        for (name, value) in &self.set_headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_header_replaces() {
        let filter = AddHeaderFilter::new("x-gateway", "distri").unwrap();
        let mut req = Request::builder()
            .header("x-gateway", "old")
            .header("x-gateway", "older")
            .body(Body::empty())
            .unwrap(); // OK in tests - valid request

        filter.on_request(&mut req);
        filter.on_request(&mut req);

        let values: Vec<_> = req.headers().get_all("x-gateway").iter().collect();
        assert_eq!(values, vec!["distri"]);
    }

    #[test]
    fn test_add_header_invalid() {
        assert!(AddHeaderFilter::new("bad name", "v").is_err());
        assert!(AddHeaderFilter::new("x-ok", "line\nbreak").is_err());
    }

    #[test]
    fn test_strip_prefix() {
        let filter = StripPrefixFilter::new(2);
        let uri: Uri = "/api/v1/students/42?expand=grades".parse().unwrap();
        assert_eq!(filter.strip(&uri).unwrap(), "/students/42?expand=grades");

        let uri: Uri = "/api/v1".parse().unwrap();
        assert_eq!(filter.strip(&uri).unwrap(), "/");

        let uri: Uri = "/api/v1/".parse().unwrap();
        assert_eq!(filter.strip(&uri).unwrap(), "/");

        let uri: Uri = "http://gateway.local/api/v1/x".parse().unwrap();
        assert_eq!(
            filter.strip(&uri).unwrap().to_string(),
            "http://gateway.local/x"
        );
    }

    #[test]
    fn test_strip_prefix_keeps_trailing_slash() {
        let filter = StripPrefixFilter::new(2);
        let uri: Uri = "/api/v1/students/".parse().unwrap();
        assert_eq!(filter.strip(&uri).unwrap(), "/students/");

        let uri: Uri = "/api/v1/students/?page=2".parse().unwrap();
        assert_eq!(filter.strip(&uri).unwrap(), "/students/?page=2");
    }

    #[test]
    fn test_rewrite_response_idempotent() {
        let mut set = BTreeMap::new();
        set.insert("x-powered-by".to_string(), "distri-gateway".to_string());
        let filter = RewriteResponseFilter::new(Some(202), &set, &["server".to_string()]).unwrap();

        let mut resp = Response::builder()
            .header("server", "tomcat")
            .body(Body::empty())
            .unwrap();
        filter.on_response(&mut resp);
        let once = resp.headers().clone();
        filter.on_response(&mut resp);

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(resp.headers(), &once);
        assert!(!resp.headers().contains_key("server"));
        assert_eq!(resp.headers()["x-powered-by"], "distri-gateway");
    }

    #[test]
    fn test_rewrite_response_invalid_status() {
        assert!(RewriteResponseFilter::new(Some(1000), &BTreeMap::new(), &[]).is_err());
    }
}
