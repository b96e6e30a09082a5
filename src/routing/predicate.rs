//! 路由谓词
//!
//! 谓词是对请求的纯函数判断，一条路由的所有谓词都成立时才匹配。

use hyper::header::{HeaderName, HOST};
use hyper::{Method, Request};
use regex::Regex;
use std::str::FromStr;

use crate::config::PredicateConfig;
use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*` or `{name}`
    One,
    /// `**`
    Many,
}

/// Wildcard pattern over separator-delimited segments
///
/// Empty segments in both pattern and input are ignored, so `/a//b/` and
/// `/a/b` are the same path.
#[derive(Debug, Clone)]
pub struct SegmentPattern {
    raw: String,
    separator: char,
    ignore_case: bool,
    segments: Vec<Segment>,
}

impl SegmentPattern {
    pub fn path(pattern: &str) -> Self {
        Self::parse(pattern, '/', false)
    }

    pub fn host(pattern: &str) -> Self {
        Self::parse(pattern, '.', true)
    }

    fn parse(pattern: &str, separator: char, ignore_case: bool) -> Self {
        let segments = pattern
            .split(separator)
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "**" => Segment::Many,
                "*" => Segment::One,
                s if s.starts_with('{') && s.ends_with('}') && s.len() > 2 => Segment::One,
                s if ignore_case => Segment::Literal(s.to_ascii_lowercase()),
                s => Segment::Literal(s.to_string()),
            })
            .collect();

        Self {
            raw: pattern.to_string(),
            separator,
            ignore_case,
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, input: &str) -> bool {
        let parts: Vec<&str> = input
            .split(self.separator)
            .filter(|s| !s.is_empty())
            .collect();
        match_segments(&self.segments, &parts, self.ignore_case)
    }
}

/// Matches in O(pattern * path) however many `**` segments the pattern has
fn match_segments(pattern: &[Segment], parts: &[&str], ignore_case: bool) -> bool {
    // reachable[i]: the pattern consumed so far matches exactly parts[..i]
    let mut reachable = vec![false; parts.len() + 1];
    reachable[0] = true;

    for segment in pattern {
        let mut next = vec![false; parts.len() + 1];
        match segment {
            Segment::Many => {
                let mut seen = false;
                for (i, slot) in next.iter_mut().enumerate() {
                    seen |= reachable[i];
                    *slot = seen;
                }
            }
            _ => {
                for (i, part) in parts.iter().enumerate() {
                    if reachable[i] && segment_matches(segment, part, ignore_case) {
                        next[i + 1] = true;
                    }
                }
            }
        }
        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }

    reachable[parts.len()]
}

fn segment_matches(segment: &Segment, part: &str, ignore_case: bool) -> bool {
    match segment {
        Segment::Literal(lit) if ignore_case => lit.eq_ignore_ascii_case(part),
        Segment::Literal(lit) => lit == part,
        Segment::One | Segment::Many => true,
    }
}

/// Compiled request predicate
#[derive(Debug, Clone)]
pub enum Predicate {
    Path(SegmentPattern),
    Method(Vec<Method>),
    Header {
        name: HeaderName,
        pattern: Option<Regex>,
    },
    Host(SegmentPattern),
}

impl Predicate {
    pub fn compile(config: &PredicateConfig) -> GatewayResult<Self> {
        match config {
            PredicateConfig::Path { pattern } => Ok(Predicate::Path(SegmentPattern::path(pattern))),
            PredicateConfig::Method { methods } => {
                let methods = methods
                    .iter()
                    .map(|m| {
                        Method::from_str(&m.to_ascii_uppercase()).map_err(|e| {
                            GatewayError::config(format!("Invalid method '{}': {}", m, e))
                        })
                    })
                    .collect::<GatewayResult<Vec<_>>>()?;
                Ok(Predicate::Method(methods))
            }
            PredicateConfig::Header { name, pattern } => {
                let name = HeaderName::from_str(name).map_err(|e| {
                    GatewayError::config(format!("Invalid header name '{}': {}", name, e))
                })?;
                let pattern = pattern
                    .as_deref()
                    .map(|p| {
                        Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                            GatewayError::config(format!("Invalid header regex '{}': {}", p, e))
                        })
                    })
                    .transpose()?;
                Ok(Predicate::Header { name, pattern })
            }
            PredicateConfig::Host { pattern } => Ok(Predicate::Host(SegmentPattern::host(pattern))),
        }
    }

    pub fn matches<B>(&self, req: &Request<B>) -> bool {
        match self {
            Predicate::Path(pattern) => pattern.matches(req.uri().path()),
            Predicate::Method(methods) => methods.contains(req.method()),
            Predicate::Header { name, pattern } => {
                let mut values = req.headers().get_all(name).iter().peekable();
                match pattern {
                    None => values.peek().is_some(),
                    Some(regex) => values
                        .filter_map(|v| v.to_str().ok())
                        .any(|v| regex.is_match(v)),
                }
            }
            Predicate::Host(pattern) => request_host(req).is_some_and(|host| pattern.matches(host)),
        }
    }
}

/// Host of the request without port, from `Host` or the URI authority (HTTP/2)
pub fn request_host<B>(req: &Request<B>) -> Option<&str> {
    let raw = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))?;
    Some(strip_port(raw))
}

fn strip_port(authority: &str) -> &str {
    // Bracketed IPv6 literal
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Body;

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap() // OK in tests - valid request
    }

    #[test]
    fn test_path_patterns() {
        let p = SegmentPattern::path("/api/v1/students/**");
        assert!(p.matches("/api/v1/students"));
        assert!(p.matches("/api/v1/students/42"));
        assert!(p.matches("/api/v1/students/42/grades"));
        assert!(!p.matches("/api/v1/teachers/1"));
        assert!(!p.matches("/api/v1/Students/1"));

        let p = SegmentPattern::path("/api/{version}/classes/*");
        assert!(p.matches("/api/v2/classes/7"));
        assert!(!p.matches("/api/v2/classes"));
        assert!(!p.matches("/api/v2/classes/7/students"));

        let p = SegmentPattern::path("/**/health");
        assert!(p.matches("/health"));
        assert!(p.matches("/a/b/health"));
        assert!(!p.matches("/a/b/healthz"));
    }

    #[test]
    fn test_many_double_wildcards_on_long_path() {
        let p = SegmentPattern::path("/**/a/**/b/**/c/**/d/**/e/**/z");
        let long: String = "/a/b/c/d/e".repeat(40);
        assert!(!p.matches(&long));
        assert!(p.matches(&format!("{}/z", long)));
        assert!(p.matches("/x/a/b/y/c/d/e/z"));
    }

    #[test]
    fn test_empty_segments_ignored() {
        let p = SegmentPattern::path("/api/v1/grades");
        assert!(p.matches("/api//v1/grades/"));
        assert!(SegmentPattern::path("/**").matches("/"));
        assert!(SegmentPattern::path("/").matches("/"));
        assert!(!SegmentPattern::path("/").matches("/x"));
    }

    #[test]
    fn test_host_patterns() {
        let p = SegmentPattern::host("*.distrischool.edu");
        assert!(p.matches("api.DistriSchool.edu"));
        assert!(!p.matches("distrischool.edu"));
        assert!(!p.matches("a.b.distrischool.edu"));
        assert!(SegmentPattern::host("**.distrischool.edu").matches("a.b.distrischool.edu"));
    }

    #[test]
    fn test_host_predicate_ignores_port() {
        let predicate = Predicate::compile(&PredicateConfig::Host {
            pattern: "gateway.local".to_string(),
        })
        .unwrap();

        let mut req = request("GET", "/");
        req.headers_mut()
            .insert(HOST, "Gateway.Local:8080".parse().unwrap());
        assert!(predicate.matches(&req));

        // HTTP/2 style authority without Host header
        let req = request("GET", "http://gateway.local:8443/x");
        assert!(predicate.matches(&req));

        assert!(!predicate.matches(&request("GET", "/")));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:80"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "::1");
    }

    #[test]
    fn test_method_predicate() {
        let predicate = Predicate::compile(&PredicateConfig::Method {
            methods: vec!["get".to_string(), "POST".to_string()],
        })
        .unwrap();
        assert!(predicate.matches(&request("GET", "/")));
        assert!(predicate.matches(&request("POST", "/")));
        assert!(!predicate.matches(&request("DELETE", "/")));
    }

    #[test]
    fn test_header_predicate() {
        let presence = Predicate::compile(&PredicateConfig::Header {
            name: "X-Tenant".to_string(),
            pattern: None,
        })
        .unwrap();
        let regex = Predicate::compile(&PredicateConfig::Header {
            name: "x-tenant".to_string(),
            pattern: Some("school-\\d+".to_string()),
        })
        .unwrap();

        let mut req = request("GET", "/");
        assert!(!presence.matches(&req));

        req.headers_mut()
            .insert("x-tenant", "school-12".parse().unwrap());
        assert!(presence.matches(&req));
        assert!(regex.matches(&req));

        // Full match only
        req.headers_mut()
            .insert("x-tenant", "school-12-extra".parse().unwrap());
        assert!(!regex.matches(&req));
    }

    #[test]
    fn test_invalid_predicates() {
        assert!(Predicate::compile(&PredicateConfig::Header {
            name: "x".to_string(),
            pattern: Some("(".to_string()),
        })
        .is_err());
        assert!(Predicate::compile(&PredicateConfig::Header {
            name: "bad header".to_string(),
            pattern: None,
        })
        .is_err());
        assert!(Predicate::compile(&PredicateConfig::Method {
            methods: vec!["G E T".to_string()],
        })
        .is_err());
    }
}
