use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::balancer::BackendInstance;
use crate::config::ProxyConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::filters::ExchangeInfo;
use crate::monitoring::{GatewayEvent, SharedEventSink};

type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_REQUEST_ID: &str = "x-request-id";

const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Pooled upstream client (HTTP/HTTPS via rustls)
///
/// - One client per gateway, reused across requests and reloads
/// - Connect timeout on the connector, read timeout on the response headers
/// - Bodies are streamed in both directions
/// - Every outcome is reported to the backend's circuit
pub struct ProxyClient {
    client: HttpsClient,
    read_timeout: Duration,
    events: SharedEventSink,
}

impl ProxyClient {
    pub fn new(config: &ProxyConfig, events: SharedEventSink) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false); // allow https URIs through the rustls wrapper
        http.set_nodelay(true);
        http.set_connect_timeout(Some(config.connect_timeout()));

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let client = Client::builder()
            .pool_idle_timeout(config.pool_idle_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build::<_, Body>(https);

        Self {
            client,
            read_timeout: config.read_timeout(),
            events,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Send `req` to `instance` and hand back the streamed response
    pub async fn forward(
        &self,
        req: Request<Body>,
        instance: &BackendInstance,
        info: &ExchangeInfo,
    ) -> GatewayResult<Response<Body>> {
        let target = instance.address();

        // Open circuit: fail fast without touching the network
        let permit = instance.circuit().try_acquire()?;

        let upstream_req = build_upstream_request(req, instance, info)?;
        debug!(
            request_id = %info.request_id,
            backend = %target,
            uri = %upstream_req.uri(),
            probe = permit.is_probe(),
            "Forwarding request"
        );

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.read_timeout, self.client.request(upstream_req)).await;
        let latency = started.elapsed();
        instance.record_latency(latency);

        let result = match outcome {
            Err(_) => {
                permit.failure();
                warn!(
                    request_id = %info.request_id,
                    backend = %target,
                    timeout_ms = self.read_timeout.as_millis() as u64,
                    "Upstream timed out"
                );
                Err(GatewayError::upstream_timeout(&target, self.read_timeout))
            }
            Ok(Err(e)) => {
                permit.failure();
                warn!(
                    request_id = %info.request_id,
                    backend = %target,
                    error = %e,
                    "Upstream request failed"
                );
                Err(GatewayError::upstream_unavailable(&target, e.to_string()))
            }
            Ok(Ok(resp)) => {
                if counts_as_failure(resp.status()) {
                    permit.failure();
                } else {
                    permit.success();
                }
                Ok(build_downstream_response(resp))
            }
        };

        self.events.emit(&GatewayEvent::UpstreamLatency {
            backend: target,
            latency,
            status: result.as_ref().ok().map(|r| r.status().as_u16()),
        });

        result
    }
}

/// Gateway-class upstream statuses are passed through but count against the circuit
fn counts_as_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn build_upstream_request(
    req: Request<Body>,
    instance: &BackendInstance,
    info: &ExchangeInfo,
) -> GatewayResult<Request<Body>> {
    let (mut parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let authority = instance.address();
    parts.uri = Uri::from_str(&format!(
        "{}://{}{}",
        instance.scheme(),
        authority,
        path_and_query
    ))?;

    strip_hop_by_hop_headers(&mut parts.headers);
    parts.headers.insert(HOST, HeaderValue::from_str(&authority).map_err(|e| {
        GatewayError::internal(format!("invalid upstream authority {}: {}", authority, e))
    })?);

    if let Some(client) = info.client {
        let ip = client.ip().to_string();
        let forwarded_for = match parts
            .headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            parts.headers.insert(X_FORWARDED_FOR, value);
        }
    }
    parts
        .headers
        .entry(X_FORWARDED_PROTO)
        .or_insert_with(|| HeaderValue::from_static("http"));
    if let Some(host) = &info.host {
        parts
            .headers
            .entry(X_FORWARDED_HOST)
            .or_insert_with(|| host.clone());
    }
    if let Ok(value) = HeaderValue::from_str(&info.request_id) {
        parts.headers.entry(X_REQUEST_ID).or_insert(value);
    }

    // Outbound version is negotiated by the connector
    parts.version = hyper::Version::HTTP_11;

    Ok(Request::from_parts(parts, body))
}

fn build_downstream_response(upstream: Response<Body>) -> Response<Body> {
    let (mut parts, body) = upstream.into_parts();
    strip_hop_by_hop_headers(&mut parts.headers);
    Response::from_parts(parts, body)
}

fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    // Headers named by Connection are hop-by-hop too
    let listed: Vec<HeaderName> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}
