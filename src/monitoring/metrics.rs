use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use super::events::{EventSink, FilterDecision, GatewayEvent};

const LATENCY_BUCKETS_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Default sink: `metrics` series plus `tracing` output
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl EventSink for MetricsSink {
    fn emit(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::RouteMatched {
                request_id,
                route_id,
                table_version,
            } => {
                metrics::counter!(
                    "gateway_route_matched_total",
                    &[("route", route_id.clone())]
                )
                .increment(1);
                debug!(
                    request_id = %request_id,
                    route = %route_id,
                    table_version = table_version,
                    "Route matched"
                );
            }
            GatewayEvent::FilterOutcome {
                request_id,
                route_id,
                filter,
                decision,
            } => {
                if *decision != FilterDecision::Continue {
                    metrics::counter!(
                        "gateway_filter_terminal_total",
                        &[
                            ("route", route_id.clone()),
                            ("filter", filter.to_string()),
                            ("decision", decision.as_str().to_string()),
                        ]
                    )
                    .increment(1);
                }
                debug!(
                    request_id = %request_id,
                    route = %route_id,
                    filter = filter,
                    decision = decision.as_str(),
                    "Filter outcome"
                );
            }
            GatewayEvent::BackendPicked {
                request_id,
                service,
                backend,
                policy,
            } => {
                metrics::counter!(
                    "gateway_backend_picked_total",
                    &[("service", service.clone()), ("backend", backend.clone())]
                )
                .increment(1);
                debug!(
                    request_id = %request_id,
                    service = %service,
                    backend = %backend,
                    policy = policy,
                    "Backend picked"
                );
            }
            GatewayEvent::CircuitTransition { backend, to, .. } => {
                metrics::counter!(
                    "gateway_circuit_transitions_total",
                    &[("backend", backend.clone()), ("to", to.to_string())]
                )
                .increment(1);
            }
            GatewayEvent::UpstreamLatency {
                backend,
                latency,
                status,
            } => {
                metrics::histogram!(
                    "gateway_upstream_latency_seconds",
                    &[("backend", backend.clone())]
                )
                .record(latency.as_secs_f64());
                if status.is_none() {
                    metrics::counter!(
                        "gateway_upstream_errors_total",
                        &[("backend", backend.clone())]
                    )
                    .increment(1);
                }
            }
            GatewayEvent::RequestCompleted {
                request_id,
                route_id,
                method,
                path,
                status,
                latency,
            } => {
                let route = route_id.clone().unwrap_or_else(|| "-".to_string());
                metrics::counter!(
                    "gateway_requests_total",
                    &[("route", route.clone()), ("status", status.to_string())]
                )
                .increment(1);
                metrics::histogram!("gateway_request_duration_seconds", &[("route", route.clone())])
                    .record(latency.as_secs_f64());
                info!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    route = %route,
                    status = status,
                    latency_ms = latency.as_millis() as u64,
                    "Request completed"
                );
            }
            GatewayEvent::TablePublished { version, routes } => {
                metrics::gauge!("gateway_route_table_version").set(*version as f64);
                metrics::gauge!("gateway_routes").set(*routes as f64);
                info!(version = version, routes = routes, "Route table published");
            }
            GatewayEvent::ReloadRejected { reason } => {
                metrics::counter!("gateway_reload_rejected_total").increment(1);
                warn!(reason = %reason, "Configuration reload rejected");
            }
        }
    }
}

/// Install the global Prometheus recorder with its own HTTP listener
pub fn install_prometheus_exporter(bind: SocketAddr) -> Result<()> {
    let builder = PrometheusBuilder::new()
        .with_http_listener(bind)
        .set_buckets_for_metric(
            Matcher::Suffix("_seconds".to_string()),
            LATENCY_BUCKETS_SECONDS,
        )
        .context("invalid histogram buckets")?;

    builder
        .install()
        .with_context(|| format!("failed to install Prometheus exporter on {}", bind))?;

    info!("Prometheus metrics exporter listening on {}", bind);
    Ok(())
}
