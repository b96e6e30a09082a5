use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::balancer::BackendInstance;
use crate::circuit_breaker::{CircuitSnapshot, HealthState};
use crate::routing::RouteTable;

/// Overall status, Spring Actuator style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    /// Every backend healthy
    Up,
    /// Some backend suspected or unhealthy, every pool still has a candidate
    Degraded,
    /// At least one service pool has no eligible instance
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendReport {
    pub address: String,
    pub scheme: String,
    pub weight: u32,
    pub in_flight: usize,
    pub last_latency_ms: Option<u64>,
    pub circuit: CircuitSnapshot,
}

impl BackendReport {
    fn of(instance: &BackendInstance) -> Self {
        Self {
            address: instance.address(),
            scheme: instance.scheme().to_string(),
            weight: instance.weight(),
            in_flight: instance.in_flight(),
            last_latency_ms: instance.last_latency().map(|l| l.as_millis() as u64),
            circuit: instance.circuit().snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub policy: &'static str,
    pub eligible: usize,
    pub instances: Vec<BackendReport>,
}

/// JSON body of the built-in health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: GatewayStatus,
    pub version: &'static str,
    pub route_table_version: u64,
    pub routes: usize,
    pub services: BTreeMap<String, ServiceReport>,
    pub static_backends: Vec<BackendReport>,
}

impl HealthReport {
    pub fn from_table(table: &RouteTable) -> Self {
        let services: BTreeMap<String, ServiceReport> = table
            .pools()
            .iter()
            .map(|(name, pool)| {
                let instances: Vec<BackendReport> =
                    pool.instances().iter().map(|i| BackendReport::of(i)).collect();
                let eligible = instances
                    .iter()
                    .filter(|i| i.circuit.health.is_eligible())
                    .count();
                (
                    name.clone(),
                    ServiceReport {
                        policy: pool.policy().as_str(),
                        eligible,
                        instances,
                    },
                )
            })
            .collect();

        let static_backends: Vec<BackendReport> = table
            .static_backends()
            .values()
            .map(|i| BackendReport::of(i))
            .collect();

        let pool_down = services
            .values()
            .any(|s| s.eligible == 0 && !s.instances.is_empty());
        let all_healthy = services
            .values()
            .flat_map(|s| s.instances.iter())
            .chain(static_backends.iter())
            .all(|b| b.circuit.health == HealthState::Healthy);

        let status = if pool_down {
            GatewayStatus::Down
        } else if all_healthy {
            GatewayStatus::Up
        } else {
            GatewayStatus::Degraded
        };

        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            route_table_version: table.version(),
            routes: table.routes().len(),
            services,
            static_backends,
        }
    }

    /// 200 unless the gateway is down, then 503
    pub fn into_response(self) -> Response<Body> {
        let status = match self.status {
            GatewayStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::OK,
        };
        let body = serde_json::to_string(&self).unwrap_or_else(|_| "{}".to_string());

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitRegistry;
    use crate::config::GatewayConfig;
    use crate::filters::VerifierRegistry;
    use crate::monitoring::NoopSink;
    use crate::routing::BuildContext;
    use std::sync::Arc;

    fn table(circuits: &CircuitRegistry) -> RouteTable {
        let config = GatewayConfig::from_toml_str(
            r#"
[circuit_breaker]
failure_threshold = 1

[services.grades]
instances = [{ host = "127.0.0.1", port = 8083 }, { host = "127.0.0.1", port = 8093 }]

[[routes]]
id = "grades"
uri = "lb://grades"

[[routes]]
id = "legacy"
uri = "http://127.0.0.1:9000"
"#,
        )
        .unwrap(); // OK in tests - valid config
        RouteTable::build(
            &config,
            4,
            &BuildContext {
                circuits,
                verifiers: &VerifierRegistry::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_all_healthy_is_up() {
        let circuits = CircuitRegistry::new(Arc::new(NoopSink));
        let report = HealthReport::from_table(&table(&circuits));

        assert_eq!(report.status, GatewayStatus::Up);
        assert_eq!(report.route_table_version, 4);
        assert_eq!(report.routes, 2);
        assert_eq!(report.services["grades"].eligible, 2);
        assert_eq!(report.static_backends.len(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "UP");
        assert_eq!(json["services"]["grades"]["policy"], "round_robin");
        assert_eq!(json["services"]["grades"]["instances"][0]["circuit"]["state"], "CLOSED");
    }

    #[test]
    fn test_open_circuit_degrades_then_downs() {
        let circuits = CircuitRegistry::new(Arc::new(NoopSink));
        let table = table(&circuits);

        let first = circuits.get("127.0.0.1:8083").unwrap();
        first.try_acquire().unwrap().failure();
        let report = HealthReport::from_table(&table);
        assert_eq!(report.status, GatewayStatus::Degraded);
        assert_eq!(report.into_response().status(), StatusCode::OK);

        let second = circuits.get("127.0.0.1:8093").unwrap();
        second.try_acquire().unwrap().failure();
        let report = HealthReport::from_table(&table);
        assert_eq!(report.status, GatewayStatus::Down);
        assert_eq!(report.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
