use hyper::Request;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::predicate::Predicate;
use super::route::{Destination, Route};
use crate::balancer::{BackendInstance, LoadBalancer};
use crate::circuit_breaker::CircuitRegistry;
use crate::config::{FilterConfig, GatewayConfig, UriTarget};
use crate::error::{GatewayError, GatewayResult};
use crate::filters::{Filter, VerifierRegistry};

/// Shared state a table build wires routes into
pub struct BuildContext<'a> {
    pub circuits: &'a CircuitRegistry,
    pub verifiers: &'a VerifierRegistry,
}

struct CompiledRoute {
    id: String,
    priority: i32,
    order: usize,
    predicates: Vec<Predicate>,
    filters: Vec<Filter>,
    target: UriTarget,
}

/// One published version of the routing configuration
///
/// Immutable once built; a reload builds a new table.
#[derive(Debug)]
pub struct RouteTable {
    version: u64,
    routes: Vec<Arc<Route>>,
    pools: BTreeMap<String, Arc<LoadBalancer>>,
    static_backends: BTreeMap<String, Arc<BackendInstance>>,
}

impl RouteTable {
    /// Table with no routes; every lookup misses
    pub fn empty() -> Self {
        Self {
            version: 0,
            routes: Vec::new(),
            pools: BTreeMap::new(),
            static_backends: BTreeMap::new(),
        }
    }

    /// Compile `config` into a table carrying `version`
    ///
    /// Everything that can fail is compiled before any circuit is touched.
    pub fn build(config: &GatewayConfig, version: u64, ctx: &BuildContext<'_>) -> GatewayResult<Self> {
        config.validate()?;

        let default_filters = &config.default_filters;
        let compiled = config
            .routes
            .iter()
            .enumerate()
            .map(|(order, route)| {
                let predicates = route
                    .predicates
                    .iter()
                    .map(Predicate::compile)
                    .collect::<GatewayResult<Vec<_>>>()
                    .map_err(|e| in_route(&route.id, e))?;
                let filters = compile_filters(default_filters.iter().chain(&route.filters), ctx.verifiers)
                    .map_err(|e| in_route(&route.id, e))?;
                Ok(CompiledRoute {
                    id: route.id.clone(),
                    priority: route.priority,
                    order,
                    predicates,
                    filters,
                    target: route.target()?,
                })
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        let breaker_config = &config.circuit_breaker;
        let pools: BTreeMap<String, Arc<LoadBalancer>> = config
            .services
            .iter()
            .map(|(name, service)| {
                let instances = service
                    .instances
                    .iter()
                    .map(|i| {
                        let circuit = ctx.circuits.get_or_create(&i.address(), breaker_config);
                        Arc::new(BackendInstance::new(
                            i.scheme.clone(),
                            i.host.clone(),
                            i.port,
                            i.weight,
                            circuit,
                        ))
                    })
                    .collect();
                (
                    name.clone(),
                    Arc::new(LoadBalancer::new(name.clone(), service.load_balancing, instances)),
                )
            })
            .collect();

        let mut static_backends: BTreeMap<String, Arc<BackendInstance>> = BTreeMap::new();
        let mut routes = Vec::with_capacity(compiled.len());
        for route in compiled {
            let destination = match route.target {
                UriTarget::Service(service) => {
                    let pool = pools.get(&service).ok_or_else(|| {
                        GatewayError::config(format!(
                            "Route '{}' references unknown service '{}'",
                            route.id, service
                        ))
                    })?;
                    Destination::Service(Arc::clone(pool))
                }
                UriTarget::Static { scheme, host, port } => {
                    let address = format!("{}:{}", host, port);
                    let instance = static_backends.entry(address.clone()).or_insert_with(|| {
                        let circuit = ctx.circuits.get_or_create(&address, breaker_config);
                        Arc::new(BackendInstance::new(scheme, host, port, 1, circuit))
                    });
                    Destination::Static(Arc::clone(instance))
                }
            };
            routes.push(Arc::new(Route::new(
                route.id,
                route.priority,
                route.order,
                route.predicates,
                destination,
                route.filters,
            )));
        }

        // Stable: equal priorities keep declaration order
        routes.sort_by_key(|r| r.priority());

        debug!(version = version, routes = routes.len(), pools = pools.len(), "Route table built");

        Ok(Self {
            version,
            routes,
            pools,
            static_backends,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn pools(&self) -> &BTreeMap<String, Arc<LoadBalancer>> {
        &self.pools
    }

    pub fn static_backends(&self) -> &BTreeMap<String, Arc<BackendInstance>> {
        &self.static_backends
    }

    /// Addresses of every backend this table can send to
    pub fn backend_addresses(&self) -> HashSet<String> {
        self.pools
            .values()
            .flat_map(|pool| pool.instances().iter().map(|i| i.address()))
            .chain(self.static_backends.keys().cloned())
            .collect()
    }

    /// Every matching route, best first
    pub fn lookup<B>(&self, req: &Request<B>) -> Vec<Arc<Route>> {
        self.routes
            .iter()
            .filter(|route| route.matches(req))
            .cloned()
            .collect()
    }

    /// Best matching route
    pub fn find<B>(&self, req: &Request<B>) -> GatewayResult<Arc<Route>> {
        self.routes
            .iter()
            .find(|route| route.matches(req))
            .cloned()
            .ok_or_else(|| GatewayError::no_route_matched(req.method().as_str(), req.uri().path()))
    }
}

fn compile_filters<'a>(
    configs: impl Iterator<Item = &'a FilterConfig>,
    verifiers: &VerifierRegistry,
) -> GatewayResult<Vec<Filter>> {
    configs.map(|c| Filter::compile(c, verifiers)).collect()
}

fn in_route(route_id: &str, err: GatewayError) -> GatewayError {
    match err {
        GatewayError::ConfigurationInvalid { message } => {
            GatewayError::config(format!("Route '{}': {}", route_id, message))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::NoopSink;
    use hyper::Body;

    fn build(toml: &str) -> GatewayResult<RouteTable> {
        let config = GatewayConfig::from_toml_str(toml)?;
        let circuits = CircuitRegistry::new(Arc::new(NoopSink));
        let verifiers = VerifierRegistry::new().with_configured(&config.verifiers);
        RouteTable::build(
            &config,
            1,
            &BuildContext {
                circuits: &circuits,
                verifiers: &verifiers,
            },
        )
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap() // OK in tests - valid request
    }

    const TABLE: &str = r#"
[services.students]
instances = [{ host = "127.0.0.1", port = 8081 }, { host = "127.0.0.1", port = 8091 }]

[[routes]]
id = "catch-all"
uri = "http://127.0.0.1:9999"
priority = 100
predicates = [{ type = "path", pattern = "/**" }]

[[routes]]
id = "students"
uri = "lb://students"
priority = 10
predicates = [{ type = "path", pattern = "/api/v1/students/**" }]

[[routes]]
id = "students-shadow"
uri = "http://127.0.0.1:8081"
priority = 10
predicates = [{ type = "path", pattern = "/api/v1/students/**" }]

[[routes]]
id = "admin"
uri = "http://127.0.0.1:9999"
priority = 1
predicates = [
    { type = "path", pattern = "/api/v1/students/admin" },
    { type = "method", methods = ["DELETE"] },
]
"#;

    #[test]
    fn test_lower_priority_wins_ties_keep_order() {
        let table = build(TABLE).unwrap();

        let candidates: Vec<String> = table
            .lookup(&get("/api/v1/students/7"))
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(candidates, vec!["students", "students-shadow", "catch-all"]);
        assert_eq!(table.find(&get("/api/v1/students/7")).unwrap().id(), "students");
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let table = build(TABLE).unwrap();
        assert_eq!(table.find(&get("/api/v1/students/admin")).unwrap().id(), "students");

        let delete = Request::builder()
            .method("DELETE")
            .uri("/api/v1/students/admin")
            .body(Body::empty())
            .unwrap();
        assert_eq!(table.find(&delete).unwrap().id(), "admin");
    }

    #[test]
    fn test_no_route_matched() {
        let table = build(
            r#"
[[routes]]
id = "only"
uri = "http://127.0.0.1:1"
predicates = [{ type = "path", pattern = "/api/**" }]
"#,
        )
        .unwrap();

        let err = table.find(&get("/other")).unwrap_err();
        assert!(matches!(err, GatewayError::NoRouteMatched { ref path, .. } if path == "/other"));
        assert!(RouteTable::empty().find(&get("/")).is_err());
    }

    #[test]
    fn test_destinations_and_backends() {
        let table = build(TABLE).unwrap();
        assert_eq!(table.pools().len(), 1);
        // Two static routes share one backend
        assert_eq!(table.static_backends().len(), 2);

        let addresses = table.backend_addresses();
        assert!(addresses.contains("127.0.0.1:8081"));
        assert!(addresses.contains("127.0.0.1:8091"));
        assert!(addresses.contains("127.0.0.1:9999"));
        assert_eq!(addresses.len(), 3);
    }

    #[test]
    fn test_default_filters_prepended() {
        let table = build(
            r#"
[[default_filters]]
type = "cors"
allowed_origins = ["*"]

[[routes]]
id = "grades"
uri = "http://127.0.0.1:8083"
filters = [{ type = "retry", retries = 1 }]
"#,
        )
        .unwrap();

        let route = table.find(&get("/anything")).unwrap();
        let names: Vec<&str> = route.filters().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["cors", "retry"]);
        assert_eq!(route.retry_policy().map(|p| p.retries()), Some(1));
    }

    #[test]
    fn test_compile_errors_are_configuration_invalid() {
        let bad_regex = build(
            r#"
[[routes]]
id = "r"
uri = "http://127.0.0.1:1"
predicates = [{ type = "header", name = "x", pattern = "(" }]
"#,
        );
        assert!(matches!(bad_regex, Err(GatewayError::ConfigurationInvalid { .. })));

        let unknown_verifier = build(
            r#"
[[routes]]
id = "r"
uri = "http://127.0.0.1:1"
filters = [{ type = "auth", scheme = "bearer", verifier = "nobody" }]
"#,
        );
        assert!(matches!(unknown_verifier, Err(GatewayError::ConfigurationInvalid { .. })));
    }
}
