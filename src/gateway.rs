use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::circuit_breaker::CircuitRegistry;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::filters::{CredentialVerifier, VerifierRegistry};
use crate::monitoring::{GatewayEvent, SharedEventSink};
use crate::proxy::ProxyClient;
use crate::routing::{BuildContext, RouteTable};

/// Everything a request needs, owned explicitly
///
/// - Active route table behind an `ArcSwap`; requests keep the `Arc` they loaded
/// - Circuit registry shared by every table version
/// - Programmatic verifiers merged with configured ones on each build
/// - Admission semaphore bounding in-flight requests
///
/// Listener address, admission limit and proxy client settings are read once
/// at construction; a reload only republishes routes, services and filters.
pub struct Gateway {
    table: ArcSwap<RouteTable>,
    reload_lock: Mutex<()>,
    circuits: CircuitRegistry,
    verifiers: RwLock<VerifierRegistry>,
    proxy: ProxyClient,
    events: SharedEventSink,
    admission: Arc<Semaphore>,
    max_in_flight: usize,
    health_path: String,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, events: SharedEventSink) -> GatewayResult<Self> {
        Self::with_verifiers(config, events, VerifierRegistry::new())
    }

    /// Build the first table (version 1); any error aborts startup
    pub fn with_verifiers(
        config: &GatewayConfig,
        events: SharedEventSink,
        verifiers: VerifierRegistry,
    ) -> GatewayResult<Self> {
        let circuits = CircuitRegistry::new(Arc::clone(&events));
        let table = build_table(config, 1, &circuits, &verifiers)?;

        let gateway = Self {
            table: ArcSwap::from_pointee(RouteTable::empty()),
            reload_lock: Mutex::new(()),
            circuits,
            verifiers: RwLock::new(verifiers),
            proxy: ProxyClient::new(&config.proxy, Arc::clone(&events)),
            events,
            admission: Arc::new(Semaphore::new(config.server.max_in_flight)),
            max_in_flight: config.server.max_in_flight,
            health_path: config.server.health_path.clone(),
        };
        gateway.publish(table);
        Ok(gateway)
    }

    /// Register a verifier for `auth` filters; used from the next reload on
    pub fn register_verifier(&self, name: impl Into<String>, verifier: Arc<dyn CredentialVerifier>) {
        self.verifiers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .register(name, verifier);
    }

    /// Snapshot of the active table
    pub fn current_table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    pub fn version(&self) -> u64 {
        self.table.load().version()
    }

    /// Build and publish a new table from `config`
    ///
    /// On failure the active table and its version stay untouched.
    pub fn reload(&self, config: &GatewayConfig) -> GatewayResult<u64> {
        let _serialized = self.reload_lock.lock().unwrap_or_else(|p| p.into_inner());
        let next = self.version() + 1;

        let verifiers = self
            .verifiers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        match build_table(config, next, &self.circuits, &verifiers) {
            Ok(table) => {
                let retained = table.backend_addresses();
                self.publish(table);
                self.circuits.retain(&retained);
                Ok(next)
            }
            Err(err) => {
                warn!(error = %err, version = self.version(), "Reload rejected, keeping current table");
                self.events.emit(&GatewayEvent::ReloadRejected {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Parse a TOML document and reload from it
    pub fn reload_from_toml(&self, content: &str) -> GatewayResult<u64> {
        match GatewayConfig::from_toml_str(content) {
            Ok(config) => self.reload(&config),
            Err(err) => {
                warn!(error = %err, "Reload rejected, configuration does not parse");
                self.events.emit(&GatewayEvent::ReloadRejected {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn publish(&self, table: RouteTable) {
        let version = table.version();
        let routes = table.routes().len();
        self.table.store(Arc::new(table));
        info!(version = version, routes = routes, "Route table published");
        self.events.emit(&GatewayEvent::TablePublished { version, routes });
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    pub fn events(&self) -> &SharedEventSink {
        &self.events
    }

    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    pub(crate) fn proxy(&self) -> &ProxyClient {
        &self.proxy
    }

    /// Admission slot for one request, or `Overloaded` when all are taken
    pub(crate) fn admit(&self) -> GatewayResult<OwnedSemaphorePermit> {
        Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| GatewayError::overloaded(self.max_in_flight))
    }
}

fn build_table(
    config: &GatewayConfig,
    version: u64,
    circuits: &CircuitRegistry,
    verifiers: &VerifierRegistry,
) -> GatewayResult<RouteTable> {
    let verifiers = verifiers.with_configured(&config.verifiers);
    RouteTable::build(
        config,
        version,
        &BuildContext {
            circuits,
            verifiers: &verifiers,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::StaticTokenVerifier;
    use crate::monitoring::MemorySink;

    const BASE: &str = r#"
[services.students]
instances = [{ host = "127.0.0.1", port = 8081 }]

[[routes]]
id = "students"
uri = "lb://students"
predicates = [{ type = "path", pattern = "/api/v1/students/**" }]
"#;

    fn gateway(sink: &Arc<MemorySink>) -> Gateway {
        let config = GatewayConfig::from_toml_str(BASE).unwrap(); // OK in tests - valid config
        Gateway::new(&config, sink.clone()).unwrap()
    }

    #[test]
    fn test_initial_table_is_version_one() {
        let sink = Arc::new(MemorySink::default());
        let gateway = gateway(&sink);

        assert_eq!(gateway.version(), 1);
        assert_eq!(gateway.current_table().routes().len(), 1);
        assert_eq!(sink.count("table_published"), 1);
    }

    #[test]
    fn test_reload_bumps_version_and_drops_stale_circuits() {
        let sink = Arc::new(MemorySink::default());
        let gateway = gateway(&sink);
        assert!(gateway.circuits().get("127.0.0.1:8081").is_some());

        let next = GatewayConfig::from_toml_str(
            r#"
[services.students]
instances = [{ host = "127.0.0.1", port = 9081 }]

[[routes]]
id = "students"
uri = "lb://students"
"#,
        )
        .unwrap();

        let held = gateway.current_table();
        assert_eq!(gateway.reload(&next).unwrap(), 2);
        assert_eq!(gateway.version(), 2);
        assert!(gateway.circuits().get("127.0.0.1:8081").is_none());
        assert!(gateway.circuits().get("127.0.0.1:9081").is_some());
        // A request holding the old table still sees it
        assert_eq!(held.version(), 1);
    }

    #[test]
    fn test_invalid_reload_keeps_active_table() {
        let sink = Arc::new(MemorySink::default());
        let gateway = gateway(&sink);

        let err = gateway
            .reload_from_toml(
                r#"
[[routes]]
id = "broken"
uri = "lb://missing"
"#,
            )
            .unwrap_err();

        assert!(matches!(err, GatewayError::ConfigurationInvalid { .. }));
        assert_eq!(gateway.version(), 1);
        assert_eq!(gateway.current_table().routes()[0].id(), "students");
        assert_eq!(sink.count("reload_rejected"), 1);

        assert!(gateway.reload_from_toml("routes = 3").is_err());
        assert_eq!(gateway.version(), 1);
        assert_eq!(sink.count("reload_rejected"), 2);
    }

    #[test]
    fn test_registered_verifier_used_on_reload() {
        let sink = Arc::new(MemorySink::default());
        let gateway = gateway(&sink);

        let with_auth = r#"
[[routes]]
id = "secure"
uri = "http://127.0.0.1:8081"
filters = [{ type = "auth", scheme = "bearer", verifier = "sso" }]
"#;
        assert!(gateway.reload_from_toml(with_auth).is_err());

        gateway.register_verifier("sso", Arc::new(StaticTokenVerifier::new("sso", ["abc"])));
        assert_eq!(gateway.reload_from_toml(with_auth).unwrap(), 2);
    }

    #[test]
    fn test_admission_is_bounded() {
        let sink = Arc::new(MemorySink::default());
        let mut config = GatewayConfig::from_toml_str(BASE).unwrap();
        config.server.max_in_flight = 1;
        let gateway = Gateway::new(&config, sink).unwrap();

        let first = gateway.admit().unwrap();
        assert!(matches!(gateway.admit(), Err(GatewayError::Overloaded { limit: 1 })));
        drop(first);
        assert!(gateway.admit().is_ok());
    }
}
