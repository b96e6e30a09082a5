use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::circuit_breaker::{CircuitBreaker, HealthState};

const NO_LATENCY: u64 = u64::MAX;

/// One concrete network endpoint of a service
///
/// Health is never stored here: it is read from the circuit, which is the
/// only writer.
pub struct BackendInstance {
    scheme: String,
    host: String,
    port: u16,
    weight: u32,
    circuit: Arc<CircuitBreaker>,
    in_flight: AtomicUsize,
    last_latency_ms: AtomicU64,
}

impl fmt::Debug for BackendInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendInstance")
            .field("address", &self.address())
            .field("scheme", &self.scheme)
            .field("weight", &self.weight)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl BackendInstance {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        weight: u32,
        circuit: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            weight,
            circuit,
            in_flight: AtomicUsize::new(0),
            last_latency_ms: AtomicU64::new(NO_LATENCY),
        }
    }

    /// `host:port`, also the circuit registry key
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    pub fn health(&self) -> HealthState {
        self.circuit.health()
    }

    pub fn health_at(&self, now: Instant) -> HealthState {
        self.circuit.health_at(now)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn last_latency(&self) -> Option<Duration> {
        match self.last_latency_ms.load(Ordering::Relaxed) {
            NO_LATENCY => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn record_latency(&self, latency: Duration) {
        let ms = (latency.as_millis() as u64).min(NO_LATENCY - 1);
        self.last_latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Count a request against this instance until the guard is dropped
    pub fn acquire(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            instance: Arc::clone(self),
        }
    }
}

/// Keeps the instance's in-flight counter raised while alive
///
/// Dropped on success, failure and cancellation alike.
#[derive(Debug)]
pub struct InFlightGuard {
    instance: Arc<BackendInstance>,
}

impl InFlightGuard {
    pub fn instance(&self) -> &Arc<BackendInstance> {
        &self.instance
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.instance.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
pub(crate) fn test_instance(host: &str, port: u16, weight: u32) -> Arc<BackendInstance> {
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::monitoring::NoopSink;

    let circuit = Arc::new(CircuitBreaker::new(
        format!("{}:{}", host, port),
        CircuitBreakerConfig::default(),
        Arc::new(NoopSink),
    ));
    Arc::new(BackendInstance::new("http", host, port, weight, circuit))
}
