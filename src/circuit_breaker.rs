use crate::error::{GatewayError, GatewayResult};
use crate::monitoring::{GatewayEvent, SharedEventSink};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests fail fast
    Open,
    /// Cooldown elapsed, a single probe is allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Health view of a backend, derived from its circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Suspected,
    Unhealthy,
}

impl HealthState {
    /// Whether the load balancer may select an instance in this state
    pub fn is_eligible(&self) -> bool {
        matches!(self, HealthState::Healthy | HealthState::Suspected)
    }
}

/// Configuration for circuit breakers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit
    pub failure_threshold: u32,
    /// Rolling window for counting failures
    pub window_ms: u64,
    /// Cooldown after the first opening
    pub cooldown_ms: u64,
    /// Upper bound for the doubled cooldown
    pub max_cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 30_000,
            cooldown_ms: 10_000,
            max_cooldown_ms: 300_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }

    /// Cooldown after `consecutive_opens` failed probes: `cooldown * 2^n`, capped
    pub fn cooldown_for(&self, consecutive_opens: u32) -> Duration {
        let factor = 2u64.saturating_pow(consecutive_opens.min(32));
        let millis = self.cooldown_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_cooldown_ms.max(self.cooldown_ms)))
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.failure_threshold == 0 {
            return Err(GatewayError::config(
                "circuit_breaker.failure_threshold must be greater than 0",
            ));
        }
        if self.window_ms == 0 {
            return Err(GatewayError::config(
                "circuit_breaker.window_ms must be greater than 0",
            ));
        }
        if self.cooldown_ms == 0 {
            return Err(GatewayError::config(
                "circuit_breaker.cooldown_ms must be greater than 0",
            ));
        }
        if self.max_cooldown_ms < self.cooldown_ms {
            return Err(GatewayError::config(
                "circuit_breaker.max_cooldown_ms must not be below cooldown_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Inner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: VecDeque<Instant>,
    open_until: Option<Instant>,
    consecutive_opens: u32,
    probe_in_flight: bool,
}

impl Inner {
    fn prune(&mut self, now: Instant) {
        let window = self.config.window();
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures_in_window(&self, now: Instant) -> usize {
        let window = self.config.window();
        self.failures
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < window)
            .count()
    }

    fn open(&mut self, now: Instant) {
        let cooldown = self.config.cooldown_for(self.consecutive_opens);
        self.state = CircuitState::Open;
        self.open_until = Some(now + cooldown);
        self.failures.clear();
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.open_until = None;
        self.failures.clear();
        self.consecutive_opens = 0;
        self.probe_in_flight = false;
    }
}

/// Point-in-time view of a circuit, used by the health report
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub health: HealthState,
    pub failures_in_window: usize,
    pub consecutive_opens: u32,
    pub open_remaining_ms: Option<u64>,
}

/// Per-backend circuit breaker
///
/// The breaker is the only writer of a backend's health state. Callers ask
/// for a [`CallPermit`] before contacting the backend and report the outcome
/// through it.
///
/// # States
///
/// - **Closed**: calls pass; failures are counted in a rolling window
/// - **Open**: calls fail fast until the cooldown elapses
/// - **Half-Open**: one probe call is admitted; success closes the circuit,
///   failure reopens it with a doubled (capped) cooldown
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
    events: SharedEventSink,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, events: SharedEventSink) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                config,
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                open_until: None,
                consecutive_opens: 0,
                probe_in_flight: false,
            }),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain counters behind; keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the policy; current state and counters are kept
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        let mut inner = self.lock();
        if inner.config != config {
            debug!(circuit_breaker = %self.name, "Circuit breaker reconfigured");
            inner.config = config;
        }
    }

    /// Ask permission to call the backend
    pub fn try_acquire(&self) -> GatewayResult<CallPermit<'_>> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> GatewayResult<CallPermit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let ready = inner.open_until.map_or(true, |until| now >= until);
                if !ready {
                    return Err(GatewayError::upstream_unavailable(
                        &self.name,
                        "circuit open",
                    ));
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                drop(inner);
                self.notify(CircuitState::Open, CircuitState::HalfOpen);
                Ok(CallPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(GatewayError::upstream_unavailable(
                        &self.name,
                        "circuit half-open, probe in flight",
                    ));
                }
                inner.probe_in_flight = true;
                Ok(CallPermit::new(self, true))
            }
        }
    }

    fn record_success_at(&self, now: Instant, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.close();
                drop(inner);
                self.notify(CircuitState::HalfOpen, CircuitState::Closed);
            }
            CircuitState::Closed => inner.prune(now),
            // Late outcome of a call admitted before the last transition
            _ => {}
        }
    }

    fn record_failure_at(&self, now: Instant, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.prune(now);
                inner.failures.push_back(now);
                let failures = inner.failures.len();
                debug!(
                    circuit_breaker = %self.name,
                    failures = failures,
                    threshold = inner.config.failure_threshold,
                    "Circuit breaker recorded failure"
                );
                if failures >= inner.config.failure_threshold as usize {
                    inner.open(now);
                    drop(inner);
                    self.notify(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.consecutive_opens = inner.consecutive_opens.saturating_add(1);
                inner.open(now);
                drop(inner);
                self.notify(CircuitState::HalfOpen, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Stored state; an elapsed cooldown is only applied when a call asks for a permit
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn health(&self) -> HealthState {
        self.health_at(Instant::now())
    }

    pub fn health_at(&self, now: Instant) -> HealthState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                if inner.failures_in_window(now) == 0 {
                    HealthState::Healthy
                } else {
                    HealthState::Suspected
                }
            }
            CircuitState::Open => match inner.open_until {
                Some(until) if now < until => HealthState::Unhealthy,
                _ => HealthState::Suspected,
            },
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    HealthState::Unhealthy
                } else {
                    HealthState::Suspected
                }
            }
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        let health = self.health_at(now);
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            health,
            failures_in_window: inner.failures_in_window(now),
            consecutive_opens: inner.consecutive_opens,
            open_remaining_ms: inner
                .open_until
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
        }
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(
                circuit_breaker = %self.name,
                from = %from,
                "Circuit breaker opened"
            ),
            _ => info!(
                circuit_breaker = %self.name,
                from = %from,
                to = %to,
                "Circuit breaker transitioned"
            ),
        }
        self.events.emit(&GatewayEvent::CircuitTransition {
            backend: self.name.clone(),
            from,
            to,
        });
    }
}

/// Permission to call a backend once
///
/// Must be resolved with [`CallPermit::success`] or [`CallPermit::failure`].
/// Dropping an unresolved probe permit (cancelled request) frees the probe slot
/// without counting an outcome.
#[must_use = "report the call outcome through the permit"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(self) {
        self.success_at(Instant::now());
    }

    pub fn failure(self) {
        self.failure_at(Instant::now());
    }

    pub fn success_at(mut self, now: Instant) {
        self.resolved = true;
        self.breaker.record_success_at(now, self.probe);
    }

    pub fn failure_at(mut self, now: Instant) {
        self.resolved = true;
        self.breaker.record_failure_at(now, self.probe);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.resolved {
            self.breaker.release_probe();
        }
    }
}

/// Circuits keyed by backend address
///
/// Lives in the gateway context, so circuit state survives route table reloads.
pub struct CircuitRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    events: SharedEventSink,
}

impl CircuitRegistry {
    pub fn new(events: SharedEventSink) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the breaker for `address`, creating it or applying the new policy
    pub fn get_or_create(&self, address: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(existing) = breakers.get(address) {
            existing.reconfigure(config.clone());
            return Arc::clone(existing);
        }
        let breaker = Arc::new(CircuitBreaker::new(
            address,
            config.clone(),
            Arc::clone(&self.events),
        ));
        breakers.insert(address.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn get(&self, address: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().get(address).cloned()
    }

    /// Drop breakers for backends that are no longer referenced
    pub fn retain(&self, addresses: &HashSet<String>) {
        let mut breakers = self.lock();
        let before = breakers.len();
        breakers.retain(|address, _| addresses.contains(address));
        let removed = before - breakers.len();
        if removed > 0 {
            debug!(removed = removed, "Dropped circuits of removed backends");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
