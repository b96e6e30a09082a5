use crate::circuit_breaker::CircuitState;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of one filter phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Continue,
    ShortCircuit,
    Rejected,
}

impl FilterDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterDecision::Continue => "continue",
            FilterDecision::ShortCircuit => "short_circuit",
            FilterDecision::Rejected => "rejected",
        }
    }
}

/// Structured observations emitted by the gateway core
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    RouteMatched {
        request_id: String,
        route_id: String,
        table_version: u64,
    },
    FilterOutcome {
        request_id: String,
        route_id: String,
        filter: &'static str,
        decision: FilterDecision,
    },
    BackendPicked {
        request_id: String,
        service: String,
        backend: String,
        policy: &'static str,
    },
    CircuitTransition {
        backend: String,
        from: CircuitState,
        to: CircuitState,
    },
    UpstreamLatency {
        backend: String,
        latency: Duration,
        status: Option<u16>,
    },
    RequestCompleted {
        request_id: String,
        route_id: Option<String>,
        method: String,
        path: String,
        status: u16,
        latency: Duration,
    },
    TablePublished {
        version: u64,
        routes: usize,
    },
    ReloadRejected {
        reason: String,
    },
}

impl GatewayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::RouteMatched { .. } => "route_matched",
            GatewayEvent::FilterOutcome { .. } => "filter_outcome",
            GatewayEvent::BackendPicked { .. } => "backend_picked",
            GatewayEvent::CircuitTransition { .. } => "circuit_transition",
            GatewayEvent::UpstreamLatency { .. } => "upstream_latency",
            GatewayEvent::RequestCompleted { .. } => "request_completed",
            GatewayEvent::TablePublished { .. } => "table_published",
            GatewayEvent::ReloadRejected { .. } => "reload_rejected",
        }
    }
}

/// Receiver of gateway events
///
/// Called inline on the request path, so implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GatewayEvent);
}

pub type SharedEventSink = Arc<dyn EventSink>;

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &GatewayEvent) {}
}

/// Keeps every event in memory, mostly useful in tests
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<GatewayEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn circuit_transitions(&self) -> Vec<(String, CircuitState, CircuitState)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GatewayEvent::CircuitTransition { backend, from, to } => Some((backend, from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &GatewayEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
