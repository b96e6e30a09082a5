use hyper::header::HeaderName;
use hyper::{Body, Request};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{ExchangeInfo, FilterResult};
use crate::error::{GatewayError, GatewayResult};

/// Upper bound on tracked buckets
const MAX_BUCKETS: usize = 10_000;

/// Least recently touched buckets dropped at once when idle eviction is not enough
const EVICT_BATCH: usize = MAX_BUCKETS / 10;

/// Longest retry-after hint handed out
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Shared bucket for requests whose key cannot be resolved
const MISSING_KEY: &str = "-";

/// Where the rate limit key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolver {
    ClientIp,
    Route,
    Header(HeaderName),
}

impl KeyResolver {
    pub fn parse(resolver: &str) -> GatewayResult<Self> {
        match resolver {
            "client_ip" => Ok(KeyResolver::ClientIp),
            "route" => Ok(KeyResolver::Route),
            other => {
                let name = other
                    .strip_prefix("header:")
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        GatewayError::config(format!("Unknown rate limit key resolver '{}'", resolver))
                    })?;
                let name = HeaderName::from_str(name).map_err(|e| {
                    GatewayError::config(format!("Invalid rate limit header '{}': {}", name, e))
                })?;
                Ok(KeyResolver::Header(name))
            }
        }
    }

    pub fn resolve(&self, req: &Request<Body>, info: &ExchangeInfo) -> String {
        let value = match self {
            KeyResolver::ClientIp => info.client.map(|addr| addr.ip().to_string()),
            KeyResolver::Route => return info.route_id.clone(),
            KeyResolver::Header(name) => req
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(String::from),
        };
        format!(
            "{}:{}",
            info.route_id,
            value.unwrap_or_else(|| MISSING_KEY.to_string())
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct RateState {
    tokens: f64,
    last: Instant,
}

/// Token buckets keyed by string
///
/// Tokens are taken at admission and never given back.
#[derive(Debug)]
pub struct RateLimiter {
    replenish_rate: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, RateState>>,
}

impl RateLimiter {
    pub fn new(replenish_rate: f64, burst_capacity: u32) -> Self {
        Self {
            replenish_rate,
            burst: burst_capacity as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `key`, or report how long until one is available
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        self.try_acquire_at(key, Instant::now())
    }

    pub fn try_acquire_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if buckets.len() >= MAX_BUCKETS && !buckets.contains_key(key) {
            self.evict(&mut buckets, now);
        }

        let state = buckets.entry(key.to_string()).or_insert(RateState {
            tokens: self.burst,
            last: now,
        });

        let dt = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + dt * self.replenish_rate).min(self.burst);
        state.last = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            let wait = Duration::try_from_secs_f64(missing / self.replenish_rate).unwrap_or(MAX_WAIT);
            Err(wait.min(MAX_WAIT))
        }
    }

    fn evict(&self, buckets: &mut HashMap<String, RateState>, now: Instant) {
        let before = buckets.len();
        buckets.retain(|_, state| {
            let dt = now.saturating_duration_since(state.last).as_secs_f64();
            state.tokens + dt * self.replenish_rate < self.burst
        });

        if buckets.len() >= MAX_BUCKETS {
            let mut touched: Vec<(Instant, String)> = buckets
                .iter()
                .map(|(key, state)| (state.last, key.clone()))
                .collect();
            touched.sort_unstable();
            for (_, key) in touched.into_iter().take(EVICT_BATCH) {
                buckets.remove(&key);
            }
        }
        debug!(evicted = before - buckets.len(), "Evicted rate limit buckets");
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}

/// Per-route token bucket admission
#[derive(Debug)]
pub struct RateLimitFilter {
    resolver: KeyResolver,
    limiter: RateLimiter,
}

impl RateLimitFilter {
    pub fn new(key: &str, replenish_rate: f64, burst_capacity: u32) -> GatewayResult<Self> {
        if !(replenish_rate.is_finite() && replenish_rate > 0.0) || burst_capacity == 0 {
            return Err(GatewayError::config(
                "rate limit needs a positive replenish_rate and burst_capacity",
            ));
        }
        Ok(Self {
            resolver: KeyResolver::parse(key)?,
            limiter: RateLimiter::new(replenish_rate, burst_capacity),
        })
    }

    pub fn on_request(&self, req: &Request<Body>, info: &ExchangeInfo) -> FilterResult {
        let key = self.resolver.resolve(req, info);
        match self.limiter.try_acquire(&key) {
            Ok(()) => FilterResult::Continue,
            Err(wait) => {
                debug!(key = %key, retry_after_ms = wait.as_millis() as u64, "Rate limited");
                FilterResult::Reject(GatewayError::rate_limited(key, wait))
            }
        }
    }
}
