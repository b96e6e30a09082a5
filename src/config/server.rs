use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Admission limit; further requests are answered 503 until a slot frees
    pub max_in_flight: usize,
    /// Path answered by the gateway itself with a JSON health report
    pub health_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_in_flight: 1024,
            health_path: "/actuator/health".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.max_in_flight == 0 {
            return Err(GatewayError::config(
                "server.max_in_flight must be greater than 0",
            ));
        }
        if !self.health_path.starts_with('/') {
            return Err(GatewayError::config(format!(
                "server.health_path '{}' must start with '/'",
                self.health_path
            )));
        }
        Ok(())
    }
}

/// Outbound client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub connect_timeout_ms: u64,
    /// Upper bound for the wait on upstream response headers
    pub read_timeout_ms: u64,
    pub pool_idle_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            read_timeout_ms: 30_000,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 32,
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(GatewayError::config(
                "proxy connect/read timeouts must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Metrics exporter settings, consumed by the binary
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Prometheus scrape listener; no exporter when unset
    pub metrics_bind: Option<SocketAddr>,
}
