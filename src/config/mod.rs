//! # 配置管理模块
//!
//! 网关配置快照的定义、加载与校验：
//!
//! - TOML 配置文件解析
//! - `${VAR}` / `${VAR:-default}` 环境变量展开
//! - 结构校验（路由、服务、过滤器参数），失败返回 `ConfigurationInvalid`
//! - 配置热重载（见 [`manager`]）
//!
//! ## 配置结构
//!
//! - `server`: 监听地址、准入上限、健康检查路径
//! - `proxy`: 上游连接/读取超时与连接池
//! - `circuit_breaker`: 熔断策略
//! - `monitoring`: Prometheus 导出器地址（可选）
//! - `services`: 服务实例池与负载均衡策略
//! - `verifiers`: 认证过滤器使用的凭证校验器
//! - `default_filters`: 追加到每条路由过滤链之前的过滤器
//! - `routes`: 路由规则
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use distri_gateway::config::GatewayConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GatewayConfig::from_file_with_env("config/gateway.toml").await?;
//! println!("监听地址: {}", config.server.bind);
//! # Ok(())
//! # }
//! ```

pub mod manager; // 配置管理器和热重载模块
pub mod routes; // 路由、谓词与过滤器配置
pub mod server; // 监听、代理与监控配置
pub mod services; // 服务实例池与校验器配置

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::Path;
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{GatewayError, GatewayResult};

pub use manager::ConfigManager;
pub use routes::{AuthScheme, FilterConfig, PredicateConfig, RouteConfig, UriTarget};
pub use server::{MonitoringConfig, ProxyConfig, ServerConfig};
pub use services::{InstanceConfig, LoadBalancingType, ServiceConfig, VerifierConfig};

/// 网关配置快照
///
/// 核心模块只消费这个结构，不关心它来自文件还是代码。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    #[serde(default)]
    pub verifiers: HashMap<String, VerifierConfig>,
    #[serde(default)]
    pub default_filters: Vec<FilterConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl GatewayConfig {
    /// Load configuration from file with environment variable expansion
    pub async fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;

        let config = Self::from_toml_str(&content)?;

        info!(
            routes = config.routes.len(),
            services = config.services.len(),
            "Configuration loaded from {:?}",
            path.as_ref()
        );
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> GatewayResult<Self> {
        let expanded = expand_env_vars(content);
        let config: GatewayConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> GatewayResult<()> {
        self.server.validate()?;
        self.proxy.validate()?;
        self.circuit_breaker.validate()?;

        for (name, service) in &self.services {
            service.validate(name)?;
        }

        for filter in &self.default_filters {
            validate_filter("default_filters", filter)?;
        }

        let mut ids = HashSet::new();
        for route in &self.routes {
            if route.id.trim().is_empty() {
                return Err(GatewayError::config("Route with empty id"));
            }
            if !ids.insert(route.id.as_str()) {
                return Err(GatewayError::config(format!(
                    "Duplicate route id '{}'",
                    route.id
                )));
            }

            if let UriTarget::Service(service) = route.target()? {
                if !self.services.contains_key(&service) {
                    return Err(GatewayError::config(format!(
                        "Route '{}' references unknown service '{}'",
                        route.id, service
                    )));
                }
            }

            for predicate in &route.predicates {
                validate_predicate(&route.id, predicate)?;
            }
            for filter in &route.filters {
                validate_filter(&route.id, filter)?;
            }
        }

        if self.routes.is_empty() {
            warn!("No routes configured - every request will be answered 404");
        }

        Ok(())
    }
}

fn validate_predicate(route_id: &str, predicate: &PredicateConfig) -> GatewayResult<()> {
    match predicate {
        PredicateConfig::Path { pattern } if !pattern.starts_with('/') => Err(
            GatewayError::config(format!(
                "Route '{}': path pattern '{}' must start with '/'",
                route_id, pattern
            )),
        ),
        PredicateConfig::Method { methods } if methods.is_empty() => Err(GatewayError::config(
            format!("Route '{}': method predicate without methods", route_id),
        )),
        PredicateConfig::Header { name, .. } if name.is_empty() => Err(GatewayError::config(
            format!("Route '{}': header predicate without name", route_id),
        )),
        PredicateConfig::Host { pattern } if pattern.is_empty() => Err(GatewayError::config(
            format!("Route '{}': empty host pattern", route_id),
        )),
        _ => Ok(()),
    }
}

fn validate_filter(route_id: &str, filter: &FilterConfig) -> GatewayResult<()> {
    let invalid = |reason: String| {
        Err(GatewayError::config(format!(
            "Route '{}': {} filter {}",
            route_id,
            filter.name(),
            reason
        )))
    };

    match filter {
        FilterConfig::StripPrefix { parts } if *parts == 0 => {
            invalid("must strip at least one part".to_string())
        }
        FilterConfig::RateLimit {
            key,
            replenish_rate,
            burst_capacity,
        } => {
            if !(replenish_rate.is_finite() && *replenish_rate > 0.0) {
                return invalid(format!("replenish_rate {} must be positive", replenish_rate));
            }
            if *burst_capacity == 0 {
                return invalid("burst_capacity must be at least 1".to_string());
            }
            let known = key == "client_ip"
                || key == "route"
                || key.strip_prefix("header:").is_some_and(|h| !h.is_empty());
            if !known {
                return invalid(format!("has unknown key resolver '{}'", key));
            }
            Ok(())
        }
        FilterConfig::Auth { verifier, .. } if verifier.is_empty() => {
            invalid("has no verifier".to_string())
        }
        FilterConfig::RewriteResponse {
            status: Some(status),
            ..
        } if !(100..=599).contains(status) => invalid(format!("has invalid status {}", status)),
        FilterConfig::Cors {
            allowed_origins, ..
        } if allowed_origins.is_empty() => invalid("has no allowed origins".to_string()),
        FilterConfig::Retry { retries, .. } if *retries > 10 => {
            invalid(format!("retries {} exceeds 10", retries))
        }
        _ => Ok(()),
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references
pub fn expand_env_vars(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break; // Malformed ${VAR expression
        };
        result.push_str(&rest[..start]);

        let var_expr = &rest[start + 2..start + end];
        let replacement = match var_expr.split_once(":-") {
            Some((var_name, default_value)) => {
                env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            }
            None => env::var(var_expr).unwrap_or_else(|_| {
                warn!(
                    "Environment variable '{}' not found, using empty string",
                    var_expr
                );
                String::new()
            }),
        };
        result.push_str(&replacement);
        rest = &rest[start + end + 1..];
    }

    result.push_str(rest);
    result
}
