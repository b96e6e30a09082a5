//! # distri-gateway - API 网关路由核心
//!
//! DistriSchool 微服务的统一入口：按路由规则把请求转发到后端服务实例，
//! 并在转发前后执行过滤链。
//!
//! ## 核心功能
//!
//! - **路由**: 基于路径、方法、请求头、主机的谓词匹配，按优先级选择路由
//! - **过滤链**: 请求头添加、前缀剥离、认证、限流、CORS、响应改写、重试
//! - **负载均衡**: 轮询、加权随机、最少连接
//! - **熔断**: 每个后端一个熔断器，打开后快速失败，半开时单个探测请求
//! - **监控指标**: 结构化事件，默认写入 `metrics` 与 `tracing`，可导出 Prometheus
//! - **健康检查**: 内置健康端点，报告路由表版本与各后端状态
//! - **配置热重载**: 新路由表原子替换，失败时保留旧版本
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use distri_gateway::{config::GatewayConfig, monitoring::MetricsSink, proxy::GatewayServer, Gateway};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::from_file_with_env("config/gateway.toml").await?;
//!     let gateway = Arc::new(Gateway::new(&config, Arc::new(MetricsSink))?);
//!     GatewayServer::bind(gateway, config.server.bind)?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod balancer;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod filters;
pub mod gateway;
pub mod monitoring;
pub mod proxy;
pub mod routing;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState, HealthState,
};
pub use config::GatewayConfig;
pub use error::{ErrorSeverity, GatewayError, GatewayResult};
pub use filters::{CredentialVerifier, Principal, VerifierRegistry};
pub use gateway::Gateway;
pub use monitoring::{EventSink, GatewayEvent, MetricsSink};
pub use proxy::GatewayServer;
pub use routing::{Route, RouteTable};
