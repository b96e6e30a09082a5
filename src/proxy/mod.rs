//! # 代理模块
//!
//! 网关的入站与出站 HTTP 处理：
//!
//! - 入站监听（HTTP/1.1 与 HTTP/2 prior knowledge），每个连接一个任务
//! - 请求流水线：准入 → 健康检查端点 → 路由匹配 → 过滤链 → 负载均衡 → 转发
//! - 出站客户端：连接池、连接/读取超时、逐跳头剥离、熔断器上报
//!
//! ## 主要组件
//!
//! - `GatewayServer`: 监听端口并把连接交给请求处理器
//! - `RequestHandler`: 每个请求的入口，附带客户端地址
//! - `ProxyClient`: 上游 HTTP/HTTPS 客户端
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use distri_gateway::config::GatewayConfig;
//! use distri_gateway::monitoring::MetricsSink;
//! use distri_gateway::proxy::GatewayServer;
//! use distri_gateway::Gateway;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GatewayConfig::from_file_with_env("config/gateway.toml").await?;
//! let gateway = Arc::new(Gateway::new(&config, Arc::new(MetricsSink))?);
//! let server = GatewayServer::bind(gateway, config.server.bind)?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod handler; // 请求处理流水线
pub mod http_client; // 上游 HTTP 客户端连接池
pub mod server; // 网关监听服务器

pub use handler::RequestHandler;
pub use http_client::ProxyClient;
pub use server::GatewayServer;
