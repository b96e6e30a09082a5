//! # 监控模块
//!
//! 网关核心只向 [`EventSink`] 发送结构化事件，不直接依赖任何指标后端。
//!
//! - [`events`]: 事件类型与 sink trait
//! - [`metrics`]: 默认 sink，写入 `metrics` 计数器/直方图并输出 `tracing` 日志
//! - [`health`]: 内置健康检查端点的 JSON 报告

pub mod events; // 事件定义
pub mod health; // 健康报告
pub mod metrics; // 指标 sink 与 Prometheus 导出器

pub use events::{EventSink, FilterDecision, GatewayEvent, MemorySink, NoopSink, SharedEventSink};
pub use health::HealthReport;
pub use metrics::{install_prometheus_exporter, MetricsSink};
