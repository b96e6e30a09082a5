//! # 负载均衡器模块
//!
//! 从服务实例池中选择一个后端实例。
//!
//! ## 负载均衡算法
//!
//! - **轮询 (Round Robin)**: 原子递增的轮转索引，并发选择不会出现撕裂
//! - **加权随机 (Weighted Random)**: 按权重比例随机选择，权重全为 0 时退化为均匀随机
//! - **最少连接 (Least Connections)**: 选择当前在途请求最少的实例，并列时轮转
//!
//! ## 健康状态
//!
//! 实例的健康状态完全由其熔断器推导（见 [`crate::circuit_breaker`]），
//! 负载均衡器只读取，不写入。只有 Healthy / Suspected 的实例参与选择。
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use distri_gateway::balancer::LoadBalancer;
//! use distri_gateway::config::LoadBalancingType;
//!
//! let pool = LoadBalancer::new("students", LoadBalancingType::RoundRobin, Vec::new());
//! match pool.pick() {
//!     Ok(guard) => println!("选择的后端: {}", guard.instance().address()),
//!     Err(e) => println!("无可用后端: {}", e),
//! }
//! ```

pub mod algorithms; // 负载均衡算法实现
pub mod instance; // 后端实例与在途请求计数
pub mod load_balancer; // 服务实例池

pub use algorithms::LoadBalancingAlgorithms;
pub use instance::{BackendInstance, InFlightGuard};
pub use load_balancer::LoadBalancer;
