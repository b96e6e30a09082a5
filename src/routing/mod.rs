//! # 路由模块
//!
//! 路由表是按版本发布的不可变快照：配置变更时整体重建，再由网关原子替换。
//! 进行中的请求持有它开始时的路由表 `Arc`，谓词匹配、过滤器执行和后端选择
//! 都基于同一个版本。
//!
//! ## 匹配规则
//!
//! - 一条路由的所有谓词都成立时匹配（没有谓词则匹配所有请求）
//! - `priority` 越小越优先，相同优先级按声明顺序
//! - 路径模式：`*` / `{name}` 匹配一段，`**` 匹配任意多段，区分大小写
//! - 主机模式：同样的通配语法作用于 `.` 分隔的标签，不区分大小写，忽略端口

pub mod predicate; // 请求谓词
pub mod route; // 编译后的路由与目的地
pub mod table; // 版本化路由表

pub use predicate::{Predicate, SegmentPattern};
pub use route::{Destination, Route};
pub use table::{BuildContext, RouteTable};
