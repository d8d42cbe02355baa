//! Flare 推送网关节点
//!
//! 把核心库组装成可运行的网关进程：配置 → 日志 → 连接管理 → 通道事件适配 → TCP 接入服务。

pub mod bootstrap;
pub mod handler;

pub use handler::GatewayBusinessHandler;
