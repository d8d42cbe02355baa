//! Flare Gateway Core
//!
//! 长连接推送网关的核心库：
//! - 二进制协议编解码（帧格式、变长字段、压缩与加密）
//! - 连接及连接管理器
//! - 通道事件到业务回调的适配
//! - 通用的服务启停状态机
//! - 推送客户端

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod protocol;
pub mod push;
pub mod service;
pub mod tracing;
pub mod transport;

pub use config::{
    ConfigManager, GatewayConfig, LoggingConfig, PushClientConfig, ServerConfig, app_config,
    load_config, load_config_from_str,
};
pub use connection::{Connection, ConnectionManager};
pub use error::*;
pub use service::{Callback, Service, ServiceState};
