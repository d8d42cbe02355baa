//! 配置管理器 - 负责环境变量覆盖
//!
//! 支持的环境变量：
//! - `FLARE_GATEWAY_ADDRESS`：监听地址
//! - `FLARE_GATEWAY_PORT`：监听端口
//! - `FLARE_GATEWAY_SECURITY`：是否要求加密（true / false / 1 / 0）
//! - `FLARE_LOG_LEVEL`：日志级别

use std::env;

use tracing::warn;

use super::GatewayConfig;

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 用进程环境变量覆盖配置
    pub fn apply_env_overrides(config: &mut GatewayConfig) {
        Self::apply_overrides(config, |key| env::var(key).ok());
    }

    /// 用给定的查找函数覆盖配置，无法解析的值保留原配置并告警
    pub fn apply_overrides<F>(config: &mut GatewayConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("FLARE_GATEWAY_ADDRESS") {
            config.server.address = address;
        }

        if let Some(port) = lookup("FLARE_GATEWAY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.server.port = port,
                Err(err) => warn!(value = %port, error = %err, "invalid FLARE_GATEWAY_PORT, ignored"),
            }
        }

        if let Some(security) = lookup("FLARE_GATEWAY_SECURITY") {
            match parse_bool(&security) {
                Some(security) => config.server.security = security,
                None => warn!(value = %security, "invalid FLARE_GATEWAY_SECURITY, ignored"),
            }
        }

        if let Some(level) = lookup("FLARE_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
