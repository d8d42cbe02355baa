//! 网关配置模块
//!
//! 该模块提供网关进程的配置管理功能，包括：
//! - 配置文件加载和解析
//! - 环境变量覆盖
//! - 接入服务、日志、推送客户端的配置定义

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::warn;

use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

mod manager;
pub use manager::ConfigManager;

/// 全局配置快照，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<GatewayConfig> = OnceLock::new();

/// 网关配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// 接入服务配置
    pub server: ServerConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 推送客户端配置
    pub push: PushClientConfig,
}

/// 接入服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub address: String,
    /// 监听端口，0 表示由系统分配
    pub port: u16,
    /// 是否要求加密
    pub security: bool,
    /// 单帧最大负载（字节）
    pub max_payload_size: usize,
    /// 读空闲超时（毫秒）
    pub idle_timeout_ms: u64,
    /// 空闲检查间隔（毫秒）
    pub idle_check_interval_ms: u64,
    /// 编码缓冲池容量
    pub buffer_pool_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 3000,
            security: false,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            idle_timeout_ms: 180_000,
            idle_check_interval_ms: 30_000,
            buffer_pool_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// `address:port` 形式的监听地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（trace / debug / info / warn / error）
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 推送客户端配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushClientConfig {
    /// 分发消息订阅的主题
    pub dispatch_topic: String,
    /// 连接远端网关的超时（毫秒）
    pub connect_timeout_ms: u64,
}

impl Default for PushClientConfig {
    fn default() -> Self {
        Self {
            dispatch_topic: "piccolo_dispatch_message".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

/// 加载配置
///
/// 未指定路径时依次尝试 `config/gateway.toml`、`gateway.toml`，
/// 都失败时使用默认配置；随后应用环境变量覆盖。只有第一次调用会真正加载。
pub fn load_config(path: Option<&str>) -> &'static GatewayConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![
            PathBuf::from("config/gateway.toml"),
            PathBuf::from("gateway.toml"),
        ],
    };

    APP_CONFIG.get_or_init(|| {
        let mut cfg = load_with_fallback(&candidates);
        ConfigManager::apply_env_overrides(&mut cfg);
        cfg
    })
}

/// 获取配置快照，尚未加载时按默认路径加载
pub fn app_config() -> &'static GatewayConfig {
    match APP_CONFIG.get() {
        Some(cfg) => cfg,
        None => load_config(None),
    }
}

/// 从 TOML 字符串解析配置
pub fn load_config_from_str(content: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig = toml::from_str(content).context("invalid gateway config format")?;
    cfg.validate()?;
    Ok(cfg)
}

impl GatewayConfig {
    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        if self.server.max_payload_size == 0 {
            return Err(anyhow!("server.max_payload_size must be positive"));
        }
        if self.server.idle_check_interval_ms == 0 {
            return Err(anyhow!("server.idle_check_interval_ms must be positive"));
        }
        if self.push.dispatch_topic.is_empty() {
            return Err(anyhow!("push.dispatch_topic must not be empty"));
        }
        Ok(())
    }
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> GatewayConfig {
    for path in candidates {
        match load_config_from_file(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err:#}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    GatewayConfig::default()
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<GatewayConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    load_config_from_str(&content)
        .with_context(|| format!("invalid config file: {}", path.display()))
}
