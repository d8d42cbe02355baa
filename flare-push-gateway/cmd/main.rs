//! 推送网关节点
//!
//! 维护客户端长连接，处理心跳、用户绑定、踢人和推送投递。
//!
//! 用法：`flare-push-gateway [config.toml]`，未指定时依次尝试
//! `config/gateway.toml`、`gateway.toml`，都不存在则使用默认配置。

use anyhow::Result;
use flare_gateway_core::load_config;
use flare_gateway_core::tracing::init_tracing_from_config;
use flare_push_gateway::bootstrap;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let app_config = load_config(config_path.as_deref());
    init_tracing_from_config(Some(&app_config.logging));

    bootstrap::run(app_config).await
}
