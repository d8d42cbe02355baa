//! 应用启动器 - 负责依赖组装和服务启停

use std::sync::Arc;

use anyhow::Result;
use flare_gateway_core::GatewayConfig;
use flare_gateway_core::connection::{ConnectionManager, ConnectionOptions};
use flare_gateway_core::event::BroadcastEventBus;
use flare_gateway_core::handler::ServerHandler;
use flare_gateway_core::protocol::BufferPool;
use flare_gateway_core::service::Service;
use flare_gateway_core::transport::GatewayServer;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::handler::GatewayBusinessHandler;

/// 组装网关接入服务
///
/// 必须在 tokio 运行时内调用；连接关闭事件由后台任务记录。
pub fn build_server(config: &GatewayConfig) -> GatewayServer {
    let server_config = config.server.clone();
    let manager = Arc::new(ConnectionManager::new());
    let event_bus = Arc::new(BroadcastEventBus::default());
    spawn_close_event_logger(&event_bus);

    let dispatcher = GatewayBusinessHandler::new(Arc::clone(&manager)).into_dispatcher();
    let options = ConnectionOptions {
        buffers: BufferPool::new(server_config.buffer_pool_capacity),
        max_payload_size: server_config.max_payload_size,
    };
    let handler = ServerHandler::new(
        manager,
        Arc::new(dispatcher),
        event_bus,
        server_config.security,
    )
    .with_options(options);

    GatewayServer::new(server_config, Arc::new(handler), Handle::current())
}

/// 运行网关直到收到 ctrl-c
pub async fn run(config: &GatewayConfig) -> Result<()> {
    let server = build_server(config);

    info!("🚀 启动推送网关");
    server.start_async(None).await?;
    if let Some(addr) = server.local_addr() {
        info!(%addr, security = config.server.security, "✅ 推送网关已启动");
    }

    tokio::signal::ctrl_c().await?;
    info!("正在停止推送网关...");

    server.stop_async(None).await?;
    info!("✅ 推送网关已停止");
    Ok(())
}

fn spawn_close_event_logger(event_bus: &BroadcastEventBus) {
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(
                    channel_id = %event.channel_id,
                    user_id = ?event.user_id,
                    remote_addr = ?event.remote_addr,
                    closed_at = %event.closed_at,
                    "connection closed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "close event logger lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
