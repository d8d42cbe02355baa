//! 接入监听服务

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::spawn_channel;
use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::error::{ServiceError, ServiceResult};
use crate::handler::ServerHandler;
use crate::service::{Service, ServiceState};

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

/// 网关接入服务
///
/// `init` 绑定监听端口并在给定运行时上启动接入循环和空闲连接清理；
/// `destroy` 停止接入并关闭全部连接。
pub struct GatewayServer {
    config: ServerConfig,
    handler: Arc<ServerHandler>,
    runtime: Handle,
    state: ServiceState,
    running: Mutex<Option<Running>>,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, handler: Arc<ServerHandler>, runtime: Handle) -> Self {
        Self {
            config,
            handler,
            runtime,
            state: ServiceState::new(),
            running: Mutex::new(None),
        }
    }

    /// 实际监听地址，未启动时为 `None`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|running| running.local_addr)
    }

    pub fn handler(&self) -> &Arc<ServerHandler> {
        &self.handler
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        self.handler.manager()
    }
}

impl Service for GatewayServer {
    fn name(&self) -> &str {
        "gateway-server"
    }

    fn state(&self) -> &ServiceState {
        &self.state
    }

    fn init(&self) -> ServiceResult<()> {
        let bind_addr = self.config.bind_addr();
        let std_listener = std::net::TcpListener::bind(&bind_addr)
            .map_err(|err| ServiceError::Init(format!("bind {bind_addr}: {err}")))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|err| ServiceError::Init(err.to_string()))?;

        let _guard = self.runtime.enter();
        let listener =
            TcpListener::from_std(std_listener).map_err(|err| ServiceError::Init(err.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| ServiceError::Init(err.to_string()))?;

        let shutdown = CancellationToken::new();
        self.runtime.spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            self.config.max_payload_size,
            shutdown.clone(),
        ));
        self.runtime.spawn(idle_sweep_loop(
            Arc::clone(self.handler.manager()),
            Duration::from_millis(self.config.idle_timeout_ms),
            Duration::from_millis(self.config.idle_check_interval_ms.max(1)),
            shutdown.clone(),
        ));

        info!(%local_addr, security = self.config.security, "gateway server listening");
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(Running {
            local_addr,
            shutdown,
        });
        Ok(())
    }

    fn destroy(&self) -> ServiceResult<()> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // init 失败后的清理
        let Some(running) = running else {
            debug!("gateway server was not listening");
            self.handler.close_all();
            return Ok(());
        };

        running.shutdown.cancel();
        self.handler.close_all();
        info!(local_addr = %running.local_addr, "gateway server stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<ServerHandler>,
    max_payload_size: usize,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    debug!(%remote_addr, "accepted connection");
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(err) = spawn_channel(stream, handler, max_payload_size).await {
                            warn!(%remote_addr, error = %err, "failed to activate channel");
                        }
                    });
                }
                Err(err) => {
                    // 文件句柄耗尽等情况下稍后重试
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}

async fn idle_sweep_loop(
    manager: Arc<ConnectionManager>,
    idle_timeout: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for connection in manager.idle_connections(idle_timeout) {
                    info!(
                        channel_id = %connection.id(),
                        user_id = ?connection.user_id(),
                        "closing idle connection"
                    );
                    connection.close();
                }
            }
        }
    }
}
