//! 到远端网关的连接

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::HostAndPort;
use crate::config::PushClientConfig;
use crate::connection::Connection;
use crate::error::PushResult;
use crate::handler::ServerHandler;
use crate::transport::spawn_channel;

/// 远端网关连接查找
pub trait ConnectionFactory: Send + Sync {
    /// 到指定网关的存活连接
    fn get_connection(&self, host_and_port: &HostAndPort) -> Option<Arc<Connection>>;

    /// 全部存活的网关连接
    fn all_connections(&self) -> Vec<Arc<Connection>>;
}

/// 网关连接池
///
/// 每个网关地址保留一条连接，已断开的连接在查找时被清理。
pub struct GatewayConnectionFactory {
    handler: Arc<ServerHandler>,
    connections: DashMap<HostAndPort, Arc<Connection>>,
    connect_timeout: Duration,
    max_payload_size: usize,
}

impl GatewayConnectionFactory {
    pub fn new(handler: Arc<ServerHandler>, connect_timeout: Duration) -> Self {
        let max_payload_size = handler.options().max_payload_size;
        Self {
            handler,
            connections: DashMap::new(),
            connect_timeout,
            max_payload_size,
        }
    }

    /// 按推送客户端配置创建，连接超时取 `connect_timeout_ms`
    pub fn from_config(handler: Arc<ServerHandler>, config: &PushClientConfig) -> Self {
        Self::new(handler, Duration::from_millis(config.connect_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// 连接远端网关并登记
    ///
    /// 并发连接同一网关时只保留先登记的连接，后到的新连接会被关闭。
    pub async fn connect(&self, host_and_port: &HostAndPort) -> PushResult<Arc<Connection>> {
        if let Some(connection) = self.get_connection(host_and_port) {
            return Ok(connection);
        }

        let address = host_and_port.to_string();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| anyhow!("connect to gateway {address} timed out"))?
            .with_context(|| format!("connect to gateway {address}"))?;

        let connection =
            spawn_channel(stream, Arc::clone(&self.handler), self.max_payload_size).await?;
        match self.connections.entry(host_and_port.clone()) {
            Entry::Occupied(entry) if entry.get().is_connected() => {
                let existing = Arc::clone(entry.get());
                drop(entry);
                debug!(
                    gateway = %host_and_port,
                    channel_id = %connection.id(),
                    "gateway already connected, close duplicate"
                );
                connection.close();
                Ok(existing)
            }
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::clone(&connection));
                info!(gateway = %host_and_port, channel_id = %connection.id(), "gateway reconnected");
                Ok(connection)
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&connection));
                info!(gateway = %host_and_port, channel_id = %connection.id(), "gateway connected");
                Ok(connection)
            }
        }
    }

    /// 登记已有连接，返回被替换的旧连接
    pub fn register(
        &self,
        host_and_port: HostAndPort,
        connection: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        self.connections.insert(host_and_port, connection)
    }

    pub fn remove(&self, host_and_port: &HostAndPort) -> Option<Arc<Connection>> {
        self.connections
            .remove(host_and_port)
            .map(|(_, connection)| connection)
    }
}

impl ConnectionFactory for GatewayConnectionFactory {
    fn get_connection(&self, host_and_port: &HostAndPort) -> Option<Arc<Connection>> {
        let connection = self
            .connections
            .get(host_and_port)
            .map(|entry| Arc::clone(entry.value()))?;
        if connection.is_connected() {
            return Some(connection);
        }

        debug!(gateway = %host_and_port, "drop closed gateway connection");
        self.connections
            .remove_if(host_and_port, |_, existing| Arc::ptr_eq(existing, &connection));
        None
    }

    fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
