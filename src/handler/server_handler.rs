//! 通道事件适配器

use std::sync::Arc;

use futures::{Sink, SinkExt};
use tracing::{debug, info, warn};

use super::ChannelHandler;
use crate::connection::{Channel, ChannelId, Connection, ConnectionManager, ConnectionOptions};
use crate::error::{ConnectionError, ConnectionResult};
use crate::event::{ConnectionCloseEvent, EventBus};
use crate::metrics::GatewayMetrics;
use crate::protocol::Packet;

/// 通道事件适配器
///
/// 负责连接在 [`ConnectionManager`] 中的注册与移除，并把事件转发给业务 [`ChannelHandler`]。
/// `channel_inactive` 或 `exception_caught` 之后，该通道的事件不会再以存活连接的身份到达业务层。
pub struct ServerHandler {
    manager: Arc<ConnectionManager>,
    handler: Arc<dyn ChannelHandler>,
    event_bus: Arc<dyn EventBus>,
    security: bool,
    options: ConnectionOptions,
    metrics: &'static GatewayMetrics,
}

impl ServerHandler {
    pub fn new(
        manager: Arc<ConnectionManager>,
        handler: Arc<dyn ChannelHandler>,
        event_bus: Arc<dyn EventBus>,
        is_security: bool,
    ) -> Self {
        Self {
            manager,
            handler,
            event_bus,
            security: is_security,
            options: ConnectionOptions::default(),
            metrics: GatewayMetrics::global(),
        }
    }

    /// 设置新连接的构造参数
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// 通道建立：创建并注册连接，然后回调 `connected`
    ///
    /// `connected` 失败时连接会被移除，错误返回给传输层。
    pub async fn channel_active(
        &self,
        channel: Arc<dyn Channel>,
    ) -> ConnectionResult<Arc<Connection>> {
        let connection = Connection::init_with(channel, self.security, self.options.clone());
        self.manager.add(Arc::clone(&connection))?;
        self.metrics.record_event("active");
        self.metrics.active_connections.inc();
        info!(
            channel_id = %connection.id(),
            remote_addr = ?connection.remote_addr(),
            security = self.security,
            "channel active"
        );

        if let Err(err) = self.handler.connected(&connection).await {
            warn!(channel_id = %connection.id(), error = %err, "connected callback failed");
            self.manager.remove_connection(connection.id());
            self.metrics.active_connections.dec();
            return Err(err);
        }
        Ok(connection)
    }

    /// 收到一帧
    ///
    /// 未注册的通道只记录告警并丢弃。
    pub async fn channel_read(&self, channel_id: ChannelId, packet: Packet) -> ConnectionResult<()> {
        let Some(connection) = self.manager.get_connection(channel_id) else {
            warn!(%channel_id, cmd = packet.cmd(), "read on unregistered channel, dropped");
            return Ok(());
        };

        connection.update_last_read_time();
        self.metrics.record_event("read");
        self.metrics.record_packet("inbound");
        debug!(
            %channel_id,
            cmd = packet.cmd(),
            session_id = packet.session_id(),
            length = packet.length(),
            "packet received"
        );
        self.handler.received(&connection, packet).await
    }

    /// 写出一帧
    ///
    /// 先更新写时间并回调 `sent`，再把帧交给底层 `sink`；回调不会丢弃写入。
    pub async fn write<S>(&self, channel_id: ChannelId, packet: Packet, sink: &mut S) -> Result<(), S::Error>
    where
        S: Sink<Packet> + Unpin,
    {
        match self.manager.get_connection(channel_id) {
            Some(connection) => {
                connection.update_last_write_time();
                self.handler.sent(&connection, &packet).await;
            }
            None => debug!(%channel_id, cmd = packet.cmd(), "write after connection removed"),
        }
        self.metrics.record_event("write");
        self.metrics.record_packet("outbound");
        sink.send(packet).await
    }

    /// 关闭并移除全部连接，返回关闭的数量
    ///
    /// 每个连接发布一次关闭事件；之后到达的 `channel_inactive` 找不到连接，不再回调 `disconnected`。
    pub fn close_all(&self) -> usize {
        let closed = self.manager.destroy();
        self.metrics.active_connections.sub(closed.len() as i64);
        for connection in &closed {
            self.event_bus
                .post(ConnectionCloseEvent::from_connection(connection));
        }
        closed.len()
    }

    /// 通道关闭：移除连接，发布关闭事件，回调 `disconnected`
    pub async fn channel_inactive(&self, channel_id: ChannelId) {
        let Some(connection) = self.manager.remove_connection(channel_id) else {
            debug!(%channel_id, "inactive on unregistered channel");
            return;
        };

        self.metrics.record_event("inactive");
        self.metrics.active_connections.dec();
        info!(
            %channel_id,
            user_id = ?connection.user_id(),
            "channel inactive"
        );

        self.event_bus
            .post(ConnectionCloseEvent::from_connection(&connection));
        self.handler.disconnected(&connection).await;
    }

    /// 通道异常：移除连接，发布关闭事件，回调 `caught`
    pub async fn exception_caught(&self, channel_id: ChannelId, error: ConnectionError) {
        let Some(connection) = self.manager.remove_connection(channel_id) else {
            warn!(%channel_id, error = %error, "exception on unregistered channel");
            return;
        };

        self.metrics.record_event("exception");
        self.metrics.active_connections.dec();
        warn!(%channel_id, error = %error, "channel exception");

        // 随后的 channel_inactive 找不到连接，关闭事件在这里发布
        self.event_bus
            .post(ConnectionCloseEvent::from_connection(&connection));
        self.handler.caught(&connection, &error).await;
    }
}
