//! 网关节点的命令处理
//!
//! - 心跳：原样回一个心跳（raw，同一 session id）
//! - 绑定：把用户和设备写入连接的会话上下文
//! - 踢人：向本节点上匹配的连接下发踢出通知后关闭连接
//! - 推送：把内容投递给本节点上目标用户的连接，广播时投递给全部连接

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flare_gateway_core::connection::{Connection, ConnectionManager};
use flare_gateway_core::error::{ConnectionError, ConnectionResult};
use flare_gateway_core::handler::{ChannelHandler, MessageHandler, PacketDispatcher};
use flare_gateway_core::message::{
    BindUserMessage, HeartbeatMessage, KickUserMessage, PushMessage,
};
use flare_gateway_core::protocol::{ByteBufMessage, CommandType, Packet};
use tracing::{debug, info, warn};

/// 心跳应答
#[derive(Debug, Default)]
pub struct HeartbeatHandler;

#[async_trait]
impl MessageHandler for HeartbeatHandler {
    async fn handle(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()> {
        let mut pong = HeartbeatMessage::build(connection)
            .with_session_id(packet.session_id())
            .raw();
        connection.send_message(&mut pong)
    }
}

/// 用户绑定
#[derive(Debug, Default)]
pub struct BindUserHandler;

#[async_trait]
impl MessageHandler for BindUserHandler {
    async fn handle(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()> {
        let bind = ByteBufMessage::<BindUserMessage>::decode(connection, &packet)?.into_body();
        if bind.user_id.is_empty() {
            warn!(channel_id = %connection.id(), "bind without user id ignored");
            return Ok(());
        }

        info!(
            channel_id = %connection.id(),
            user_id = %bind.user_id,
            device_id = %bind.device_id,
            "user bound"
        );
        connection.update_session_context(|context| {
            context.user_id = Some(bind.user_id);
            context.device_id = Some(bind.device_id);
        });
        Ok(())
    }
}

/// 踢下线
///
/// `device_id` 为空时踢掉该用户的全部设备。
pub struct KickUserHandler {
    manager: Arc<ConnectionManager>,
}

impl KickUserHandler {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// 踢出匹配的本地连接，返回被关闭的连接数
    pub fn kick(&self, user_id: &str, device_id: &str) -> usize {
        let mut kicked = 0;
        for target in self.manager.connections_of_user(user_id) {
            let context = target.session_context();
            if !device_id.is_empty() && context.device_id.as_deref() != Some(device_id) {
                continue;
            }

            let mut notice = KickUserMessage::build(&target)
                .user_id(user_id)
                .device_id(context.device_id.unwrap_or_default());
            if let Err(err) = target.send_message(&mut notice) {
                debug!(channel_id = %target.id(), error = %err, "kick notice not delivered");
            }
            target.close();
            kicked += 1;
        }
        kicked
    }
}

#[async_trait]
impl MessageHandler for KickUserHandler {
    async fn handle(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()> {
        let kick = ByteBufMessage::<KickUserMessage>::decode(connection, &packet)?;
        let kicked = self.kick(&kick.user_id, &kick.device_id);
        info!(
            from = %connection.id(),
            user_id = %kick.user_id,
            device_id = %kick.device_id,
            kicked,
            "kick user"
        );
        Ok(())
    }
}

/// 推送投递
pub struct PushHandler {
    manager: Arc<ConnectionManager>,
}

impl PushHandler {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// 投递到本地连接，返回成功写入的连接数
    pub fn deliver(&self, user_id: &str, broadcast: bool, content: Bytes) -> usize {
        let targets = if broadcast {
            self.manager.all_connections()
        } else {
            self.manager.connections_of_user(user_id)
        };

        let mut delivered = 0;
        for target in targets {
            let mut message = PushMessage::build(&target)
                .user_id(user_id)
                .broadcast(broadcast)
                .content(content.clone());
            match target.send_message(&mut message) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(channel_id = %target.id(), error = %err, "push not delivered")
                }
            }
        }
        delivered
    }
}

#[async_trait]
impl MessageHandler for PushHandler {
    async fn handle(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()> {
        let push = ByteBufMessage::<PushMessage>::decode(connection, &packet)?.into_body();
        let delivered = self.deliver(&push.user_id, push.broadcast, push.content);
        debug!(
            from = %connection.id(),
            user_id = %push.user_id,
            broadcast = push.broadcast,
            delivered,
            "push delivered"
        );
        Ok(())
    }
}

/// 网关节点的业务处理器
///
/// 组装各命令处理器，并记录连接的建立与断开。
pub struct GatewayBusinessHandler {
    manager: Arc<ConnectionManager>,
}

impl GatewayBusinessHandler {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// 构建注册了全部命令的分发器，自身作为生命周期回调的委托
    pub fn into_dispatcher(self) -> PacketDispatcher {
        let manager = Arc::clone(&self.manager);
        let mut dispatcher = PacketDispatcher::new().with_delegate(Arc::new(self));
        dispatcher
            .register(CommandType::Heartbeat, Arc::new(HeartbeatHandler))
            .register(CommandType::BindUser, Arc::new(BindUserHandler))
            .register(
                CommandType::Kick,
                Arc::new(KickUserHandler::new(Arc::clone(&manager))),
            )
            .register(CommandType::Push, Arc::new(PushHandler::new(manager)));
        dispatcher
    }
}

#[async_trait]
impl ChannelHandler for GatewayBusinessHandler {
    async fn connected(&self, connection: &Arc<Connection>) -> ConnectionResult<()> {
        info!(
            channel_id = %connection.id(),
            remote_addr = ?connection.remote_addr(),
            online = self.manager.connection_count(),
            "client connected"
        );
        Ok(())
    }

    async fn disconnected(&self, connection: &Arc<Connection>) {
        info!(
            channel_id = %connection.id(),
            user_id = ?connection.user_id(),
            online = self.manager.connection_count(),
            "client disconnected"
        );
    }

    async fn received(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()> {
        // 分发器只把生命周期回调转交过来
        debug!(channel_id = %connection.id(), cmd = packet.cmd(), "packet not dispatched");
        Ok(())
    }

    async fn sent(&self, _connection: &Arc<Connection>, _packet: &Packet) {}

    async fn caught(&self, connection: &Arc<Connection>, error: &ConnectionError) {
        warn!(channel_id = %connection.id(), error = %error, "connection error");
    }
}

#[cfg(test)]
mod tests {
    use flare_gateway_core::connection::{Channel, SessionContext};
    use flare_gateway_core::protocol::{BaseMessage, decompose_flag};
    use flare_gateway_core::transport::MemoryChannel;

    use super::*;

    fn bound(
        manager: &ConnectionManager,
        user_id: &str,
        device_id: &str,
    ) -> (Arc<MemoryChannel>, Arc<Connection>) {
        let channel = MemoryChannel::new();
        let connection = Connection::init(channel.clone(), false);
        connection.set_session_context(SessionContext::default().with_user(user_id, device_id));
        manager.add(Arc::clone(&connection)).unwrap();
        (channel, connection)
    }

    #[tokio::test]
    async fn test_heartbeat_echoes_session_id() {
        let channel = MemoryChannel::new();
        let connection = Connection::init(channel.clone(), false);
        let mut ping = HeartbeatMessage::build(&connection).with_session_id(42);
        let packet = ping.encode_body().unwrap();

        HeartbeatHandler.handle(&connection, packet).await.unwrap();

        let written = channel.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].cmd(), CommandType::Heartbeat.cmd());
        assert_eq!(written[0].session_id(), 42);
        assert_eq!(decompose_flag(written[0].flag()), (0, false));
    }

    #[tokio::test]
    async fn test_bind_sets_session_context() {
        let connection = Connection::init(MemoryChannel::new(), false);
        let mut bind = BindUserMessage::build(&connection)
            .user_id("u-1")
            .device_id("ios");
        let packet = bind.encode_body().unwrap();

        BindUserHandler.handle(&connection, packet).await.unwrap();

        let context = connection.session_context();
        assert_eq!(context.user_id.as_deref(), Some("u-1"));
        assert_eq!(context.device_id.as_deref(), Some("ios"));
    }

    #[tokio::test]
    async fn test_bind_without_user_is_ignored() {
        let connection = Connection::init(MemoryChannel::new(), false);
        let mut bind = BindUserMessage::build(&connection).device_id("ios");
        let packet = bind.encode_body().unwrap();

        BindUserHandler.handle(&connection, packet).await.unwrap();
        assert!(!connection.session_context().is_bound());
    }

    #[test]
    fn test_kick_single_device() {
        let manager = Arc::new(ConnectionManager::new());
        let (phone, _) = bound(&manager, "u-1", "phone");
        let (pc, _) = bound(&manager, "u-1", "pc");

        let handler = KickUserHandler::new(Arc::clone(&manager));
        assert_eq!(handler.kick("u-1", "phone"), 1);

        assert!(!phone.is_open());
        assert!(pc.is_open());
        let written = phone.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].cmd(), CommandType::Kick.cmd());
        assert!(pc.written().is_empty());
    }

    #[tokio::test]
    async fn test_kick_all_devices() {
        let manager = Arc::new(ConnectionManager::new());
        let (phone, _) = bound(&manager, "u-1", "phone");
        let (pc, _) = bound(&manager, "u-1", "pc");
        let (other, _) = bound(&manager, "u-2", "phone");

        let source = Connection::init(MemoryChannel::new(), false);
        let mut kick = KickUserMessage::build(&source).user_id("u-1");
        let packet = kick.encode_body().unwrap();
        KickUserHandler::new(Arc::clone(&manager))
            .handle(&source, packet)
            .await
            .unwrap();

        assert!(!phone.is_open());
        assert!(!pc.is_open());
        assert!(other.is_open());
    }

    #[tokio::test]
    async fn test_push_to_user_connections() {
        let manager = Arc::new(ConnectionManager::new());
        let (phone, phone_conn) = bound(&manager, "u-1", "phone");
        let (other, _) = bound(&manager, "u-2", "phone");

        let source = Connection::init(MemoryChannel::new(), false);
        let mut push = PushMessage::build(&source)
            .user_id("u-1")
            .content(&b"hello"[..]);
        let packet = push.encode_body().unwrap();
        PushHandler::new(Arc::clone(&manager))
            .handle(&source, packet)
            .await
            .unwrap();

        let written = phone.written();
        assert_eq!(written.len(), 1);
        let delivered = ByteBufMessage::<PushMessage>::decode(&phone_conn, &written[0]).unwrap();
        assert_eq!(delivered.content.as_ref(), b"hello");
        assert_eq!(delivered.user_id, "u-1");
        assert!(other.written().is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_connection() {
        let manager = Arc::new(ConnectionManager::new());
        let (a, _) = bound(&manager, "u-1", "phone");
        let (b, _) = bound(&manager, "u-2", "pc");
        let anonymous = MemoryChannel::new();
        manager
            .add(Connection::init(anonymous.clone(), false))
            .unwrap();

        let delivered = PushHandler::new(manager).deliver("", true, Bytes::from_static(b"notice"));
        assert_eq!(delivered, 3);
        assert_eq!(a.written().len(), 1);
        assert_eq!(b.written().len(), 1);
        assert_eq!(anonymous.written().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_has_every_command() {
        let dispatcher = GatewayBusinessHandler::new(Arc::new(ConnectionManager::new())).into_dispatcher();
        for command in [
            CommandType::Heartbeat,
            CommandType::BindUser,
            CommandType::Kick,
            CommandType::Push,
        ] {
            assert!(dispatcher.is_registered(command));
        }
        assert!(!dispatcher.is_registered(CommandType::Error));
    }
}
