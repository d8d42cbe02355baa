//! 按命令分发入站帧

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::ChannelHandler;
use crate::connection::Connection;
use crate::error::{ConnectionError, ConnectionResult};
use crate::message::{ErrorCode, ErrorMessage};
use crate::protocol::{CommandType, Packet};

/// 单个命令的业务处理器
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()>;
}

/// 命令分发器
///
/// 未注册的命令和处理失败都以 [`ErrorMessage`] 应答（raw 模式）。
/// 除 `received` 外的回调转交给可选的委托处理器。
#[derive(Default)]
pub struct PacketDispatcher {
    handlers: HashMap<CommandType, Arc<dyn MessageHandler>>,
    delegate: Option<Arc<dyn ChannelHandler>>,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册命令处理器，同一命令重复注册时后者覆盖前者
    pub fn register(&mut self, command: CommandType, handler: Arc<dyn MessageHandler>) -> &mut Self {
        if self.handlers.insert(command, handler).is_some() {
            warn!(?command, "message handler replaced");
        }
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn ChannelHandler>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn is_registered(&self, command: CommandType) -> bool {
        self.handlers.contains_key(&command)
    }

    fn reply_error(
        connection: &Connection,
        packet: &Packet,
        code: ErrorCode,
        reason: String,
    ) -> ConnectionResult<()> {
        let mut reply = ErrorMessage::build(connection)
            .code(code)
            .cmd(packet.cmd())
            .reason(reason)
            .with_session_id(packet.session_id())
            .raw();
        connection.send_message(&mut reply)
    }
}

#[async_trait]
impl ChannelHandler for PacketDispatcher {
    async fn connected(&self, connection: &Arc<Connection>) -> ConnectionResult<()> {
        match &self.delegate {
            Some(delegate) => delegate.connected(connection).await,
            None => Ok(()),
        }
    }

    async fn disconnected(&self, connection: &Arc<Connection>) {
        if let Some(delegate) = &self.delegate {
            delegate.disconnected(connection).await;
        }
    }

    async fn received(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()> {
        let cmd = packet.cmd();
        let Some(handler) = CommandType::from_u8(cmd).and_then(|command| self.handlers.get(&command))
        else {
            warn!(channel_id = %connection.id(), cmd, "unsupported command");
            return Self::reply_error(
                connection,
                &packet,
                ErrorCode::UnsupportedCommand,
                format!("unsupported command {cmd}"),
            );
        };

        let session_id = packet.session_id();
        let flag = packet.flag();
        // 应答需要原始帧头，处理器会消费 packet
        let header = Packet::new(cmd, flag, session_id, Vec::new());
        match handler.handle(connection, packet).await {
            Ok(()) => {
                debug!(channel_id = %connection.id(), cmd, session_id, "packet dispatched");
                Ok(())
            }
            Err(ConnectionError::Closed(channel_id)) => Err(ConnectionError::Closed(channel_id)),
            Err(err) => {
                let code = match err {
                    ConnectionError::Codec(_) => ErrorCode::DecodeFailed,
                    _ => ErrorCode::DispatchFailed,
                };
                warn!(channel_id = %connection.id(), cmd, error = %err, "dispatch failed");
                Self::reply_error(connection, &header, code, err.to_string())
            }
        }
    }

    async fn sent(&self, connection: &Arc<Connection>, packet: &Packet) {
        if let Some(delegate) = &self.delegate {
            delegate.sent(connection, packet).await;
        }
    }

    async fn caught(&self, connection: &Arc<Connection>, error: &ConnectionError) {
        if let Some(delegate) = &self.delegate {
            delegate.caught(connection, error).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::CodecError;
    use crate::message::HeartbeatMessage;
    use crate::protocol::{BaseMessage, ByteBufMessage};
    use crate::transport::MemoryChannel;

    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut reply = HeartbeatMessage::build(connection)
                .with_session_id(packet.session_id())
                .raw();
            connection.send_message(&mut reply)
        }
    }

    struct Failing;

    #[async_trait]
    impl MessageHandler for Failing {
        async fn handle(&self, _connection: &Arc<Connection>, _packet: Packet) -> ConnectionResult<()> {
            Err(CodecError::InvalidUtf8.into())
        }
    }

    #[tokio::test]
    async fn test_registered_command_is_dispatched() {
        let echo = Arc::new(Echo::default());
        let mut dispatcher = PacketDispatcher::new();
        dispatcher.register(CommandType::Heartbeat, echo.clone());
        assert!(dispatcher.is_registered(CommandType::Heartbeat));

        let channel = MemoryChannel::new();
        let connection = Connection::init(channel.clone(), false);
        let mut heartbeat = HeartbeatMessage::build(&connection).with_session_id(9);
        let packet = heartbeat.encode_body().unwrap();

        dispatcher.received(&connection, packet).await.unwrap();
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

        let written = channel.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].cmd(), CommandType::Heartbeat.cmd());
        assert_eq!(written[0].session_id(), 9);
    }

    #[tokio::test]
    async fn test_unknown_command_replies_error() {
        let dispatcher = PacketDispatcher::new();
        let channel = MemoryChannel::new();
        let connection = Connection::init(channel.clone(), false);

        dispatcher
            .received(&connection, Packet::new(0x7E, 0, 11, Vec::new()))
            .await
            .unwrap();

        let written = channel.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].cmd(), CommandType::Error.cmd());
        assert!(!written[0].is_encrypted());
        assert_eq!(written[0].session_id(), 11);

        let error = ByteBufMessage::<ErrorMessage>::decode(&connection, &written[0]).unwrap();
        assert_eq!(error.code, ErrorCode::UnsupportedCommand);
        assert_eq!(error.cmd, 0x7E);
    }

    #[tokio::test]
    async fn test_handler_failure_replies_error() {
        let mut dispatcher = PacketDispatcher::new();
        dispatcher.register(CommandType::Push, Arc::new(Failing));
        let channel = MemoryChannel::new();
        let connection = Connection::init(channel.clone(), false);

        dispatcher
            .received(&connection, Packet::new(CommandType::Push.cmd(), 0, 5, Vec::new()))
            .await
            .unwrap();

        let written = channel.written();
        let error = ByteBufMessage::<ErrorMessage>::decode(&connection, &written[0]).unwrap();
        assert_eq!(error.code, ErrorCode::DecodeFailed);
        assert_eq!(error.cmd, CommandType::Push.cmd());
        assert_eq!(written[0].session_id(), 5);
    }
}
