use bytes::{Bytes, BytesMut};

use crate::connection::Connection;
use crate::error::CodecResult;
use crate::protocol::{ByteBufMessage, CommandType, MessageBody};

/// 心跳，消息体为空
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeartbeatMessage;

impl HeartbeatMessage {
    pub fn build(connection: &Connection) -> ByteBufMessage<'_, Self> {
        ByteBufMessage::new(connection, Self)
    }
}

impl MessageBody for HeartbeatMessage {
    const COMMAND: CommandType = CommandType::Heartbeat;

    fn decode_body(&mut self, _buf: &mut Bytes) -> CodecResult<()> {
        Ok(())
    }

    fn encode_body(&self, _buf: &mut BytesMut) -> CodecResult<()> {
        Ok(())
    }
}
