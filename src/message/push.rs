use bytes::{Bytes, BytesMut};

use crate::connection::Connection;
use crate::error::CodecResult;
use crate::protocol::{ByteBufMessage, CommandType, FieldReader, FieldWriter, MessageBody};

/// 推送内容
///
/// 由推送客户端发往网关节点，再由网关转发给目标用户的连接。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushMessage {
    /// 目标用户，广播时为空
    pub user_id: String,
    pub broadcast: bool,
    pub content: Bytes,
}

impl PushMessage {
    pub fn build(connection: &Connection) -> ByteBufMessage<'_, Self> {
        ByteBufMessage::new(connection, Self::default())
    }
}

impl ByteBufMessage<'_, PushMessage> {
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = content.into();
        self
    }
}

impl MessageBody for PushMessage {
    const COMMAND: CommandType = CommandType::Push;

    fn decode_body(&mut self, buf: &mut Bytes) -> CodecResult<()> {
        self.user_id = buf.read_string()?;
        self.broadcast = buf.read_boolean()?;
        self.content = buf.read_bytes()?;
        Ok(())
    }

    fn encode_body(&self, buf: &mut BytesMut) -> CodecResult<()> {
        buf.write_string(Some(self.user_id.as_str()))?;
        buf.write_boolean(self.broadcast);
        buf.write_bytes(&self.content)
    }
}
