use bytes::{Bytes, BytesMut};

use crate::connection::Connection;
use crate::error::CodecResult;
use crate::protocol::{ByteBufMessage, CommandType, FieldReader, FieldWriter, MessageBody};

/// 客户端绑定用户
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BindUserMessage {
    pub user_id: String,
    pub device_id: String,
}

impl BindUserMessage {
    pub fn build(connection: &Connection) -> ByteBufMessage<'_, Self> {
        ByteBufMessage::new(connection, Self::default())
    }
}

impl ByteBufMessage<'_, BindUserMessage> {
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }
}

impl MessageBody for BindUserMessage {
    const COMMAND: CommandType = CommandType::BindUser;

    fn decode_body(&mut self, buf: &mut Bytes) -> CodecResult<()> {
        self.user_id = buf.read_string()?;
        self.device_id = buf.read_string()?;
        Ok(())
    }

    fn encode_body(&self, buf: &mut BytesMut) -> CodecResult<()> {
        buf.write_string(Some(self.user_id.as_str()))?;
        buf.write_string(Some(self.device_id.as_str()))
    }
}
