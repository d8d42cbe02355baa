use bytes::{Bytes, BytesMut};

use crate::connection::Connection;
use crate::error::CodecResult;
use crate::protocol::{ByteBufMessage, CommandType, FieldReader, FieldWriter, MessageBody};

/// 错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 0,
    UnsupportedCommand = 1,
    DecodeFailed = 2,
    DispatchFailed = 3,
}

impl ErrorCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            1 => Self::UnsupportedCommand,
            2 => Self::DecodeFailed,
            3 => Self::DispatchFailed,
            _ => Self::Unknown,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    /// 出错请求的命令
    pub cmd: u8,
    pub reason: String,
}

impl Default for ErrorMessage {
    fn default() -> Self {
        Self {
            code: ErrorCode::Unknown,
            cmd: 0,
            reason: String::new(),
        }
    }
}

impl ErrorMessage {
    pub fn build(connection: &Connection) -> ByteBufMessage<'_, Self> {
        ByteBufMessage::new(connection, Self::default())
    }
}

impl ByteBufMessage<'_, ErrorMessage> {
    pub fn code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    pub fn cmd(mut self, cmd: u8) -> Self {
        self.cmd = cmd;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

impl MessageBody for ErrorMessage {
    const COMMAND: CommandType = CommandType::Error;

    fn decode_body(&mut self, buf: &mut Bytes) -> CodecResult<()> {
        self.code = ErrorCode::from_u16(buf.read_short()? as u16);
        self.cmd = buf.read_byte()?;
        self.reason = buf.read_string()?;
        Ok(())
    }

    fn encode_body(&self, buf: &mut BytesMut) -> CodecResult<()> {
        buf.write_short(self.code as u16 as i16);
        buf.write_byte(self.cmd);
        buf.write_string(Some(self.reason.as_str()))
    }
}
