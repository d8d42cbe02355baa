//! 二进制协议模块
//!
//! 帧格式（大端序）：
//!
//! ```text
//! offset  size   field
//! 0       2      magic (0xBCC0)
//! 2       1      cmd
//! 3       1      flag (bits0-2 compressType, bit3 encrypt)
//! 4       4      sessionId
//! 8       4      length
//! 12      length payload
//! ```

pub mod buffer;
pub mod codec;
pub mod compress;
pub mod field;
pub mod message;
pub mod packet;

pub use buffer::{BufferPool, PooledBuffer};
pub use codec::PacketCodec;
pub use compress::CompressType;
pub use field::{FieldReader, FieldWriter};
pub use message::{BaseMessage, ByteBufMessage, MessageBody};
pub use packet::{Packet, assembly_flag, decompose_flag};

/// 协议魔数
pub const MAGIC: u16 = 0xBCC0;

/// 帧头长度
pub const HEADER_SIZE: usize = 12;

/// 默认最大负载（1 MiB）
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// 变长字段短长度上限，达到该值时追加 32 位扩展长度
pub const SHORT_LENGTH_LIMIT: usize = 0x7FFF;

/// 命令类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    /// 心跳
    Heartbeat = 1,
    /// 绑定用户
    BindUser = 2,
    /// 踢下线
    Kick = 3,
    /// 推送
    Push = 4,
    /// 错误响应
    Error = 5,
}

impl CommandType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Heartbeat),
            2 => Some(Self::BindUser),
            3 => Some(Self::Kick),
            4 => Some(Self::Push),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn cmd(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_roundtrip() {
        for cmd in [
            CommandType::Heartbeat,
            CommandType::BindUser,
            CommandType::Kick,
            CommandType::Push,
            CommandType::Error,
        ] {
            assert_eq!(CommandType::from_u8(cmd.cmd()), Some(cmd));
        }
        assert_eq!(CommandType::from_u8(0), None);
        assert_eq!(CommandType::from_u8(0xFF), None);
    }
}
