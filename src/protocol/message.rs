//! 消息编解码
//!
//! [`ByteBufMessage`] 固定了外层流程（缓冲、压缩、加密、组帧），
//! 各命令只需实现 [`MessageBody`] 写入/读取自己的字段。

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::{CommandType, CompressType, Packet, assembly_flag, decompose_flag};
use crate::connection::{Cipher, Connection};
use crate::error::{CodecResult, ConnectionResult};
use crate::metrics::GatewayMetrics;

/// 命令消息体
pub trait MessageBody: fmt::Debug + Send {
    /// 消息体对应的命令
    const COMMAND: CommandType;

    fn decode_body(&mut self, buf: &mut Bytes) -> CodecResult<()>;

    fn encode_body(&self, buf: &mut BytesMut) -> CodecResult<()>;
}

/// 消息公共能力
pub trait BaseMessage: Send {
    fn command_type(&self) -> u8;

    fn session_id(&self) -> u32;

    /// 原始模式：强制不加密、不压缩
    fn set_raw(&mut self, raw: bool);

    fn encode_body(&mut self) -> CodecResult<Packet>;

    fn decode_body(&mut self, packet: &Packet) -> CodecResult<()>;
}

/// 基于字节缓冲的消息
///
/// 只借用所属连接，消息的生命周期不会超过连接。
pub struct ByteBufMessage<'a, B> {
    command_type: u8,
    compress_type: CompressType,
    encrypt: bool,
    session_id: u32,
    connection: &'a Connection,
    body: B,
}

impl<'a, B: MessageBody> ByteBufMessage<'a, B> {
    pub fn new(connection: &'a Connection, body: B) -> Self {
        Self {
            command_type: B::COMMAND.cmd(),
            compress_type: CompressType::None,
            encrypt: true,
            session_id: 0,
            connection,
            body,
        }
    }

    /// 从帧解码出新消息
    pub fn decode(connection: &'a Connection, packet: &Packet) -> CodecResult<Self>
    where
        B: Default,
    {
        let mut message = Self::new(connection, B::default());
        message.decode_packet(packet)?;
        Ok(message)
    }

    fn decode_packet(&mut self, packet: &Packet) -> CodecResult<()> {
        self.command_type = packet.cmd();
        let (compress_type, encrypt) = decompose_flag(packet.flag());
        self.encrypt = encrypt;
        self.session_id = packet.session_id();

        let mut payload = packet.payload().clone();
        if self.encrypt {
            let decrypted = self.cipher().and_then(|cipher| {
                debug!(cmd = self.command_type, "decode body with cipher");
                cipher.decrypt(&payload)
            });
            match decrypted {
                Some(plain) if !plain.is_empty() => payload = Bytes::from(plain),
                _ => {
                    // 无法解密时按明文处理
                    self.encrypt = false;
                }
            }
        }

        self.compress_type = CompressType::from_u8(compress_type)?;
        let payload = self
            .compress_type
            .decompress(payload, self.connection.max_payload_size())?;

        let mut buf = payload;
        self.body.decode_body(&mut buf)
    }

    fn encode_packet(&mut self) -> CodecResult<Packet> {
        let payload = {
            let mut buf = self.connection.buffers().acquire();
            self.body.encode_body(&mut buf)?;
            Bytes::copy_from_slice(&buf)
        };

        let mut payload = self.compress_type.compress(payload)?;
        if self.encrypt {
            let encrypted = self.cipher().and_then(|cipher| {
                debug!(cmd = self.command_type, "encode body with cipher");
                cipher.encrypt(&payload)
            });
            match encrypted {
                Some(data) if !data.is_empty() => payload = Bytes::from(data),
                _ => {
                    // 清除加密标记，对端不会尝试解密
                    self.encrypt = false;
                    if self.connection.is_security() {
                        warn!(
                            channel_id = %self.connection.id(),
                            cmd = self.command_type,
                            "cipher unavailable, sending plaintext"
                        );
                        GatewayMetrics::global().cipher_fallback_total.inc();
                    }
                }
            }
        }

        Ok(Packet::new(
            self.command_type,
            assembly_flag(self.compress_type.as_u8(), self.encrypt),
            self.session_id,
            payload,
        ))
    }

    /// 编码并写入所属连接
    pub fn send(&mut self) -> ConnectionResult<()> {
        let packet = self.encode_packet()?;
        self.connection.send(packet)
    }

    pub fn cipher(&self) -> Option<Arc<dyn Cipher>> {
        self.connection.cipher()
    }

    pub fn connection(&self) -> &'a Connection {
        self.connection
    }

    pub fn compress_type(&self) -> CompressType {
        self.compress_type
    }

    pub fn set_compress_type(&mut self, compress_type: CompressType) {
        self.compress_type = compress_type;
    }

    pub fn is_encrypt(&self) -> bool {
        self.encrypt
    }

    pub fn set_encrypt(&mut self, encrypt: bool) {
        self.encrypt = encrypt;
    }

    pub fn set_session_id(&mut self, session_id: u32) {
        self.session_id = session_id;
    }

    /// 链式设置会话 ID
    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    /// 链式设置原始模式
    pub fn raw(mut self) -> Self {
        BaseMessage::set_raw(&mut self, true);
        self
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn into_body(self) -> B {
        self.body
    }
}

impl<B: MessageBody> BaseMessage for ByteBufMessage<'_, B> {
    fn command_type(&self) -> u8 {
        self.command_type
    }

    fn session_id(&self) -> u32 {
        self.session_id
    }

    fn set_raw(&mut self, raw: bool) {
        if raw {
            self.encrypt = false;
            self.compress_type = CompressType::None;
        }
    }

    fn encode_body(&mut self) -> CodecResult<Packet> {
        self.encode_packet()
    }

    fn decode_body(&mut self, packet: &Packet) -> CodecResult<()> {
        self.decode_packet(packet)
    }
}

impl<B> Deref for ByteBufMessage<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.body
    }
}

impl<B> DerefMut for ByteBufMessage<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.body
    }
}

impl<B: fmt::Debug> fmt::Debug for ByteBufMessage<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBufMessage")
            .field("command_type", &self.command_type)
            .field("compress_type", &self.compress_type)
            .field("encrypt", &self.encrypt)
            .field("session_id", &self.session_id)
            .field("channel_id", &self.connection.id())
            .field("body", &self.body)
            .finish()
    }
}
