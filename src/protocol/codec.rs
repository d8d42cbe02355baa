//! 流式帧编解码（tokio-util codec）

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::packet::Header;
use super::{DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, Packet};
use crate::error::CodecError;

/// 长连接上的帧编解码器
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_payload_size: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// 指定最大负载
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::parse(&src[..])?;
        let payload_len = header.length as usize;
        if payload_len > self.max_payload_size {
            return Err(CodecError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload_size,
            });
        }

        let total_len = header.frame_len();
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(payload_len).freeze();
        Ok(Some(header.into_packet(payload)))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload().len() > self.max_payload_size {
            return Err(CodecError::PayloadTooLarge {
                size: item.payload().len(),
                max: self.max_payload_size,
            });
        }
        item.encode_to(dst);
        Ok(())
    }
}
