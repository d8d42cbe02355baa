//! 协议帧
//!
//! Packet 构建后不可变，每次编解码都会新建，不在调用之间复用。

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{HEADER_SIZE, MAGIC};
use crate::error::{CodecError, CodecResult};

const COMPRESS_MASK: u8 = 0x07;
const ENCRYPT_BIT: u8 = 0x08;

/// 组装 flag：低 3 位为压缩类型，第 3 位为加密标记
pub fn assembly_flag(compress_type: u8, encrypt: bool) -> u8 {
    let flag = compress_type & COMPRESS_MASK;
    if encrypt { flag | ENCRYPT_BIT } else { flag }
}

/// 拆解 flag，返回 (压缩类型, 是否加密)
pub fn decompose_flag(flag: u8) -> (u8, bool) {
    (flag & COMPRESS_MASK, (flag >> 3) & 1 == 1)
}

/// 线上传输的帧
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    cmd: u8,
    flag: u8,
    session_id: u32,
    payload: Bytes,
}

impl Packet {
    pub fn new(cmd: u8, flag: u8, session_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            cmd,
            flag,
            session_id,
            payload: payload.into(),
        }
    }

    pub fn magic(&self) -> u16 {
        MAGIC
    }

    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    pub fn flag(&self) -> u8 {
        self.flag
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// 负载长度，恒等于 `payload().len()`
    pub fn length(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn is_encrypted(&self) -> bool {
        decompose_flag(self.flag).1
    }

    pub fn compress_type(&self) -> u8 {
        decompose_flag(self.flag).0
    }

    /// 编码后的总长度
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// 写入一帧
    pub fn encode_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u16(MAGIC);
        dst.put_u8(self.cmd);
        dst.put_u8(self.flag);
        dst.put_u32(self.session_id);
        dst.put_u32(self.length());
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf.freeze()
    }

    /// 从连续内存中解码一帧，多余的尾部字节被忽略
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        let header = Header::parse(data)?;
        let total = header.frame_len();
        if data.len() < total {
            return Err(CodecError::Truncated {
                needed: total,
                remaining: data.len(),
            });
        }
        Ok(header.into_packet(Bytes::copy_from_slice(&data[HEADER_SIZE..total])))
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("cmd", &self.cmd)
            .field("flag", &format_args!("{:#04x}", self.flag))
            .field("session_id", &self.session_id)
            .field("length", &self.payload.len())
            .finish()
    }
}

/// 帧头
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub cmd: u8,
    pub flag: u8,
    pub session_id: u32,
    pub length: u32,
}

impl Header {
    /// 解析帧头，校验魔数
    pub(crate) fn parse(mut data: &[u8]) -> CodecResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: HEADER_SIZE,
                remaining: data.len(),
            });
        }
        let magic = data.get_u16();
        if magic != MAGIC {
            return Err(CodecError::BadMagic { found: magic });
        }
        Ok(Self {
            cmd: data.get_u8(),
            flag: data.get_u8(),
            session_id: data.get_u32(),
            length: data.get_u32(),
        })
    }

    pub(crate) fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }

    pub(crate) fn into_packet(self, payload: Bytes) -> Packet {
        Packet {
            cmd: self.cmd,
            flag: self.flag,
            session_id: self.session_id,
            payload,
        }
    }
}
