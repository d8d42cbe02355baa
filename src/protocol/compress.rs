//! 负载压缩

use bytes::Bytes;

use crate::error::{CodecError, CodecResult};

const ZSTD_LEVEL: i32 = 3;

/// 压缩类型（flag 低 3 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressType {
    #[default]
    None = 0,
    Zstd = 1,
}

impl CompressType {
    pub fn from_u8(v: u8) -> CodecResult<Self> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Zstd),
            other => Err(CodecError::UnsupportedCompression(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn compress(self, data: Bytes) -> CodecResult<Bytes> {
        match self {
            Self::None => Ok(data),
            Self::Zstd => zstd::bulk::compress(&data, ZSTD_LEVEL)
                .map(Bytes::from)
                .map_err(|e| CodecError::Compression(e.to_string())),
        }
    }

    pub fn decompress(self, data: Bytes, max_size: usize) -> CodecResult<Bytes> {
        match self {
            Self::None => Ok(data),
            Self::Zstd => zstd::bulk::decompress(&data, max_size)
                .map(Bytes::from)
                .map_err(|e| CodecError::Compression(e.to_string())),
        }
    }
}
