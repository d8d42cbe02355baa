//! Flare Gateway Core 错误类型
//!
//! - 协议层（帧、字段编解码）错误
//! - 连接层错误
//! - 服务生命周期错误
//! - 推送客户端错误

use thiserror::Error;

use crate::connection::ChannelId;

/// 协议编解码错误
#[derive(Debug, Error)]
pub enum CodecError {
    /// 魔数不匹配
    #[error("bad magic: expected 0xBCC0, found {found:#06X}")]
    BadMagic { found: u16 },

    /// 剩余字节不足
    #[error("truncated input: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// 长度前缀溢出
    #[error("length prefix overflow: {0}")]
    LengthOverflow(u64),

    /// 负载超过上限
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// 不支持的压缩类型
    #[error("unsupported compress type: {0}")]
    UnsupportedCompression(u8),

    /// 压缩/解压失败
    #[error("compression error: {0}")]
    Compression(String),

    /// 字符串不是合法 UTF-8
    #[error("invalid utf-8 string field")]
    InvalidUtf8,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 协议层结果类型
pub type CodecResult<T> = Result<T, CodecError>;

/// 连接层错误
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// 同一通道重复注册
    #[error("connection already registered for channel {0}")]
    Duplicate(ChannelId),

    /// 通道已关闭
    #[error("channel {0} is closed")]
    Closed(ChannelId),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// 连接层结果类型
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// 服务生命周期错误
#[derive(Debug, Error)]
pub enum ServiceError {
    /// 重复启动
    #[error("duplicate start: {0}")]
    DuplicateStart(String),

    /// 重复停止
    #[error("duplicate stop: {0}")]
    DuplicateStop(String),

    /// 非法状态（服务未运行）
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// 初始化失败
    #[error("init failed: {0}")]
    Init(String),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 服务生命周期结果类型
pub type ServiceResult<T> = Result<T, ServiceError>;

/// 推送客户端错误
#[derive(Debug, Error)]
pub enum PushError {
    /// 推送上下文既没有用户也不是广播
    #[error("push context has no target")]
    MissingTarget,

    /// 找不到用户所在网关
    #[error("no route for user {0}")]
    NoRoute(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 推送客户端结果类型
pub type PushResult<T> = Result<T, PushError>;
