//! 连接模块
//!
//! [`Connection`] 把一个网络通道与协议层状态（会话上下文、加密器、读写时间戳）绑定在一起，
//! 由 [`ConnectionManager`] 在通道存活期间独占持有。

mod channel;
mod cipher;
mod manager;
mod session;

pub use channel::{Channel, ChannelId};
pub use cipher::{Cipher, KEY_SIZE, NONCE_SIZE, TAG_SIZE, XChaChaCipher};
pub use manager::ConnectionManager;
pub use session::SessionContext;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::{ConnectionError, ConnectionResult};
use crate::protocol::{BaseMessage, BufferPool, DEFAULT_MAX_PAYLOAD_SIZE, Packet};

/// 连接构造参数
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// 编码缓冲池，通常由同一服务的所有连接共享
    pub buffers: Arc<BufferPool>,
    /// 解压后允许的最大负载
    pub max_payload_size: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            buffers: BufferPool::new(16),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// 服务端连接
pub struct Connection {
    channel: Arc<dyn Channel>,
    security: bool,
    session_context: RwLock<SessionContext>,
    created_at: Instant,
    /// 相对 `created_at` 的毫秒数
    last_read_ms: AtomicU64,
    last_write_ms: AtomicU64,
    buffers: Arc<BufferPool>,
    max_payload_size: usize,
}

impl Connection {
    /// 绑定新接入的通道
    ///
    /// 每个通道只调用一次；返回的连接交给 [`ConnectionManager`] 持有。
    pub fn init(channel: Arc<dyn Channel>, is_security: bool) -> Arc<Self> {
        Self::init_with(channel, is_security, ConnectionOptions::default())
    }

    pub fn init_with(
        channel: Arc<dyn Channel>,
        is_security: bool,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            security: is_security,
            session_context: RwLock::new(SessionContext::default()),
            created_at: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            last_write_ms: AtomicU64::new(0),
            buffers: options.buffers,
            max_payload_size: options.max_payload_size,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.channel.remote_addr()
    }

    /// 通道是否要求加密
    pub fn is_security(&self) -> bool {
        self.security
    }

    pub fn buffers(&self) -> &Arc<BufferPool> {
        &self.buffers
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn session_context(&self) -> SessionContext {
        self.session_context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_session_context(&self, context: SessionContext) {
        *self
            .session_context
            .write()
            .unwrap_or_else(PoisonError::into_inner) = context;
    }

    /// 原地修改会话上下文
    pub fn update_session_context(&self, f: impl FnOnce(&mut SessionContext)) {
        let mut guard = self
            .session_context
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard);
    }

    /// 当前会话的加密器，没有时返回 `None`
    pub fn cipher(&self) -> Option<Arc<dyn Cipher>> {
        self.session_context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cipher
            .clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.session_context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .user_id
            .clone()
    }

    pub fn update_last_read_time(&self) {
        self.last_read_ms.store(self.elapsed_ms(), Ordering::Release);
    }

    pub fn update_last_write_time(&self) {
        self.last_write_ms.store(self.elapsed_ms(), Ordering::Release);
    }

    pub fn last_read_time(&self) -> Instant {
        self.created_at + Duration::from_millis(self.last_read_ms.load(Ordering::Acquire))
    }

    pub fn last_write_time(&self) -> Instant {
        self.created_at + Duration::from_millis(self.last_write_ms.load(Ordering::Acquire))
    }

    /// 距上次读取是否超过 `timeout`
    pub fn is_read_timeout(&self, timeout: Duration) -> bool {
        self.last_read_time().elapsed() > timeout
    }

    /// 连接的读空闲上限：协商过心跳时为三个心跳周期，否则取 `default`
    pub fn idle_timeout(&self, default: Duration) -> Duration {
        match self.session_context().heartbeat {
            0 => default,
            heartbeat => Duration::from_millis(u64::from(heartbeat) * 3),
        }
    }

    pub fn is_write_timeout(&self, timeout: Duration) -> bool {
        self.last_write_time().elapsed() > timeout
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    /// 写入一帧
    pub fn send(&self, packet: Packet) -> ConnectionResult<()> {
        if !self.channel.is_open() {
            return Err(ConnectionError::Closed(self.id()));
        }
        self.channel.write(packet)
    }

    /// 编码消息并写入
    pub fn send_message(&self, message: &mut dyn BaseMessage) -> ConnectionResult<()> {
        let packet = message.encode_body()?;
        self.send(packet)
    }

    pub fn close(&self) {
        self.channel.close();
    }

    fn elapsed_ms(&self) -> u64 {
        self.created_at.elapsed().as_millis() as u64
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("channel_id", &self.id())
            .field("remote_addr", &self.remote_addr())
            .field("security", &self.security)
            .field("user_id", &self.user_id())
            .field("connected", &self.is_connected())
            .finish()
    }
}
