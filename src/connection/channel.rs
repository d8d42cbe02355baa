//! 网络通道抽象

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ConnectionResult;
use crate::protocol::Packet;

static CHANNEL_SEQ: AtomicU64 = AtomicU64::new(1);

/// 通道标识，进程内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// 分配下一个通道 ID
    pub fn next() -> Self {
        Self(CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed))
    }

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// 底层网络通道
///
/// `write` 只负责入队，不阻塞调用线程。
pub trait Channel: fmt::Debug + Send + Sync {
    fn id(&self) -> ChannelId;

    fn remote_addr(&self) -> Option<SocketAddr>;

    fn write(&self, packet: Packet) -> ConnectionResult<()>;

    fn close(&self);

    fn is_open(&self) -> bool;
}
