//! 传输层
//!
//! - [`TcpChannel`] / [`spawn_channel`]：TCP 长连接通道及其读写任务
//! - [`GatewayServer`]：接入监听服务
//! - [`MemoryChannel`]：内存通道，记录写出的帧，用于测试和进程内对接

mod server;
mod tcp;

pub use server::GatewayServer;
pub use tcp::{TcpChannel, spawn_channel};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::{Channel, ChannelId};
use crate::error::{ConnectionError, ConnectionResult};
use crate::protocol::Packet;

/// 内存通道
pub struct MemoryChannel {
    id: ChannelId,
    remote_addr: Option<SocketAddr>,
    open: AtomicBool,
    written: Mutex<Vec<Packet>>,
}

impl MemoryChannel {
    pub fn new() -> Arc<Self> {
        Self::with_remote_addr(None)
    }

    pub fn with_remote_addr(remote_addr: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            remote_addr,
            open: AtomicBool::new(true),
            written: Mutex::new(Vec::new()),
        })
    }

    /// 已写出帧的快照
    pub fn written(&self) -> Vec<Packet> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 取出并清空已写出的帧
    pub fn take_written(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.written.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Channel for MemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn write(&self, packet: Packet) -> ConnectionResult<()> {
        if !self.is_open() {
            return Err(ConnectionError::Closed(self.id));
        }
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
