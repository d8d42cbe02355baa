//! 连接事件总线

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::connection::{ChannelId, Connection};

/// 连接关闭通知
#[derive(Debug, Clone)]
pub struct ConnectionCloseEvent {
    pub channel_id: ChannelId,
    /// 关闭前绑定的用户
    pub user_id: Option<String>,
    pub remote_addr: Option<SocketAddr>,
    pub closed_at: DateTime<Utc>,
}

impl ConnectionCloseEvent {
    pub fn from_connection(connection: &Connection) -> Self {
        Self {
            channel_id: connection.id(),
            user_id: connection.user_id(),
            remote_addr: connection.remote_addr(),
            closed_at: Utc::now(),
        }
    }
}

/// 事件总线
///
/// `post` 为发后即忘，不向调用方返回投递结果。
pub trait EventBus: Send + Sync {
    fn post(&self, event: ConnectionCloseEvent);
}

/// 基于 tokio broadcast 的事件总线
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<ConnectionCloseEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionCloseEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastEventBus {
    fn post(&self, event: ConnectionCloseEvent) {
        // 没有订阅者时 send 返回错误，直接丢弃
        if self.sender.send(event).is_err() {
            trace!("connection close event dropped, no subscribers");
        }
    }
}
