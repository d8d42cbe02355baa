//! 连接管理器
//!
//! 以通道 ID 为键保存所有存活连接，供事件处理和推送查找。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::{ChannelId, Connection};
use crate::error::{ConnectionError, ConnectionResult};

/// 连接注册表
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<ChannelId, Arc<Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接
    ///
    /// 同一通道已存在连接时返回 [`ConnectionError::Duplicate`]，原连接保持不变。
    pub fn add(&self, connection: Arc<Connection>) -> ConnectionResult<()> {
        let channel_id = connection.id();
        match self.connections.entry(channel_id) {
            Entry::Occupied(_) => Err(ConnectionError::Duplicate(channel_id)),
            Entry::Vacant(entry) => {
                entry.insert(connection);
                debug!(%channel_id, "connection registered");
                Ok(())
            }
        }
    }

    pub fn get_connection(&self, channel_id: ChannelId) -> Option<Arc<Connection>> {
        self.connections
            .get(&channel_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// 移除连接，返回被移除的实例
    pub fn remove_connection(&self, channel_id: ChannelId) -> Option<Arc<Connection>> {
        self.connections
            .remove(&channel_id)
            .map(|(_, connection)| connection)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// 绑定到指定用户的全部连接
    pub fn connections_of_user(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().session_context().is_user(user_id))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 读空闲超时的连接，`default_timeout` 用于未协商心跳的连接
    pub fn idle_connections(&self, default_timeout: Duration) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| {
                let connection = entry.value();
                connection.is_read_timeout(connection.idle_timeout(default_timeout))
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 关闭并清空全部连接
    ///
    /// 返回被关闭的连接。
    pub fn destroy(&self) -> Vec<Arc<Connection>> {
        let ids: Vec<ChannelId> = self.connections.iter().map(|entry| *entry.key()).collect();
        let mut closed = Vec::with_capacity(ids.len());
        for channel_id in ids {
            if let Some((_, connection)) = self.connections.remove(&channel_id) {
                connection.close();
                closed.push(connection);
            }
        }
        info!(closed = closed.len(), "connection manager destroyed");
        closed
    }
}
