//! 通道事件处理
//!
//! - [`ServerHandler`]：把底层通道事件转换为连接的创建、销毁和业务回调
//! - [`PacketDispatcher`]：按命令类型把入站帧分发给业务处理器

mod dispatcher;
mod server_handler;

pub use dispatcher::{MessageHandler, PacketDispatcher};
pub use server_handler::ServerHandler;

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::{ConnectionError, ConnectionResult};
use crate::protocol::Packet;

/// 业务层通道回调
///
/// 同一通道的回调按事件顺序串行调用，不同通道之间并发。
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// 连接已注册
    async fn connected(&self, connection: &Arc<Connection>) -> ConnectionResult<()>;

    /// 连接已从管理器移除
    async fn disconnected(&self, connection: &Arc<Connection>);

    /// 收到一帧
    async fn received(&self, connection: &Arc<Connection>, packet: Packet)
    -> ConnectionResult<()>;

    /// 一帧即将写出，不能阻塞写入
    async fn sent(&self, connection: &Arc<Connection>, packet: &Packet);

    /// 通道异常，连接已移除
    async fn caught(&self, connection: &Arc<Connection>, error: &ConnectionError);
}
