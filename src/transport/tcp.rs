//! TCP 长连接通道

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{Channel, ChannelId, Connection};
use crate::error::{ConnectionError, ConnectionResult};
use crate::handler::ServerHandler;
use crate::protocol::{Packet, PacketCodec};

/// TCP 通道
///
/// `write` 只把帧放进发送队列，由写任务经 [`ServerHandler::write`] 写出。
pub struct TcpChannel {
    id: ChannelId,
    remote_addr: Option<SocketAddr>,
    sender: mpsc::UnboundedSender<Packet>,
    shutdown: CancellationToken,
}

impl TcpChannel {
    fn new(remote_addr: Option<SocketAddr>) -> (Arc<Self>, mpsc::UnboundedReceiver<Packet>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            id: ChannelId::next(),
            remote_addr,
            sender,
            shutdown: CancellationToken::new(),
        });
        (channel, receiver)
    }
}

impl Channel for TcpChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn write(&self, packet: Packet) -> ConnectionResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectionError::Closed(self.id));
        }
        self.sender
            .send(packet)
            .map_err(|_| ConnectionError::Closed(self.id))
    }

    fn close(&self) {
        self.shutdown.cancel();
    }

    fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}

impl fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpChannel")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

/// 接管一条 TCP 连接
///
/// 先启动写任务并完成 `channel_active`，再启动读任务：读任务依次驱动 `channel_read`，
/// 结束时触发 `channel_inactive`（出错时先触发 `exception_caught`）；
/// 写任务把发送队列中的帧经 `ServerHandler::write` 写入 socket。
pub async fn spawn_channel(
    stream: TcpStream,
    handler: Arc<ServerHandler>,
    max_payload_size: usize,
) -> ConnectionResult<Arc<Connection>> {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "failed to set TCP_NODELAY");
    }
    let remote_addr = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let (channel, receiver) = TcpChannel::new(remote_addr);

    tokio::spawn(write_loop(
        Arc::clone(&channel),
        write_half,
        receiver,
        Arc::clone(&handler),
        max_payload_size,
    ));

    let connection = match handler.channel_active(channel.clone()).await {
        Ok(connection) => connection,
        Err(err) => {
            channel.close();
            return Err(err);
        }
    };

    tokio::spawn(read_loop(channel, read_half, handler, max_payload_size));
    Ok(connection)
}

async fn read_loop(
    channel: Arc<TcpChannel>,
    read_half: OwnedReadHalf,
    handler: Arc<ServerHandler>,
    max_payload_size: usize,
) {
    let channel_id = channel.id;
    let mut frames = FramedRead::new(read_half, PacketCodec::with_max_payload(max_payload_size));
    let outcome: ConnectionResult<()> = loop {
        tokio::select! {
            _ = channel.shutdown.cancelled() => break Ok(()),
            frame = frames.next() => match frame {
                Some(Ok(packet)) => {
                    if let Err(err) = handler.channel_read(channel_id, packet).await {
                        break Err(err);
                    }
                }
                Some(Err(err)) => break Err(err.into()),
                None => break Ok(()),
            },
        }
    };

    if let Err(err) = outcome {
        handler.exception_caught(channel_id, err).await;
    }
    channel.close();
    handler.channel_inactive(channel_id).await;
}

async fn write_loop(
    channel: Arc<TcpChannel>,
    write_half: OwnedWriteHalf,
    mut receiver: mpsc::UnboundedReceiver<Packet>,
    handler: Arc<ServerHandler>,
    max_payload_size: usize,
) {
    let channel_id = channel.id;
    let mut sink = FramedWrite::new(write_half, PacketCodec::with_max_payload(max_payload_size));

    loop {
        tokio::select! {
            biased;
            packet = receiver.recv() => {
                let Some(packet) = packet else { break };
                if let Err(err) = handler.write(channel_id, packet, &mut sink).await {
                    warn!(%channel_id, error = %err, "write failed, closing channel");
                    channel.close();
                    return;
                }
            }
            _ = channel.shutdown.cancelled() => break,
        }
    }

    // 关闭前已入队的帧（例如踢下线通知）仍然写出
    while let Ok(packet) = receiver.try_recv() {
        if let Err(err) = handler.write(channel_id, packet, &mut sink).await {
            debug!(%channel_id, error = %err, "drop queued packet on close");
            break;
        }
    }
    if let Err(err) = sink.close().await {
        debug!(%channel_id, error = %err, "socket shutdown failed");
    }
}
