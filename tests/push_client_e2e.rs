//! 推送客户端经真实 TCP 连接把推送送到网关

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flare_gateway_core::config::{PushClientConfig, ServerConfig};
use flare_gateway_core::connection::{Connection, ConnectionManager};
use flare_gateway_core::error::{ConnectionResult, PushError};
use flare_gateway_core::event::BroadcastEventBus;
use flare_gateway_core::handler::{MessageHandler, PacketDispatcher, ServerHandler};
use flare_gateway_core::message::PushMessage;
use flare_gateway_core::protocol::{ByteBufMessage, CommandType, Packet};
use flare_gateway_core::push::{
    ConnectionFactory, GatewayConnectionFactory, HostAndPort, InMemoryMqClient,
    InMemoryRouterManager, PushClient, PushContext, RemoteRouter,
};
use flare_gateway_core::service::Service;
use flare_gateway_core::transport::GatewayServer;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// 网关侧把收到的推送转给测试
struct Capture {
    sender: mpsc::UnboundedSender<PushMessage>,
}

#[async_trait]
impl MessageHandler for Capture {
    async fn handle(&self, connection: &Arc<Connection>, packet: Packet) -> ConnectionResult<()> {
        let push = ByteBufMessage::<PushMessage>::decode(connection, &packet)?.into_body();
        let _ = self.sender.send(push);
        Ok(())
    }
}

fn handler_with(dispatcher: PacketDispatcher) -> Arc<ServerHandler> {
    Arc::new(ServerHandler::new(
        Arc::new(ConnectionManager::new()),
        Arc::new(dispatcher),
        Arc::new(BroadcastEventBus::default()),
        false,
    ))
}

async fn wait_for_count(manager: &ConnectionManager, expected: usize) {
    timeout(WAIT, async {
        while manager.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

fn start_gateway() -> (GatewayServer, mpsc::UnboundedReceiver<PushMessage>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let mut dispatcher = PacketDispatcher::new();
    dispatcher.register(CommandType::Push, Arc::new(Capture { sender }));

    let config = ServerConfig {
        address: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    };
    let server = GatewayServer::new(config, handler_with(dispatcher), Handle::current());
    server.start().unwrap();
    (server, receiver)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_reaches_gateway() {
    let (gateway, mut pushes) = start_gateway();
    let addr = gateway.local_addr().unwrap();
    let host_and_port = HostAndPort::new(addr.ip().to_string(), addr.port());

    let config = PushClientConfig {
        connect_timeout_ms: 1500,
        ..PushClientConfig::default()
    };
    let factory = Arc::new(GatewayConnectionFactory::from_config(
        handler_with(PacketDispatcher::new()),
        &config,
    ));
    assert_eq!(factory.connect_timeout(), Duration::from_millis(1500));
    let connection = factory.connect(&host_and_port).await.unwrap();
    assert!(connection.is_connected());
    // 已有连接直接复用
    let again = factory.connect(&host_and_port).await.unwrap();
    assert!(Arc::ptr_eq(&connection, &again));

    let router = Arc::new(InMemoryRouterManager::new());
    router.register(RemoteRouter {
        user_id: "u-1".to_string(),
        device_id: "phone".to_string(),
        host_and_port: host_and_port.clone(),
    });
    let client = PushClient::new(
        router,
        Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
        Arc::new(InMemoryMqClient::new()),
        Handle::current(),
        &config,
    );

    let sent = client
        .push(&PushContext::to_user("u-1", &b"hello"[..]))
        .await
        .unwrap();
    assert_eq!(sent, 1);

    let received = timeout(WAIT, pushes.recv()).await.unwrap().unwrap();
    assert_eq!(received.user_id, "u-1");
    assert!(!received.broadcast);
    assert_eq!(received.content.as_ref(), b"hello");

    assert_eq!(client.push(&PushContext::broadcast(&b"all"[..])).await.unwrap(), 1);
    let received = timeout(WAIT, pushes.recv()).await.unwrap().unwrap();
    assert!(received.broadcast);

    assert!(matches!(
        client.push(&PushContext::to_user("nobody", &b"x"[..])).await,
        Err(PushError::NoRoute(_))
    ));

    gateway.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_connect_keeps_one_connection() {
    let (gateway, _pushes) = start_gateway();
    let addr = gateway.local_addr().unwrap();
    let host_and_port = HostAndPort::new(addr.ip().to_string(), addr.port());

    let client_manager = Arc::new(ConnectionManager::new());
    let client_handler = Arc::new(ServerHandler::new(
        Arc::clone(&client_manager),
        Arc::new(PacketDispatcher::new()),
        Arc::new(BroadcastEventBus::default()),
        false,
    ));
    let factory =
        GatewayConnectionFactory::from_config(client_handler, &PushClientConfig::default());

    let (first, second) = tokio::join!(
        factory.connect(&host_and_port),
        factory.connect(&host_and_port)
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_connected());
    assert_eq!(factory.all_connections().len(), 1);

    // 多拨出的连接被关闭，两端都只剩一条
    wait_for_count(&client_manager, 1).await;
    wait_for_count(gateway.manager(), 1).await;
    assert_eq!(client_manager.all_connections()[0].id(), first.id());

    gateway.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closed_gateway_connection_is_dropped() {
    let (gateway, _pushes) = start_gateway();
    let addr = gateway.local_addr().unwrap();
    let host_and_port = HostAndPort::new(addr.ip().to_string(), addr.port());

    let factory = GatewayConnectionFactory::new(
        handler_with(PacketDispatcher::new()),
        Duration::from_secs(1),
    );
    let connection = factory.connect(&host_and_port).await.unwrap();

    gateway.stop().unwrap();
    timeout(WAIT, async {
        while connection.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(factory.get_connection(&host_and_port).is_none());
    assert!(factory.all_connections().is_empty());
}

#[tokio::test]
async fn test_connect_refused() {
    // 先占用再释放一个端口，保证无人监听
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let factory = GatewayConnectionFactory::new(
        handler_with(PacketDispatcher::new()),
        Duration::from_secs(1),
    );
    let result = factory
        .connect(&HostAndPort::new(addr.ip().to_string(), addr.port()))
        .await;
    assert!(matches!(result, Err(PushError::Other(_))));
    assert!(factory.all_connections().is_empty());
}
