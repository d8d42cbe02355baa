//! 推送客户端
//!
//! 业务方通过 [`PushClient`] 把内容推给用户：先经 [`RemoteRouterManager`] 查到用户所在的网关，
//! 再通过 [`ConnectionFactory`] 拿到到该网关的连接发送 `PushMessage`。
//! 网关不可达时只记录错误并跳过，不做重试。

mod factory;
mod mq;
mod router;

pub use factory::{ConnectionFactory, GatewayConnectionFactory};
pub use mq::{DispatcherHandler, InMemoryMqClient, MqClient, MqMessageReceiver};
pub use router::{HostAndPort, InMemoryRouterManager, RemoteRouter, RemoteRouterManager};

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::PushClientConfig;
use crate::error::{PushError, PushResult};
use crate::message::PushMessage;

/// 推送请求
#[derive(Debug, Clone, Default)]
pub struct PushContext {
    /// 单个目标用户
    pub user_id: Option<String>,
    /// 批量目标用户
    pub user_ids: Vec<String>,
    /// 是否广播给全部网关
    pub broadcast: bool,
    pub content: Bytes,
}

impl PushContext {
    pub fn to_user(user_id: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn to_users<I, S>(user_ids: I, content: impl Into<Bytes>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_ids: user_ids.into_iter().map(Into::into).collect(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn broadcast(content: impl Into<Bytes>) -> Self {
        Self {
            broadcast: true,
            content: content.into(),
            ..Self::default()
        }
    }
}

/// 推送客户端
pub struct PushClient {
    router: Arc<dyn RemoteRouterManager>,
    factory: Arc<dyn ConnectionFactory>,
    mq: Arc<dyn MqClient>,
    runtime: Handle,
    dispatch_topic: String,
    topics: DashMap<String, Arc<NestedMessageReceiver>>,
}

impl PushClient {
    pub fn new(
        router: Arc<dyn RemoteRouterManager>,
        factory: Arc<dyn ConnectionFactory>,
        mq: Arc<dyn MqClient>,
        runtime: Handle,
        config: &PushClientConfig,
    ) -> Self {
        Self {
            router,
            factory,
            mq,
            runtime,
            dispatch_topic: config.dispatch_topic.clone(),
            topics: DashMap::new(),
        }
    }

    /// 推送内容
    ///
    /// 优先级：单个用户、用户列表、广播。返回成功写出的网关帧数。
    pub async fn push(&self, context: &PushContext) -> PushResult<usize> {
        if let Some(user_id) = &context.user_id {
            let routers = self.router.lookup_all(user_id).await?;
            if routers.is_empty() {
                return Err(PushError::NoRoute(user_id.clone()));
            }
            return Ok(self.push_to_routers(user_id, &routers, &context.content));
        }

        if !context.user_ids.is_empty() {
            let mut sent = 0;
            for user_id in &context.user_ids {
                match self.router.lookup_all(user_id).await {
                    Ok(routers) if routers.is_empty() => {
                        debug!(user_id = %user_id, "no route for user, skipped");
                    }
                    Ok(routers) => sent += self.push_to_routers(user_id, &routers, &context.content),
                    Err(err) => warn!(user_id = %user_id, error = %err, "router lookup failed"),
                }
            }
            return Ok(sent);
        }

        if context.broadcast {
            return Ok(self.broadcast(&context.content));
        }

        Err(PushError::MissingTarget)
    }

    fn push_to_routers(&self, user_id: &str, routers: &[RemoteRouter], content: &Bytes) -> usize {
        let mut sent = 0;
        for router in routers {
            let Some(connection) = self.factory.get_connection(&router.host_and_port) else {
                error!(
                    user_id,
                    gateway = %router.host_and_port,
                    "can not push message to gateway server, is it working"
                );
                continue;
            };

            let mut message = PushMessage::build(&connection)
                .user_id(user_id)
                .content(content.clone());
            match message.send() {
                Ok(()) => sent += 1,
                Err(err) => error!(
                    user_id,
                    gateway = %router.host_and_port,
                    error = %err,
                    "push to gateway failed"
                ),
            }
        }
        sent
    }

    fn broadcast(&self, content: &Bytes) -> usize {
        let mut sent = 0;
        for connection in self.factory.all_connections() {
            let mut message = PushMessage::build(&connection)
                .broadcast(true)
                .content(content.clone());
            match message.send() {
                Ok(()) => sent += 1,
                Err(err) => error!(
                    channel_id = %connection.id(),
                    error = %err,
                    "broadcast to gateway failed"
                ),
            }
        }
        sent
    }

    /// 在默认分发主题上注册业务处理器
    pub fn register_handler(&self, handler: Arc<dyn DispatcherHandler>) -> PushResult<()> {
        let topic = self.dispatch_topic.clone();
        self.register_topic_handler(&topic, handler)
    }

    /// 在指定主题上注册业务处理器，同一主题只保留第一个处理器
    pub fn register_topic_handler(
        &self,
        topic: &str,
        handler: Arc<dyn DispatcherHandler>,
    ) -> PushResult<()> {
        let receiver = match self.topics.entry(topic.to_string()) {
            Entry::Occupied(_) => {
                warn!(topic, "dispatcher handler already registered, ignored");
                return Ok(());
            }
            Entry::Vacant(entry) => {
                let receiver = Arc::new(NestedMessageReceiver {
                    handler,
                    runtime: self.runtime.clone(),
                });
                entry.insert(Arc::clone(&receiver));
                receiver
            }
        };

        info!(topic, "register dispatcher handler");
        self.mq.subscribe(topic, receiver)
    }
}

/// 把消息队列回调转到运行时上执行
struct NestedMessageReceiver {
    handler: Arc<dyn DispatcherHandler>,
    runtime: Handle,
}

impl MqMessageReceiver for NestedMessageReceiver {
    fn receive(&self, topic: &str, message: Bytes) {
        debug!(topic, size = message.len(), "dispatch message received");
        let handler = Arc::clone(&self.handler);
        self.runtime.spawn(async move {
            handler.on_dispatch(&message).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::connection::{Channel, Connection};
    use crate::protocol::{ByteBufMessage, CommandType};
    use crate::transport::MemoryChannel;

    /// 固定连接表
    #[derive(Default)]
    struct StaticFactory {
        connections: DashMap<HostAndPort, Arc<Connection>>,
    }

    impl ConnectionFactory for StaticFactory {
        fn get_connection(&self, host_and_port: &HostAndPort) -> Option<Arc<Connection>> {
            self.connections
                .get(host_and_port)
                .map(|entry| Arc::clone(entry.value()))
        }

        fn all_connections(&self) -> Vec<Arc<Connection>> {
            self.connections
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect()
        }
    }

    struct Fixture {
        client: PushClient,
        routers: Arc<InMemoryRouterManager>,
        mq: Arc<InMemoryMqClient>,
        gw1: Arc<MemoryChannel>,
        gw2: Arc<MemoryChannel>,
    }

    fn fixture() -> Fixture {
        let routers = Arc::new(InMemoryRouterManager::new());
        let factory = Arc::new(StaticFactory::default());
        let mq = Arc::new(InMemoryMqClient::new());

        let gw1 = MemoryChannel::new();
        let gw2 = MemoryChannel::new();
        factory.connections.insert(
            HostAndPort::new("gw1", 3000),
            Connection::init(gw1.clone(), false),
        );
        factory.connections.insert(
            HostAndPort::new("gw2", 3000),
            Connection::init(gw2.clone(), false),
        );

        let client = PushClient::new(
            routers.clone(),
            factory,
            mq.clone(),
            Handle::current(),
            &PushClientConfig::default(),
        );
        Fixture {
            client,
            routers,
            mq,
            gw1,
            gw2,
        }
    }

    fn route(user: &str, device: &str, host: &str) -> RemoteRouter {
        RemoteRouter {
            user_id: user.to_string(),
            device_id: device.to_string(),
            host_and_port: HostAndPort::new(host, 3000),
        }
    }

    #[tokio::test]
    async fn test_push_to_user_gateways() {
        let f = fixture();
        f.routers.register(route("alice", "phone", "gw1"));
        f.routers.register(route("alice", "pc", "gw2"));

        let sent = f
            .client
            .push(&PushContext::to_user("alice", &b"hi"[..]))
            .await
            .unwrap();
        assert_eq!(sent, 2);

        let packets = f.gw1.written();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].cmd(), CommandType::Push.cmd());

        let connection = Connection::init(MemoryChannel::new(), false);
        let message = ByteBufMessage::<PushMessage>::decode(&connection, &packets[0]).unwrap();
        assert_eq!(message.user_id, "alice");
        assert!(!message.broadcast);
        assert_eq!(message.content.as_ref(), b"hi");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_skipped() {
        let f = fixture();
        f.routers.register(route("bob", "phone", "gw1"));
        f.routers.register(route("bob", "pad", "gw-missing"));

        let sent = f
            .client
            .push(&PushContext::to_user("bob", &b"x"[..]))
            .await
            .unwrap();
        assert_eq!(sent, 1);

        f.gw2.close();
        f.routers.register(route("bob", "pc", "gw2"));
        let sent = f
            .client
            .push(&PushContext::to_user("bob", &b"x"[..]))
            .await
            .unwrap();
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn test_push_without_route() {
        let f = fixture();
        let result = f.client.push(&PushContext::to_user("nobody", &b"x"[..])).await;
        assert!(matches!(result, Err(PushError::NoRoute(_))));

        let result = f.client.push(&PushContext::default()).await;
        assert!(matches!(result, Err(PushError::MissingTarget)));
    }

    #[tokio::test]
    async fn test_push_to_user_list() {
        let f = fixture();
        f.routers.register(route("alice", "phone", "gw1"));
        f.routers.register(route("carol", "phone", "gw2"));

        let sent = f
            .client
            .push(&PushContext::to_users(["alice", "carol", "dave"], &b"batch"[..]))
            .await
            .unwrap();
        assert_eq!(sent, 2);
        assert_eq!(f.gw1.written().len(), 1);
        assert_eq!(f.gw2.written().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_gateway() {
        let f = fixture();
        let sent = f
            .client
            .push(&PushContext::broadcast(&b"notice"[..]))
            .await
            .unwrap();
        assert_eq!(sent, 2);

        let connection = Connection::init(MemoryChannel::new(), false);
        let message =
            ByteBufMessage::<PushMessage>::decode(&connection, &f.gw1.written()[0]).unwrap();
        assert!(message.broadcast);
    }

    struct ForwardingHandler {
        calls: AtomicUsize,
        sender: mpsc::UnboundedSender<Vec<u8>>,
    }

    #[async_trait]
    impl DispatcherHandler for ForwardingHandler {
        async fn on_dispatch(&self, message: &[u8]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.sender.send(message.to_vec());
        }
    }

    #[tokio::test]
    async fn test_register_handler_dispatches_on_runtime() {
        let f = fixture();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let handler = Arc::new(ForwardingHandler {
            calls: AtomicUsize::new(0),
            sender,
        });
        f.client.register_handler(handler.clone()).unwrap();
        // 重复注册被忽略
        f.client.register_handler(handler.clone()).unwrap();

        let delivered = f.mq.publish("piccolo_dispatch_message", &b"job"[..]);
        assert_eq!(delivered, 1);

        let message = receiver.recv().await.unwrap();
        assert_eq!(message, b"job");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
