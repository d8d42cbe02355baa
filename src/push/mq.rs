//! 消息队列对接

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::error::PushResult;

/// 订阅回调
pub trait MqMessageReceiver: Send + Sync {
    fn receive(&self, topic: &str, message: Bytes);
}

/// 消息队列客户端
pub trait MqClient: Send + Sync {
    fn subscribe(&self, topic: &str, receiver: Arc<dyn MqMessageReceiver>) -> PushResult<()>;
}

/// 业务分发处理器
#[async_trait]
pub trait DispatcherHandler: Send + Sync {
    async fn on_dispatch(&self, message: &[u8]);
}

/// 进程内消息队列，`publish` 同步投递给当前订阅者
#[derive(Default)]
pub struct InMemoryMqClient {
    subscribers: DashMap<String, Vec<Arc<dyn MqMessageReceiver>>>,
}

impl InMemoryMqClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布消息，返回收到消息的订阅者数量
    pub fn publish(&self, topic: &str, message: impl Into<Bytes>) -> usize {
        let receivers = match self.subscribers.get(topic) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!(topic, "publish without subscribers");
                return 0;
            }
        };
        let message = message.into();
        for receiver in &receivers {
            receiver.receive(topic, message.clone());
        }
        receivers.len()
    }
}

impl MqClient for InMemoryMqClient {
    fn subscribe(&self, topic: &str, receiver: Arc<dyn MqMessageReceiver>) -> PushResult<()> {
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(receiver);
        Ok(())
    }
}
