//! 用户路由

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::PushResult;

/// 网关节点地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAndPort {
    pub host: String,
    pub port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// 解析 `host:port`
    pub fn parse(value: &str) -> Option<Self> {
        let (host, port) = value.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port.parse().ok()?))
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 用户某个设备所在的网关
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRouter {
    pub user_id: String,
    pub device_id: String,
    pub host_and_port: HostAndPort,
}

/// 用户到网关节点的查询
#[async_trait]
pub trait RemoteRouterManager: Send + Sync {
    /// 查询用户全部设备所在的网关
    async fn lookup_all(&self, user_id: &str) -> PushResult<Vec<RemoteRouter>>;
}

/// 进程内路由表
#[derive(Debug, Default)]
pub struct InMemoryRouterManager {
    routers: DashMap<String, Vec<RemoteRouter>>,
}

impl InMemoryRouterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记路由，同一设备的旧路由被替换
    pub fn register(&self, router: RemoteRouter) {
        let mut entry = self.routers.entry(router.user_id.clone()).or_default();
        entry.retain(|existing| existing.device_id != router.device_id);
        entry.push(router);
    }

    pub fn unregister(&self, user_id: &str, device_id: &str) {
        if let Some(mut entry) = self.routers.get_mut(user_id) {
            entry.retain(|existing| existing.device_id != device_id);
        }
        self.routers.remove_if(user_id, |_, routers| routers.is_empty());
    }
}

#[async_trait]
impl RemoteRouterManager for InMemoryRouterManager {
    async fn lookup_all(&self, user_id: &str) -> PushResult<Vec<RemoteRouter>> {
        Ok(self
            .routers
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}
