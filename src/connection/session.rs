//! 连接会话上下文

use std::sync::Arc;

use super::Cipher;

/// 连接协商后的会话状态
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// 协商得到的加密器，缺失时不加密
    pub cipher: Option<Arc<dyn Cipher>>,
    /// 绑定的用户
    pub user_id: Option<String>,
    /// 绑定的设备
    pub device_id: Option<String>,
    /// 协商的心跳间隔（毫秒），0 表示使用服务端默认值
    pub heartbeat: u32,
}

impl SessionContext {
    pub fn with_cipher(mut self, cipher: Option<Arc<dyn Cipher>>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_heartbeat(mut self, heartbeat_ms: u32) -> Self {
        self.heartbeat = heartbeat_ms;
        self
    }

    /// 是否已绑定用户
    pub fn is_bound(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn is_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}
