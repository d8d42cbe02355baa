//! 服务生命周期
//!
//! 所有长期运行的子系统（接入监听、推送客户端等）共用同一套启动/停止状态机：
//! 状态转换只通过一次 compare-and-set 完成，并发的 start/start、start/stop、stop/stop
//! 中只有一方执行 `init`/`destroy`，另一方得到确定的重复错误。

use std::sync::atomic::{AtomicU8, Ordering};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};

const STOPPED: u8 = 0;
const STARTED: u8 = 1;
/// `destroy` 执行中，对外仍视为未运行
const STOPPING: u8 = 2;

/// 生命周期状态
#[derive(Debug)]
pub struct ServiceState {
    state: AtomicU8,
}

impl ServiceState {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(STOPPED),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STARTED
    }

    fn try_transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    fn is_stopping(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPING
    }

    fn set_stopped(&self) {
        self.state.store(STOPPED, Ordering::Release);
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}

/// 启停结果回调
pub trait Callback: Send {
    fn on_success(&self);

    fn on_failure(&self, error: &ServiceError);
}

/// 可启停的服务
///
/// 实现方只需提供 `state`、`init` 和 `destroy`。`start_async`/`stop_async` 在调用线程上
/// 同步执行 `init`/`destroy`，返回的 future 总是已完成。
pub trait Service: Send + Sync {
    /// 服务名称，用于日志和错误信息
    fn name(&self) -> &str;

    fn state(&self) -> &ServiceState;

    fn init(&self) -> ServiceResult<()>;

    fn destroy(&self) -> ServiceResult<()>;

    /// 启动服务
    ///
    /// `init` 失败时状态保持为已启动，调用方需要调用 `stop` 清理。
    /// `destroy` 尚未结束时启动得到 `IllegalState`。
    fn start_async(&self, callback: Option<Box<dyn Callback>>) -> BoxFuture<'static, ServiceResult<bool>> {
        let result = if self.state().try_transition(STOPPED, STARTED) {
            match self.init() {
                Ok(()) => {
                    info!(service = self.name(), "service started");
                    Ok(true)
                }
                Err(err) => {
                    warn!(service = self.name(), error = %err, "service init failed");
                    Err(err)
                }
            }
        } else if self.state().is_stopping() {
            Err(ServiceError::IllegalState(format!(
                "service {} is stopping",
                self.name()
            )))
        } else {
            Err(ServiceError::DuplicateStart(format!(
                "service {} already started",
                self.name()
            )))
        };
        complete(result, callback)
    }

    /// 停止服务
    fn stop_async(&self, callback: Option<Box<dyn Callback>>) -> BoxFuture<'static, ServiceResult<bool>> {
        let state = self.state();
        if state.is_stopped() {
            let err = ServiceError::IllegalState(format!("service {} was not running", self.name()));
            return complete(Err(err), callback);
        }

        let result = if state.try_transition(STARTED, STOPPING) {
            let outcome = self.destroy();
            state.set_stopped();
            match outcome {
                Ok(()) => {
                    info!(service = self.name(), "service stopped");
                    Ok(true)
                }
                Err(err) => {
                    warn!(service = self.name(), error = %err, "service destroy failed");
                    Err(err)
                }
            }
        } else {
            Err(ServiceError::DuplicateStop(format!(
                "service {} already stopped",
                self.name()
            )))
        };
        complete(result, callback)
    }

    /// 阻塞等待启动完成
    fn start(&self) -> ServiceResult<bool> {
        futures::executor::block_on(self.start_async(None))
    }

    /// 阻塞等待停止完成
    fn stop(&self) -> ServiceResult<bool> {
        futures::executor::block_on(self.stop_async(None))
    }

    fn is_running(&self) -> bool {
        self.state().is_running()
    }
}

fn complete(
    result: ServiceResult<bool>,
    callback: Option<Box<dyn Callback>>,
) -> BoxFuture<'static, ServiceResult<bool>> {
    if let Some(callback) = callback {
        match &result {
            Ok(_) => callback.on_success(),
            Err(err) => callback.on_failure(err),
        }
    }
    future::ready(result).boxed()
}
