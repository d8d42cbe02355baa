//! 命令消息定义

mod bind;
mod error;
mod heartbeat;
mod kick;
mod push;

pub use bind::BindUserMessage;
pub use error::{ErrorCode, ErrorMessage};
pub use heartbeat::HeartbeatMessage;
pub use kick::KickUserMessage;
pub use push::PushMessage;
