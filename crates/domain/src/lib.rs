//! 聊天室在线状态与广播协调的核心领域模型
//!
//! 包含会话状态机、显示名、事件日志记录以及客户端/服务端之间的事件协议。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
