//! 领域实体定义
//!
//! 包含事件日志记录与会话状态机。

pub mod event_record;
pub mod session;

// 重新导出核心实体
pub use event_record::{EventKind, EventRecord, NewEventRecord};
pub use session::{SessionPhase, SessionState};
