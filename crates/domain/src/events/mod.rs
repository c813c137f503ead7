//! 客户端与服务端之间的事件协议
//!
//! 每个 WebSocket 文本帧承载一个 `{"event": <名称>, "data": <载荷>}` JSON 对象，
//! 事件名称与既有客户端保持一致。

pub mod chat_event;

// 重新导出事件类型
pub use chat_event::*;
