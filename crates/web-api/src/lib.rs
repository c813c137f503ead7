//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 聊天端点、健康检查与只读统计接口，
//! 请求委托给应用层的 `ChatService`。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::{error_event, ApiError};
pub use routes::router;
pub use state::AppState;
pub use ws_connection::WebSocketConnection;
