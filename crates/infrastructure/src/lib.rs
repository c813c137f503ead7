//! 基础设施层实现。
//!
//! 提供 PostgreSQL 事件日志、Redis 在线用户注册表与正在输入集合、Redis 跨实例广播，
//! 实现应用层定义的接口，并按配置装配。

pub mod broadcast;
pub mod builder;
pub mod event_log;
pub mod migrations;
pub mod presence;
pub mod retry;

pub use broadcast::RedisEventBroadcaster;
pub use builder::{Infrastructure, InfrastructureError};
pub use event_log::{create_pg_pool, PgEventLogStore};
pub use migrations::MIGRATOR;
pub use presence::{RedisPresenceRegistry, RedisTypingRegistry};
pub use retry::{retry_async, Backoff, RetryConfig};
