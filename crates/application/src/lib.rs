//! 应用层实现。
//!
//! 会话生命周期、在线名单、正在输入状态、消息转发与历史回放的用例，
//! 以及对外部协作方（注册表、事件日志、广播器）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod deadline;
pub mod error;
pub mod event_log;
pub mod local_broadcast;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod replay;
pub mod services;
pub mod session;
pub mod typing;

pub use broadcaster::{Broadcast, BroadcastError, EventBroadcaster};
pub use clock::{Clock, SystemClock};
pub use error::{ApplicationError, ApplicationResult};
pub use event_log::{memory::MemoryEventLogStore, rank_authors, AuthorCount, EventLogStore};
pub use local_broadcast::{EventStream, LocalEventBroadcaster};
pub use presence::PresenceCoordinator;
pub use registry::{
    memory::{MemoryPresenceRegistry, MemoryTypingRegistry},
    PresenceRegistry, TypingRegistry, TypingSnapshot,
};
pub use relay::MessageRelay;
pub use replay::{HistoryReplay, ReplayWatermark};
pub use services::{ChatService, ChatServiceDependencies, ChatSettings, OpenedSession};
pub use session::{Session, DEFAULT_SESSION_BUFFER};
pub use typing::TypingTracker;
