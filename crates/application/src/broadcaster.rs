use async_trait::async_trait;
use domain::{EventKey, ServerEvent, SessionId};
use thiserror::Error;

use crate::local_broadcast::EventStream;

/// 广播信封：事件本身以及需要排除的发送方会话
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Broadcast {
    pub exclude: Option<SessionId>,
    pub event: ServerEvent,
    /// 事件对应的日志记录，新连接据此跳过已回放的内容
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<EventKey>,
    /// `update-typing` 快照的版本号，订阅方丢弃比已收到的更旧的快照
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing_revision: Option<u64>,
}

impl Broadcast {
    /// 发往所有已连接会话，包括发送方
    pub fn to_all(event: ServerEvent) -> Self {
        Self {
            exclude: None,
            event,
            record: None,
            typing_revision: None,
        }
    }

    /// 发往除发送方之外的所有会话
    pub fn to_others(sender: SessionId, event: ServerEvent) -> Self {
        Self {
            exclude: Some(sender),
            ..Self::to_all(event)
        }
    }

    pub fn for_record(mut self, key: EventKey) -> Self {
        self.record = Some(key);
        self
    }

    pub fn at_typing_revision(mut self, revision: u64) -> Self {
        self.typing_revision = Some(revision);
        self
    }

    pub fn is_visible_to(&self, session: SessionId) -> bool {
        self.exclude != Some(session)
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 向所有在线会话扇出事件。
///
/// 只保证送达广播瞬间已订阅的会话；之后才连接的会话依靠历史回放补齐。
#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    async fn broadcast(&self, payload: Broadcast) -> Result<(), BroadcastError>;

    /// 为会话创建订阅，会话自己排除的广播会被过滤掉
    fn subscribe(&self, session: SessionId) -> EventStream;
}
