//! 事件日志记录
//!
//! 聊天消息与服务消息（登录/登出通知）都以不可变记录的形式追加到事件日志中，
//! 新连接建立时按时间顺序回放最近的记录。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{EventKey, MessageText, RecordId, Timestamp, Username};

/// 事件记录的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    Chat,
    Service,
    Login,
    Logout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "chat",
            EventKind::Service => "service",
            EventKind::Login => "login",
            EventKind::Logout => "logout",
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, EventKind::Chat)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(EventKind::Chat),
            "service" => Ok(EventKind::Service),
            "login" => Ok(EventKind::Login),
            "logout" => Ok(EventKind::Logout),
            other => Err(DomainError::UnknownEventKind(other.to_owned())),
        }
    }
}

/// 待追加的记录，尚未分配存储标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEventRecord {
    pub key: EventKey,
    pub text: String,
    pub author: Option<Username>,
    pub kind: EventKind,
    pub created_at: Timestamp,
}

impl NewEventRecord {
    /// 用户发送的聊天消息
    pub fn chat(text: MessageText, author: Username, created_at: Timestamp) -> Self {
        Self {
            key: EventKey::random(),
            text: text.into_inner(),
            author: Some(author),
            kind: EventKind::Chat,
            created_at,
        }
    }

    /// 系统生成的服务消息，没有作者
    pub fn service(kind: EventKind, text: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            key: EventKey::random(),
            text: text.into(),
            author: None,
            kind,
            created_at,
        }
    }

    pub fn into_record(self, id: RecordId) -> EventRecord {
        EventRecord {
            id,
            key: self.key,
            text: self.text,
            author: self.author,
            kind: self.kind,
            created_at: self.created_at,
        }
    }
}

/// 已持久化的记录，创建后不可修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: RecordId,
    pub key: EventKey,
    pub text: String,
    pub author: Option<Username>,
    pub kind: EventKind,
    pub created_at: Timestamp,
}
