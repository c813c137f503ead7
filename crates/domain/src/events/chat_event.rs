//! 聊天事件
//!
//! `ServerEvent` 由服务端发往客户端，`ClientEvent` 由客户端发往服务端。

use serde::{Deserialize, Serialize};

use crate::entities::event_record::{EventKind, EventRecord};
use crate::value_objects::{Timestamp, Username};

/// 在线实时发送的聊天消息在 `type` 字段上的取值
pub const LIVE_CHAT_TYPE: &str = "chat-message";

/// 身份对象，在 `user-login` / `user-logout` / `update-typing` 中使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPayload {
    pub username: Username,
}

impl From<Username> for UserPayload {
    fn from(username: Username) -> Self {
        Self { username }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessagePayload {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<Username>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResultPayload {
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// 服务端 → 客户端事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserLogin(UserPayload),
    UserLogout(UserPayload),
    ServiceMessage(ServiceMessagePayload),
    ChatMessage(ChatMessagePayload),
    UpdateTyping(Vec<UserPayload>),
    LoginResult(LoginResultPayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn user_login(username: Username) -> Self {
        ServerEvent::UserLogin(username.into())
    }

    pub fn user_logout(username: Username) -> Self {
        ServerEvent::UserLogout(username.into())
    }

    pub fn service(kind: EventKind, text: impl Into<String>) -> Self {
        ServerEvent::ServiceMessage(ServiceMessagePayload {
            text: text.into(),
            kind,
        })
    }

    /// 实时广播的聊天消息
    pub fn live_chat(text: impl Into<String>, username: Username) -> Self {
        ServerEvent::ChatMessage(ChatMessagePayload {
            text: text.into(),
            username: Some(username),
            kind: Some(LIVE_CHAT_TYPE.to_owned()),
            date: None,
        })
    }

    pub fn update_typing(typing: impl IntoIterator<Item = Username>) -> Self {
        ServerEvent::UpdateTyping(typing.into_iter().map(UserPayload::from).collect())
    }

    pub fn login_result(accepted: bool) -> Self {
        ServerEvent::LoginResult(LoginResultPayload { accepted })
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        ServerEvent::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
            retryable,
        })
    }

    /// 事件名称，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserLogin(_) => "user-login",
            ServerEvent::UserLogout(_) => "user-logout",
            ServerEvent::ServiceMessage(_) => "service-message",
            ServerEvent::ChatMessage(_) => "chat-message",
            ServerEvent::UpdateTyping(_) => "update-typing",
            ServerEvent::LoginResult(_) => "login-result",
            ServerEvent::Error(_) => "error",
        }
    }
}

/// 回放：聊天记录作为 `chat-message`，其余类别作为 `service-message`
impl From<&EventRecord> for ServerEvent {
    fn from(record: &EventRecord) -> Self {
        if record.kind.is_chat() {
            ServerEvent::ChatMessage(ChatMessagePayload {
                text: record.text.clone(),
                username: record.author.clone(),
                kind: Some(record.kind.as_str().to_owned()),
                date: Some(record.created_at),
            })
        } else {
            ServerEvent::service(record.kind, record.text.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// 客户端 → 服务端事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    UserLogin(LoginRequest),
    ChatMessage(ChatRequest),
    StartTyping,
    StopTyping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::{EventKey, RecordId};
    use chrono::Utc;
    use serde_json::json;

    fn name(value: &str) -> Username {
        Username::parse(value).unwrap()
    }

    #[test]
    fn server_events_use_wire_names() {
        let value = serde_json::to_value(ServerEvent::user_login(name("alice"))).unwrap();
        assert_eq!(value, json!({"event": "user-login", "data": {"username": "alice"}}));

        let value = serde_json::to_value(ServerEvent::update_typing(vec![name("a"), name("b")]))
            .unwrap();
        assert_eq!(
            value,
            json!({"event": "update-typing", "data": [{"username": "a"}, {"username": "b"}]})
        );

        let value =
            serde_json::to_value(ServerEvent::service(EventKind::Login, "User \"a\" logged in"))
                .unwrap();
        assert_eq!(
            value,
            json!({"event": "service-message", "data": {"text": "User \"a\" logged in", "type": "login"}})
        );
    }

    #[test]
    fn live_chat_carries_chat_message_type() {
        let value = serde_json::to_value(ServerEvent::live_chat("hi", name("carol"))).unwrap();
        assert_eq!(
            value,
            json!({"event": "chat-message", "data": {"text": "hi", "username": "carol", "type": "chat-message"}})
        );
    }

    #[test]
    fn client_events_parse() {
        let login: ClientEvent =
            serde_json::from_value(json!({"event": "user-login", "data": {"username": "bob"}}))
                .unwrap();
        assert_eq!(
            login,
            ClientEvent::UserLogin(LoginRequest {
                username: Some("bob".into())
            })
        );

        let typing: ClientEvent = serde_json::from_value(json!({"event": "start-typing"})).unwrap();
        assert_eq!(typing, ClientEvent::StartTyping);

        let chat: ClientEvent =
            serde_json::from_value(json!({"event": "chat-message", "data": {"text": "yo"}})).unwrap();
        assert_eq!(chat, ClientEvent::ChatMessage(ChatRequest { text: "yo".into() }));

        let anonymous: ClientEvent =
            serde_json::from_value(json!({"event": "user-login", "data": {}})).unwrap();
        assert_eq!(anonymous, ClientEvent::UserLogin(LoginRequest::default()));
    }

    #[test]
    fn replayed_records_split_by_kind() {
        let now = Utc::now();
        let chat = EventRecord {
            id: RecordId(1),
            key: EventKey::random(),
            text: "hi".into(),
            author: Some(name("carol")),
            kind: EventKind::Chat,
            created_at: now,
        };
        match ServerEvent::from(&chat) {
            ServerEvent::ChatMessage(payload) => {
                assert_eq!(payload.text, "hi");
                assert_eq!(payload.username, Some(name("carol")));
                assert_eq!(payload.date, Some(now));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let logout = EventRecord {
            id: RecordId(2),
            key: EventKey::random(),
            text: "User \"carol\" disconnected".into(),
            author: None,
            kind: EventKind::Logout,
            created_at: now,
        };
        assert_eq!(
            ServerEvent::from(&logout),
            ServerEvent::service(EventKind::Logout, "User \"carol\" disconnected")
        );
    }
}
