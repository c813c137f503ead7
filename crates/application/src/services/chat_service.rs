use std::sync::Arc;
use std::time::Duration;

use domain::{ServerEvent, Username};
use tokio::sync::mpsc;

use crate::{
    broadcaster::EventBroadcaster,
    clock::Clock,
    deadline::bounded,
    error::ApplicationResult,
    event_log::{AuthorCount, EventLogStore},
    local_broadcast::EventStream,
    presence::PresenceCoordinator,
    registry::{PresenceRegistry, TypingRegistry},
    relay::MessageRelay,
    replay::{HistoryReplay, ReplayWatermark},
    session::{Session, DEFAULT_SESSION_BUFFER},
    typing::TypingTracker,
};

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub history_limit: u32,
    pub store_timeout: Duration,
    pub session_buffer: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_limit: 50,
            store_timeout: Duration::from_millis(2000),
            session_buffer: DEFAULT_SESSION_BUFFER,
        }
    }
}

pub struct ChatServiceDependencies {
    pub registry: Arc<dyn PresenceRegistry>,
    pub typing: Arc<dyn TypingRegistry>,
    pub event_log: Arc<dyn EventLogStore>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

/// 新建立的会话及其两路出站事件
pub struct OpenedSession {
    pub session: Session,
    /// 只发给本会话的事件（回放、登录确认）
    pub private: mpsc::Receiver<ServerEvent>,
    /// 广播给本会话的事件
    pub broadcasts: EventStream,
}

pub struct ChatService {
    presence: PresenceCoordinator,
    typing: Arc<TypingTracker>,
    relay: MessageRelay,
    replay: HistoryReplay,
    event_log: Arc<dyn EventLogStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        let ChatServiceDependencies {
            registry,
            typing,
            event_log,
            broadcaster,
            clock,
            settings,
        } = deps;

        let typing = Arc::new(TypingTracker::new(
            typing,
            broadcaster.clone(),
            settings.store_timeout,
        ));
        let presence = PresenceCoordinator::new(
            registry.clone(),
            event_log.clone(),
            broadcaster.clone(),
            typing.clone(),
            clock.clone(),
            settings.store_timeout,
        );
        let relay = MessageRelay::new(
            event_log.clone(),
            broadcaster.clone(),
            clock,
            settings.store_timeout,
        );
        let replay = HistoryReplay::new(
            registry,
            event_log.clone(),
            settings.history_limit,
            settings.store_timeout,
        );

        Self {
            presence,
            typing,
            relay,
            replay,
            event_log,
            broadcaster,
            settings,
        }
    }

    /// 创建匿名会话并立即订阅广播，之后再做回放
    pub fn open_session(&self) -> OpenedSession {
        let (session, private) = Session::new(self.settings.session_buffer);
        let broadcasts = self.broadcaster.subscribe(session.id());
        tracing::info!(session_id = %session.id(), "session opened");
        OpenedSession {
            session,
            private,
            broadcasts,
        }
    }

    /// 回放在线快照与历史，返回的水位应交给该会话的广播订阅
    pub async fn on_connect(&self, session: &Session) -> ApplicationResult<ReplayWatermark> {
        self.replay.on_connect(session).await
    }

    pub async fn login(
        &self,
        session: &Session,
        username: Option<String>,
    ) -> ApplicationResult<Username> {
        self.presence.login(session, username).await
    }

    pub async fn post_chat_message(&self, session: &Session, text: String) -> ApplicationResult<()> {
        self.relay.post_chat_message(session, text).await
    }

    pub async fn start_typing(&self, session: &Session) -> ApplicationResult<()> {
        self.typing.start_typing(session).await
    }

    pub async fn stop_typing(&self, session: &Session) -> ApplicationResult<()> {
        self.typing.stop_typing(session).await
    }

    /// 连接结束时调用，重复调用无副作用
    pub async fn disconnect(&self, session: &Session) {
        self.presence.logout(session).await;
        tracing::info!(session_id = %session.id(), "session closed");
    }

    /// 发送聊天消息最多的作者
    pub async fn top_chatters(&self, limit: usize) -> ApplicationResult<Vec<AuthorCount>> {
        let mut counts = bounded(
            "event_log.count_chat_by_author",
            self.settings.store_timeout,
            self.event_log.count_chat_by_author(),
        )
        .await?;
        counts.truncate(limit);
        Ok(counts)
    }

    pub async fn typing_snapshot(&self) -> ApplicationResult<Vec<Username>> {
        self.typing.snapshot().await
    }
}
