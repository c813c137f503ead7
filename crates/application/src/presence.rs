//! 登录与登出协议

use std::sync::Arc;
use std::time::Duration;

use domain::{EventKind, NewEventRecord, ServerEvent, SessionPhase, Username};

use crate::broadcaster::{Broadcast, EventBroadcaster};
use crate::clock::Clock;
use crate::deadline::bounded;
use crate::error::{ApplicationError, ApplicationResult};
use crate::event_log::EventLogStore;
use crate::registry::PresenceRegistry;
use crate::session::Session;
use crate::typing::TypingTracker;

pub fn logged_in_private_text(name: &Username) -> String {
    format!("You logged in as \"{name}\"")
}

pub fn logged_in_text(name: &Username) -> String {
    format!("User \"{name}\" logged in")
}

pub fn disconnected_text(name: &Username) -> String {
    format!("User \"{name}\" disconnected")
}

pub struct PresenceCoordinator {
    registry: Arc<dyn PresenceRegistry>,
    event_log: Arc<dyn EventLogStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    typing: Arc<TypingTracker>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl PresenceCoordinator {
    pub fn new(
        registry: Arc<dyn PresenceRegistry>,
        event_log: Arc<dyn EventLogStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
        typing: Arc<TypingTracker>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            event_log,
            broadcaster,
            typing,
            clock,
            store_timeout,
        }
    }

    /// 为会话申领显示名。
    ///
    /// 名字无效、已被占用或会话不是匿名状态时拒绝且没有副作用；
    /// 注册表不可用时返回 `StoreUnavailable`。
    pub async fn login(
        &self,
        session: &Session,
        candidate: Option<String>,
    ) -> ApplicationResult<Username> {
        let name = Username::parse(candidate.unwrap_or_default())?;

        let phase = session.phase();
        if phase != SessionPhase::Anonymous {
            return Err(ApplicationError::InvalidState {
                operation: "login",
                phase,
            });
        }

        let inserted = bounded(
            "registry.try_insert",
            self.store_timeout,
            self.registry.try_insert(&name),
        )
        .await?;
        if !inserted {
            tracing::warn!(session_id = %session.id(), username = %name, "login rejected, name taken");
            return Err(ApplicationError::NameTaken(name));
        }

        // 插入注册表期间会话可能已经断开
        if let Err(err) = session.with_state(|state| state.identify(name.clone())) {
            self.release(&name).await;
            return Err(err.into());
        }
        tracing::info!(session_id = %session.id(), username = %name, "user logged in");

        let private = ServerEvent::service(EventKind::Login, logged_in_private_text(&name));
        if let Err(err) = session.emit(private).await {
            tracing::warn!(session_id = %session.id(), error = %err, "failed to deliver login confirmation");
        }

        let text = logged_in_text(&name);
        let record = NewEventRecord::service(EventKind::Login, text.clone(), self.clock.now());
        self.broadcast(
            Broadcast::to_others(session.id(), ServerEvent::service(EventKind::Login, text))
                .for_record(record.key),
        )
        .await;
        self.broadcast(Broadcast::to_others(
            session.id(),
            ServerEvent::user_login(name.clone()),
        ))
        .await;

        self.record(record).await;
        Ok(name)
    }

    /// 会话结束时的清理，对同一个会话只生效一次。
    ///
    /// 匿名会话直接进入终态；已登录会话依次通知其他会话、释放名字、
    /// 记录登出、广播 `user-logout` 并清除正在输入状态。
    /// 任何一步失败都只记录日志，后续步骤照常执行。
    pub async fn logout(&self, session: &Session) {
        let name = match session.with_state(|state| state.terminate()) {
            Ok(Some(name)) => name,
            Ok(None) => {
                tracing::debug!(session_id = %session.id(), "anonymous session closed");
                return;
            }
            Err(_) => return,
        };

        let text = disconnected_text(&name);
        let record = NewEventRecord::service(EventKind::Logout, text.clone(), self.clock.now());
        self.broadcast(
            Broadcast::to_others(session.id(), ServerEvent::service(EventKind::Logout, text))
                .for_record(record.key),
        )
        .await;

        self.release(&name).await;

        self.record(record).await;

        self.broadcast(Broadcast::to_all(ServerEvent::user_logout(name.clone())))
            .await;

        self.typing.forget(&name).await;
        tracing::info!(session_id = %session.id(), username = %name, "user logged out");
    }

    async fn release(&self, name: &Username) {
        let removed = bounded(
            "registry.remove",
            self.store_timeout,
            self.registry.remove(name),
        )
        .await;
        if let Err(err) = removed {
            tracing::error!(username = %name, error = %err, "failed to release name");
        }
    }

    async fn record(&self, record: NewEventRecord) {
        let kind = record.kind;
        let appended = bounded(
            "event_log.append",
            self.store_timeout,
            self.event_log.append(record),
        )
        .await;
        if let Err(err) = appended {
            tracing::warn!(%kind, error = %err, "service message not persisted");
        }
    }

    async fn broadcast(&self, payload: Broadcast) {
        let event = payload.event.name();
        if let Err(err) = self.broadcaster.broadcast(payload).await {
            tracing::warn!(event, error = %err, "broadcast failed");
        }
    }
}
