//! 新连接的在线快照与历史回放

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use domain::{EventKey, ServerEvent, Username};

use crate::broadcaster::Broadcast;
use crate::deadline::bounded;
use crate::error::ApplicationResult;
use crate::event_log::EventLogStore;
use crate::registry::PresenceRegistry;
use crate::session::Session;

/// 一次回放已经送达的内容。
///
/// 会话先订阅广播再回放，两者之间发生的登录和消息会同时出现在回放与
/// 实时广播里。订阅流拿到水位后丢弃其中已经回放过的那一份。
#[derive(Debug, Default, Clone)]
pub struct ReplayWatermark {
    present: HashSet<Username>,
    replayed: HashSet<EventKey>,
}

impl ReplayWatermark {
    /// 广播是否已被回放覆盖，每个名字和记录只抵消一次
    pub fn covers(&mut self, broadcast: &Broadcast) -> bool {
        if let Some(key) = broadcast.record {
            return self.replayed.remove(&key);
        }
        match &broadcast.event {
            ServerEvent::UserLogin(user) => self.present.remove(&user.username),
            // 快照之后的登出让该名字的下一次登录重新可见
            ServerEvent::UserLogout(user) => {
                self.present.remove(&user.username);
                false
            }
            _ => false,
        }
    }
}

/// 只读：所有事件只发给新连接的会话本身
pub struct HistoryReplay {
    registry: Arc<dyn PresenceRegistry>,
    event_log: Arc<dyn EventLogStore>,
    history_limit: u32,
    store_timeout: Duration,
}

impl HistoryReplay {
    pub fn new(
        registry: Arc<dyn PresenceRegistry>,
        event_log: Arc<dyn EventLogStore>,
        history_limit: u32,
        store_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            event_log,
            history_limit,
            store_timeout,
        }
    }

    /// 调用方应在回放前订阅广播，并把返回的水位交给该订阅
    pub async fn on_connect(&self, session: &Session) -> ApplicationResult<ReplayWatermark> {
        let mut watermark = ReplayWatermark::default();

        match bounded("registry.list_all", self.store_timeout, self.registry.list_all()).await {
            Ok(names) => {
                for name in names {
                    watermark.present.insert(name.clone());
                    session.emit(ServerEvent::user_login(name)).await?;
                }
            }
            Err(err) => {
                tracing::warn!(session_id = %session.id(), error = %err, "presence snapshot skipped");
            }
        }

        let recent = bounded(
            "event_log.query_recent",
            self.store_timeout,
            self.event_log.query_recent(self.history_limit),
        )
        .await;
        match recent {
            Ok(records) => {
                tracing::debug!(session_id = %session.id(), count = records.len(), "replaying history");
                for record in records.iter().rev() {
                    watermark.replayed.insert(record.key);
                    session.emit(ServerEvent::from(record)).await?;
                }
            }
            Err(err) => {
                tracing::warn!(session_id = %session.id(), error = %err, "history replay skipped");
            }
        }
        Ok(watermark)
    }
}
