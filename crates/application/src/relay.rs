//! 聊天消息转发：先持久化，再广播

use std::sync::Arc;
use std::time::Duration;

use domain::{MessageText, NewEventRecord, ServerEvent};

use crate::broadcaster::{Broadcast, EventBroadcaster};
use crate::clock::Clock;
use crate::deadline::bounded;
use crate::error::ApplicationResult;
use crate::event_log::EventLogStore;
use crate::session::Session;

pub struct MessageRelay {
    event_log: Arc<dyn EventLogStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl MessageRelay {
    pub fn new(
        event_log: Arc<dyn EventLogStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            event_log,
            broadcaster,
            clock,
            store_timeout,
        }
    }

    /// 持久化失败时不广播，保证实时视图与回放一致
    pub async fn post_chat_message(
        &self,
        session: &Session,
        text: String,
    ) -> ApplicationResult<()> {
        let author = session.with_state(|state| state.require_identity("chat-message").cloned())?;
        let text = MessageText::new(text)?;

        let live = ServerEvent::live_chat(text.as_str(), author.clone());
        let record = NewEventRecord::chat(text, author.clone(), self.clock.now());
        let key = record.key;
        let id = bounded(
            "event_log.append",
            self.store_timeout,
            self.event_log.append(record),
        )
        .await?;
        tracing::debug!(session_id = %session.id(), username = %author, record_id = %id, "chat message stored");

        if let Err(err) = self
            .broadcaster
            .broadcast(Broadcast::to_all(live).for_record(key))
            .await {
            tracing::warn!(record_id = %id, error = %err, "chat message stored but not broadcast");
        }
        Ok(())
    }
}
