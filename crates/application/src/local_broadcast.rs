// 进程内广播器实现
use crate::broadcaster::{Broadcast, BroadcastError, EventBroadcaster};
use crate::replay::ReplayWatermark;
use async_trait::async_trait;
use domain::{ServerEvent, SessionId};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

#[derive(Clone)]
pub struct LocalEventBroadcaster {
    sender: broadcast::Sender<Broadcast>,
}

impl LocalEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 投递到本实例的订阅者，跨实例转发时也走这里
    pub fn deliver(&self, payload: Broadcast) -> Result<usize, BroadcastError> {
        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }
        self.sender
            .send(payload)
            .map_err(|err| BroadcastError::failed(err.to_string()))
    }
}

impl Default for LocalEventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBroadcaster for LocalEventBroadcaster {
    async fn broadcast(&self, payload: Broadcast) -> Result<(), BroadcastError> {
        self.deliver(payload)?;
        Ok(())
    }

    fn subscribe(&self, session: SessionId) -> EventStream {
        EventStream::new(self.sender.subscribe(), session)
    }
}

// 单个会话的广播流
pub struct EventStream {
    receiver: broadcast::Receiver<Broadcast>,
    session: SessionId,
    covered: ReplayWatermark,
    typing_revision: u64,
}

impl EventStream {
    pub fn new(receiver: broadcast::Receiver<Broadcast>, session: SessionId) -> Self {
        Self {
            receiver,
            session,
            covered: ReplayWatermark::default(),
            typing_revision: 0,
        }
    }

    /// 之后丢弃已经由回放送达的广播
    pub fn skip_replayed(&mut self, watermark: ReplayWatermark) {
        self.covered = watermark;
    }

    /// 等待下一条对本会话可见的事件，通道关闭时返回 `None`
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(broadcast) => {
                    if self.admits(&broadcast) {
                        return Some(broadcast.event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(session_id = %self.session, skipped, "broadcast receiver lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞读取已到达的下一条可见事件
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(broadcast) => {
                    if self.admits(&broadcast) {
                        return Some(broadcast.event);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(session_id = %self.session, skipped, "broadcast receiver lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn admits(&mut self, broadcast: &Broadcast) -> bool {
        if !broadcast.is_visible_to(self.session) {
            return false;
        }
        if let Some(revision) = broadcast.typing_revision {
            if revision < self.typing_revision {
                tracing::debug!(session_id = %self.session, revision, "stale typing snapshot dropped");
                return false;
            }
            self.typing_revision = revision;
        }
        if self.covered.covers(broadcast) {
            tracing::debug!(session_id = %self.session, event = broadcast.event.name(), "already replayed");
            return false;
        }
        true
    }
}
