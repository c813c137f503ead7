//! 正在输入状态跟踪

use std::sync::Arc;
use std::time::Duration;

use domain::{ServerEvent, SessionPhase, Username};

use crate::broadcaster::{Broadcast, EventBroadcaster};
use crate::deadline::bounded;
use crate::error::{ApplicationError, ApplicationResult};
use crate::registry::TypingRegistry;
use crate::session::Session;

/// 维护正在输入的显示名集合，每次变更后向所有会话广播完整列表。
///
/// 集合保存在可跨实例共享的 `TypingRegistry` 中；广播带上快照的版本号，
/// 并发变更时订阅方只保留最新的快照。
pub struct TypingTracker {
    registry: Arc<dyn TypingRegistry>,
    broadcaster: Arc<dyn EventBroadcaster>,
    store_timeout: Duration,
}

impl TypingTracker {
    pub fn new(
        registry: Arc<dyn TypingRegistry>,
        broadcaster: Arc<dyn EventBroadcaster>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            store_timeout,
        }
    }

    pub async fn start_typing(&self, session: &Session) -> ApplicationResult<()> {
        let Some(name) = self.typist(session, "start-typing")? else {
            return Ok(());
        };
        bounded("typing.mark", self.store_timeout, self.registry.mark(&name)).await?;

        // 登出清理可能发生在状态检查与写入之间
        if session.phase() == SessionPhase::Terminated {
            self.forget(&name).await;
            return Err(ApplicationError::InvalidState {
                operation: "start-typing",
                phase: SessionPhase::Terminated,
            });
        }
        self.publish().await;
        Ok(())
    }

    pub async fn stop_typing(&self, session: &Session) -> ApplicationResult<()> {
        let Some(name) = self.typist(session, "stop-typing")? else {
            return Ok(());
        };
        bounded("typing.unmark", self.store_timeout, self.registry.unmark(&name)).await?;
        self.publish().await;
        Ok(())
    }

    /// 登出时强制移除，集合有变化才广播
    pub async fn forget(&self, name: &Username) {
        match bounded("typing.unmark", self.store_timeout, self.registry.unmark(name)).await {
            Ok(true) => self.publish().await,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(username = %name, error = %err, "failed to clear typing state");
            }
        }
    }

    pub async fn snapshot(&self) -> ApplicationResult<Vec<Username>> {
        let snapshot =
            bounded("typing.snapshot", self.store_timeout, self.registry.snapshot()).await?;
        Ok(snapshot.names)
    }

    /// 已终止的会话被拒绝，匿名会话返回 `None`
    fn typist(
        &self,
        session: &Session,
        operation: &'static str,
    ) -> ApplicationResult<Option<Username>> {
        let name = session.with_state(|state| -> ApplicationResult<_> {
            state.ensure_active(operation)?;
            Ok(state.identity().cloned())
        })?;
        if name.is_none() {
            tracing::debug!(session_id = %session.id(), operation, "typing event before login ignored");
        }
        Ok(name)
    }

    async fn publish(&self) {
        let snapshot =
            match bounded("typing.snapshot", self.store_timeout, self.registry.snapshot()).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    tracing::warn!(error = %err, "typing update skipped");
                    return;
                }
            };
        let payload = Broadcast::to_all(ServerEvent::update_typing(snapshot.names))
            .at_typing_revision(snapshot.revision);
        if let Err(err) = self.broadcaster.broadcast(payload).await {
            tracing::warn!(error = %err, "failed to broadcast typing update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_broadcast::{EventStream, LocalEventBroadcaster};
    use crate::registry::{memory::MemoryTypingRegistry, MockTypingRegistry, TypingSnapshot};
    use domain::{SessionId, UserPayload};

    fn name(value: &str) -> Username {
        Username::parse(value).unwrap()
    }

    fn identified(value: &str) -> Session {
        let (session, _rx) = Session::new(8);
        session
            .with_state(|state| state.identify(name(value)))
            .unwrap();
        session
    }

    fn tracker_over(registry: Arc<dyn TypingRegistry>) -> (TypingTracker, EventStream) {
        let broadcaster = Arc::new(LocalEventBroadcaster::new(64));
        let observer = broadcaster.subscribe(SessionId::random());
        let tracker = TypingTracker::new(registry, broadcaster, Duration::from_millis(200));
        (tracker, observer)
    }

    fn setup() -> (TypingTracker, EventStream) {
        tracker_over(Arc::new(MemoryTypingRegistry::new()))
    }

    fn typing_list(event: Option<ServerEvent>) -> Vec<String> {
        match event {
            Some(ServerEvent::UpdateTyping(users)) => users
                .into_iter()
                .map(|UserPayload { username }| username.to_string())
                .collect(),
            other => panic!("expected update-typing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_typing_is_idempotent() {
        let (tracker, mut observer) = setup();
        let alice = identified("alice");

        tracker.start_typing(&alice).await.unwrap();
        tracker.start_typing(&alice).await.unwrap();

        assert_eq!(tracker.snapshot().await.unwrap(), vec![name("alice")]);
        assert_eq!(typing_list(observer.try_recv()), vec!["alice"]);
        assert_eq!(typing_list(observer.try_recv()), vec!["alice"]);
    }

    #[tokio::test]
    async fn stop_typing_broadcasts_remaining_set() {
        let (tracker, mut observer) = setup();
        let alice = identified("alice");
        let bob = identified("bob");

        tracker.start_typing(&alice).await.unwrap();
        tracker.start_typing(&bob).await.unwrap();
        tracker.stop_typing(&alice).await.unwrap();
        tracker.stop_typing(&alice).await.unwrap();

        let _ = observer.try_recv();
        assert_eq!(typing_list(observer.try_recv()), vec!["alice", "bob"]);
        assert_eq!(typing_list(observer.try_recv()), vec!["bob"]);
        assert_eq!(typing_list(observer.try_recv()), vec!["bob"]);
    }

    #[tokio::test]
    async fn anonymous_typing_is_silent_noop() {
        let (tracker, mut observer) = setup();
        let (anonymous, _rx) = Session::new(1);

        tracker.start_typing(&anonymous).await.unwrap();
        tracker.stop_typing(&anonymous).await.unwrap();

        assert!(tracker.snapshot().await.unwrap().is_empty());
        assert_eq!(observer.try_recv(), None);
    }

    #[tokio::test]
    async fn terminated_session_is_rejected() {
        let (tracker, _observer) = setup();
        let alice = identified("alice");
        alice.with_state(|state| state.terminate()).unwrap();

        let result = tracker.start_typing(&alice).await;
        assert!(matches!(result, Err(ApplicationError::InvalidState { .. })));
        assert!(tracker.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_terminated_during_mark_is_cleared_again() {
        let alice = identified("alice");
        let mut registry = MockTypingRegistry::new();
        let closing = alice.clone();
        registry.expect_mark().returning(move |_| {
            closing.with_state(|state| state.terminate()).unwrap();
            Ok(true)
        });
        registry.expect_unmark().times(1).returning(|_| Ok(true));
        registry
            .expect_snapshot()
            .returning(|| Ok(TypingSnapshot { revision: 2, names: Vec::new() }));
        let (tracker, mut observer) = tracker_over(Arc::new(registry));

        let result = tracker.start_typing(&alice).await;
        assert!(matches!(
            result,
            Err(ApplicationError::InvalidState {
                phase: SessionPhase::Terminated,
                ..
            })
        ));
        assert!(typing_list(observer.try_recv()).is_empty());
    }

    #[tokio::test]
    async fn forget_broadcasts_only_on_change() {
        let (tracker, mut observer) = setup();
        let alice = identified("alice");
        tracker.start_typing(&alice).await.unwrap();
        let _ = observer.try_recv();

        tracker.forget(&name("alice")).await;
        assert!(typing_list(observer.try_recv()).is_empty());

        tracker.forget(&name("alice")).await;
        assert_eq!(observer.try_recv(), None);
    }

    #[tokio::test]
    async fn trackers_sharing_a_registry_publish_the_union() {
        let registry: Arc<dyn TypingRegistry> = Arc::new(MemoryTypingRegistry::new());
        let broadcaster = Arc::new(LocalEventBroadcaster::new(16));
        let mut observer = broadcaster.subscribe(SessionId::random());
        let first = TypingTracker::new(registry.clone(), broadcaster.clone(), Duration::from_millis(200));
        let second = TypingTracker::new(registry, broadcaster, Duration::from_millis(200));

        first.start_typing(&identified("alice")).await.unwrap();
        second.start_typing(&identified("bob")).await.unwrap();

        assert_eq!(typing_list(observer.try_recv()), vec!["alice"]);
        assert_eq!(typing_list(observer.try_recv()), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn registry_failure_is_reported_and_nothing_broadcast() {
        let mut registry = MockTypingRegistry::new();
        registry
            .expect_mark()
            .returning(|_| Err(ApplicationError::store_unavailable("typing.mark", "down")));
        let (tracker, mut observer) = tracker_over(Arc::new(registry));

        let err = tracker.start_typing(&identified("alice")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(observer.try_recv(), None);
    }
}
