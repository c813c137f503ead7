//! 单个连接的服务端会话

use std::sync::{Arc, Mutex, MutexGuard};

use domain::{ServerEvent, SessionId, SessionPhase, SessionState, Username};
use tokio::sync::mpsc;

use crate::error::ApplicationError;

/// 会话私有事件通道的默认容量
pub const DEFAULT_SESSION_BUFFER: usize = 256;

/// 服务端会话句柄，可在连接的读写任务之间克隆共享
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    state: Mutex<SessionState>,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Session {
    /// 创建匿名会话，返回句柄和私有事件的接收端
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        Self::with_id(SessionId::random(), buffer)
    }

    pub fn with_id(id: SessionId, buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (outbound, receiver) = mpsc::channel(buffer);
        let session = Self {
            inner: Arc::new(SessionInner {
                id,
                state: Mutex::new(SessionState::default()),
                outbound,
            }),
        };
        (session, receiver)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn identity(&self) -> Option<Username> {
        self.state().identity().cloned()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase()
    }

    /// 在状态锁内执行一次状态检查或转换，闭包内不得等待
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.state())
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 只发给本会话的事件
    pub async fn emit(&self, event: ServerEvent) -> Result<(), ApplicationError> {
        self.inner
            .outbound
            .send(event)
            .await
            .map_err(|err| ApplicationError::transport(format!("session closed: {err}")))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish()
    }
}
