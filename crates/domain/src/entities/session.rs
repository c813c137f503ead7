//! 会话状态机
//!
//! `Anonymous` --登录成功--> `Identified` --断开--> `Terminated`，
//! 匿名会话也可以直接断开。`Terminated` 是终态。

use std::fmt;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::Username;

/// 会话阶段，不携带数据，用于错误与日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Identified,
    Terminated,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Anonymous => "anonymous",
            SessionPhase::Identified => "identified",
            SessionPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Identified(Username),
    Terminated,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Anonymous => SessionPhase::Anonymous,
            SessionState::Identified(_) => SessionPhase::Identified,
            SessionState::Terminated => SessionPhase::Terminated,
        }
    }

    pub fn identity(&self) -> Option<&Username> {
        match self {
            SessionState::Identified(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }

    /// 绑定显示名，只允许从 `Anonymous` 转换一次
    pub fn identify(&mut self, name: Username) -> DomainResult<()> {
        match self {
            SessionState::Anonymous => {
                *self = SessionState::Identified(name);
                Ok(())
            }
            other => Err(DomainError::invalid_transition("login", other.phase())),
        }
    }

    /// 进入终态并交出之前绑定的显示名。
    ///
    /// 第二次调用返回错误，调用方据此保证登出清理只执行一次。
    pub fn terminate(&mut self) -> DomainResult<Option<Username>> {
        match std::mem::replace(self, SessionState::Terminated) {
            SessionState::Anonymous => Ok(None),
            SessionState::Identified(name) => Ok(Some(name)),
            SessionState::Terminated => Err(DomainError::invalid_transition(
                "terminate",
                SessionPhase::Terminated,
            )),
        }
    }

    /// 会话尚未终止
    pub fn ensure_active(&self, operation: &'static str) -> DomainResult<()> {
        if self.is_terminated() {
            return Err(DomainError::invalid_transition(operation, SessionPhase::Terminated));
        }
        Ok(())
    }

    /// 会话已登录，返回显示名
    pub fn require_identity(&self, operation: &'static str) -> DomainResult<&Username> {
        match self {
            SessionState::Identified(name) => Ok(name),
            other => Err(DomainError::invalid_transition(operation, other.phase())),
        }
    }
}
