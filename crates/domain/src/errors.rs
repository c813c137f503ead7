//! 领域模型错误定义
//!
//! 定义了领域层可能出现的错误类型，提供清晰的错误上下文。

use thiserror::Error;

use crate::entities::session::SessionPhase;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 会话状态不允许该操作
    #[error("operation `{operation}` not allowed while session is {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: SessionPhase,
    },

    /// 未知的事件类型
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 创建非法状态转换错误
    pub fn invalid_transition(operation: &'static str, phase: SessionPhase) -> Self {
        Self::InvalidTransition { operation, phase }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
