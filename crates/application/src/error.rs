use domain::{DomainError, SessionPhase, Username};
use thiserror::Error;

use crate::broadcaster::BroadcastError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(DomainError),
    #[error("name `{0}` is already taken")]
    NameTaken(Username),
    #[error("`{operation}` not allowed while session is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: SessionPhase,
    },
    #[error("store unavailable during {operation}: {message}")]
    StoreUnavailable {
        operation: &'static str,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
}

impl ApplicationError {
    /// 创建存储不可用错误
    pub fn store_unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        ApplicationError::StoreUnavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ApplicationError::Transport(message.into())
    }

    /// 客户端稍后重试可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplicationError::StoreUnavailable { .. })
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidTransition { operation, phase } => {
                ApplicationError::InvalidState { operation, phase }
            }
            other => ApplicationError::Domain(other),
        }
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_maps_to_invalid_state() {
        let err: ApplicationError =
            DomainError::invalid_transition("chat-message", SessionPhase::Anonymous).into();
        assert!(matches!(
            err,
            ApplicationError::InvalidState {
                operation: "chat-message",
                phase: SessionPhase::Anonymous
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_errors_are_retryable() {
        let err = ApplicationError::store_unavailable("append", "connection refused");
        assert!(err.is_retryable());
    }
}
