use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, ServerEvent};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }
}

fn classify(error: &ApplicationError) -> (StatusCode, &'static str) {
    match error {
        ApplicationError::Domain(DomainError::InvalidArgument { .. }) => {
            (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT")
        }
        ApplicationError::Domain(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        ApplicationError::NameTaken(_) => (StatusCode::CONFLICT, "NAME_TAKEN"),
        ApplicationError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
        ApplicationError::StoreUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
        }
        ApplicationError::Transport(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TRANSPORT_ERROR"),
        ApplicationError::Broadcast(_) => (StatusCode::INTERNAL_SERVER_ERROR, "BROADCAST_ERROR"),
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let (status, code) = classify(&error);
        ApiError::new(status, code, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// 通过 WebSocket 回报给发起操作的客户端
pub fn error_event(error: &ApplicationError) -> ServerEvent {
    let (_, code) = classify(error);
    ServerEvent::error(code, error.to_string(), error.is_retryable())
}
