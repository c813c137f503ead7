mod chat_service;

pub use chat_service::{ChatService, ChatServiceDependencies, ChatSettings, OpenedSession};
