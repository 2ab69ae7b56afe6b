//! Error types for the conversational pipeline.

use placebot_core::error::PlacebotError;
use placebot_llm::CompletionError;
use placebot_storage::StorageError;

/// Errors from the chat engine.
///
/// Input errors (`EmptyMessage`, `MessageTooLong`, `TurnInProgress`) leave
/// the session untouched. `Connection` and `Service` abort a turn.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("a question is already being answered in this session")]
    TurnInProgress,
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
    #[error("database unavailable: {0}")]
    Connection(String),
    #[error("completion service unavailable: {0}")]
    Service(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// True for failures that abort a turn rather than reject its input.
    pub fn aborts_turn(&self) -> bool {
        matches!(self, ChatError::Connection(_) | ChatError::Service(_))
    }
}

impl From<StorageError> for ChatError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection(msg) => ChatError::Connection(msg),
            StorageError::Timeout(_) => ChatError::Connection(err.to_string()),
            other => ChatError::Internal(other.to_string()),
        }
    }
}

impl From<CompletionError> for ChatError {
    fn from(err: CompletionError) -> Self {
        ChatError::Service(err.to_string())
    }
}

impl From<ChatError> for PlacebotError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Connection(msg) => PlacebotError::Connection(msg),
            ChatError::Service(msg) => PlacebotError::Completion(msg),
            other => PlacebotError::Chat(other.to_string()),
        }
    }
}
