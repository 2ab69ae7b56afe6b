use thiserror::Error;

/// Top-level error type for the placebot workspace.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for PlacebotError` so that the binary can use `?`
/// across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlacebotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Chat error: {0}")]
    Chat(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for PlacebotError {
    fn from(err: toml::de::Error) -> Self {
        PlacebotError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PlacebotError {
    fn from(err: toml::ser::Error) -> Self {
        PlacebotError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PlacebotError {
    fn from(err: serde_json::Error) -> Self {
        PlacebotError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for placebot operations.
pub type Result<T> = std::result::Result<T, PlacebotError>;
