//! Storage error types.

use placebot_core::error::PlacebotError;
use placebot_core::types::SqlErrorClass;

/// Errors from the placement database layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The database cannot be reached: closed handle, unopenable file,
    /// failed liveness check.
    #[error("database unavailable: {0}")]
    Connection(String),
    /// The database rejected a statement. Displays the database message only.
    #[error("{message}")]
    Rejected {
        class: SqlErrorClass,
        message: String,
    },
    /// A statement ran past the configured bound and was interrupted.
    #[error("query exceeded the {0} ms time limit")]
    Timeout(u64),
    /// The prepared statement would modify the database.
    #[error("statement is not read-only")]
    NotReadOnly,
    #[error("storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Build a rejection from a rusqlite error, keeping only the database text.
    pub fn rejected(err: &rusqlite::Error) -> Self {
        let message = match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.clone(),
            rusqlite::Error::SqlInputError { msg, .. } => msg.clone(),
            other => other.to_string(),
        };
        StorageError::Rejected {
            class: SqlErrorClass::classify(&message),
            message,
        }
    }

    /// True for failures that mean the connection itself is unusable.
    pub fn is_connection(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Timeout(_))
    }
}

impl From<StorageError> for PlacebotError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection(msg) => PlacebotError::Connection(msg),
            other => PlacebotError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_displays_database_message_only() {
        let err = StorageError::Rejected {
            class: SqlErrorClass::UnknownColumn,
            message: "no such column: foo".to_string(),
        };
        assert_eq!(err.to_string(), "no such column: foo");
    }

    #[test]
    fn test_rejected_from_rusqlite_failure() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn.prepare("SELECT nope FROM sqlite_master").unwrap_err();
        let storage_err = StorageError::rejected(&err);
        match storage_err {
            StorageError::Rejected { class, message } => {
                assert_eq!(class, SqlErrorClass::UnknownColumn);
                assert!(message.contains("no such column"));
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_is_connection() {
        assert!(StorageError::Connection("closed".into()).is_connection());
        assert!(StorageError::Timeout(100).is_connection());
        assert!(!StorageError::NotReadOnly.is_connection());
    }

    #[test]
    fn test_into_placebot_error() {
        let err: PlacebotError = StorageError::Connection("gone".into()).into();
        assert!(matches!(err, PlacebotError::Connection(_)));

        let err: PlacebotError = StorageError::Timeout(5).into();
        assert!(matches!(err, PlacebotError::Storage(_)));
    }
}
