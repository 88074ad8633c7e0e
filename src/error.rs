//! Error types for the session layer.
//!
//! Every driver failure surfaces as a [`DbError`]. Callers branch on
//! [`DbError::kind`], never on backend-specific text; the native error that
//! produced a canonical variant stays attached for logging.

use crate::db::native::NativeError;
use thiserror::Error;

/// Canonical tag for a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateEntry,
    Deadlock,
    Disconnected,
    Integrity,
    Data,
    Unknown,
    Config,
    EngineMismatch,
    ConnectionFailed,
    PoolTimeout,
    Transaction,
    InvalidInput,
    Internal,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Duplicate entry on columns {columns:?}")]
    DuplicateEntry {
        /// In the order the backend reports them.
        columns: Vec<String>,
        /// Offending value, when the backend exposes it.
        value: Option<String>,
        native: NativeError,
    },

    #[error("Deadlock detected: {native}")]
    Deadlock { native: NativeError },

    #[error("Database connection lost: {native}")]
    Disconnected { native: NativeError },

    #[error("Integrity constraint violated: {native}")]
    Integrity { native: NativeError },

    #[error("Invalid data for column: {native}")]
    Data { native: NativeError },

    #[error("Unrecognized {backend} error: {original}")]
    Unknown {
        backend: String,
        original: NativeError,
    },

    #[error("Configuration error for '{key}': {message}")]
    Config { key: String, message: String },

    #[error("Replica backend '{replica}' does not match primary backend '{primary}'")]
    EngineMismatch { primary: String, replica: String },

    #[error("Could not connect to {url} after {attempts} attempt(s): {message}")]
    ConnectionFailed {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Timeout: connection checkout {}", checkout_timeout(.elapsed_secs))]
    PoolTimeout {
        /// Configured `pool_timeout`, when the caller knows it.
        elapsed_secs: Option<u64>,
    },

    #[error("Transaction error: {message} (session: {session_id})")]
    Transaction { message: String, session_id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error for a canonical option.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a primary/replica mismatch error.
    pub fn engine_mismatch(primary: impl Into<String>, replica: impl Into<String>) -> Self {
        Self::EngineMismatch {
            primary: primary.into(),
            replica: replica.into(),
        }
    }

    /// Create a connection failure error. `url` must already be masked.
    pub fn connection_failed(url: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            url: url.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Create a pool checkout timeout error.
    pub fn pool_timeout(elapsed_secs: impl Into<Option<u64>>) -> Self {
        Self::PoolTimeout {
            elapsed_secs: elapsed_secs.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            session_id: session_id.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Canonical tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateEntry { .. } => ErrorKind::DuplicateEntry,
            Self::Deadlock { .. } => ErrorKind::Deadlock,
            Self::Disconnected { .. } => ErrorKind::Disconnected,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Data { .. } => ErrorKind::Data,
            Self::Unknown { .. } => ErrorKind::Unknown,
            Self::Config { .. } => ErrorKind::Config,
            Self::EngineMismatch { .. } => ErrorKind::EngineMismatch,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::PoolTimeout { .. } => ErrorKind::PoolTimeout,
            Self::Transaction { .. } => ErrorKind::Transaction,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// The native driver error behind a canonical variant, if any.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Self::DuplicateEntry { native, .. }
            | Self::Deadlock { native }
            | Self::Disconnected { native }
            | Self::Integrity { native }
            | Self::Data { native } => Some(native),
            Self::Unknown { original, .. } => Some(original),
            _ => None,
        }
    }

    /// Check if this error is a transient fault worth retrying.
    ///
    /// Duplicate and integrity violations are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Deadlock { .. } | Self::Disconnected { .. })
    }

    /// Check if this error must stop startup.
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::EngineMismatch { .. })
    }
}

fn checkout_timeout(elapsed_secs: &Option<u64>) -> String {
    match elapsed_secs {
        Some(secs) => format!("exceeded {}s", secs),
        None => "exceeded the pool timeout".to_string(),
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::native::NativeErrorClass;

    fn native() -> NativeError {
        NativeError::new(NativeErrorClass::Operational, "boom")
    }

    #[test]
    fn test_error_display() {
        let err = DbError::config("max_pool_size", "invalid digit found in string");
        assert!(err.to_string().contains("max_pool_size"));

        assert_eq!(
            DbError::pool_timeout(30).to_string(),
            "Timeout: connection checkout exceeded 30s"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::Deadlock { native: native() }.is_retryable());
        assert!(DbError::Disconnected { native: native() }.is_retryable());
        assert!(!DbError::Integrity { native: native() }.is_retryable());
        assert!(
            !DbError::DuplicateEntry {
                columns: vec!["foo".to_string()],
                value: None,
                native: native(),
            }
            .is_retryable()
        );
        assert!(!DbError::pool_timeout(30).is_retryable());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(DbError::engine_mismatch("mysql", "sqlite").kind(), ErrorKind::EngineMismatch);
        assert_eq!(DbError::invalid_input("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(
            DbError::Unknown {
                backend: "mysql".to_string(),
                original: native(),
            }
            .kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_native_attached() {
        let err = DbError::Data { native: native() };
        assert_eq!(err.native().map(|n| n.message.as_str()), Some("boom"));
        assert!(DbError::internal("x").native().is_none());
    }

    #[test]
    fn test_fatal_config() {
        assert!(DbError::config("connection", "missing").is_fatal_config());
        assert!(DbError::engine_mismatch("mysql", "postgresql").is_fatal_config());
        assert!(!DbError::pool_timeout(1).is_fatal_config());
    }
}
