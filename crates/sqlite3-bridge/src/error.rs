//! Error types for sqlite3-bridge.
//!
//! Every failure reported by the native engine reaches user callbacks as a
//! [`StatementError`]. It follows the canonical error struct pattern: the kind
//! stays private and callers classify errors through `is_xxx()` predicates.
//!
//! The crate-level [`Error`] covers the ambient surface (configuration,
//! logging setup) and wraps `StatementError` for convenience.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::native::NativeError;

/// Error delivered to completion callbacks.
///
/// Carries a human-readable message only. Cloning is cheap and clones share
/// the same message allocation, so every caller failed by one open error
/// observes the same instance (see [`StatementError::ptr_eq`]).
#[derive(Error, Clone)]
#[error("{message}")]
pub struct StatementError {
    kind: ErrorKind,
    message: Arc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    /// Failure reported by the native engine.
    Native,
    /// Operation submitted to a connection that failed to open or was closed.
    ConnectionUnusable,
    /// The completion callback was dropped without being invoked.
    Abandoned,
}

impl StatementError {
    /// Wrap an opaque native error payload.
    #[must_use]
    pub fn native(payload: impl Into<NativeError>) -> Self {
        let payload = payload.into();
        Self {
            kind: ErrorKind::Native,
            message: Arc::from(payload.into_message()),
        }
    }

    /// Rejection for work submitted to a connection in `state`.
    #[must_use]
    pub fn connection_unusable(state: ConnectionState) -> Self {
        Self {
            kind: ErrorKind::ConnectionUnusable,
            message: Arc::from(state.message()),
        }
    }

    /// Rejection that carries the error a failed open produced.
    #[must_use]
    pub(crate) fn unusable_after(open_error: &Self) -> Self {
        Self {
            kind: ErrorKind::ConnectionUnusable,
            message: Arc::clone(&open_error.message),
        }
    }

    /// The operation's task ended before reporting, e.g. on runtime shutdown.
    #[must_use]
    pub fn abandoned() -> Self {
        Self {
            kind: ErrorKind::Abandoned,
            message: Arc::from("operation abandoned before completion"),
        }
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the native engine reported this error.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.kind == ErrorKind::Native
    }

    /// Returns true if the connection was not usable when the work was submitted.
    #[must_use]
    pub fn is_connection_unusable(&self) -> bool {
        self.kind == ErrorKind::ConnectionUnusable
    }

    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.kind == ErrorKind::Abandoned
    }

    /// Returns true if both errors are clones of one instance.
    ///
    /// A rejection built from a failed open shares its message but is a
    /// different error, so it compares unequal here.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.kind == other.kind && Arc::ptr_eq(&self.message, &other.message)
    }
}

impl fmt::Debug for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementError")
            .field("kind", &self.kind)
            .field("message", &&*self.message)
            .finish()
    }
}

/// Crate-level error for configuration and setup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup error: {0}")]
    Logging(String),

    #[error(transparent)]
    Statement(#[from] StatementError),
}

impl Error {
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    #[must_use]
    pub const fn is_logging(&self) -> bool {
        matches!(self, Self::Logging(_))
    }

    #[must_use]
    pub const fn is_statement(&self) -> bool {
        matches!(self, Self::Statement(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_error_keeps_message() {
        let err = StatementError::native("no such table: t");
        assert_eq!(err.message(), "no such table: t");
        assert_eq!(err.to_string(), "no such table: t");
        assert!(err.is_native());
        assert!(!err.is_connection_unusable());
    }

    #[test]
    fn test_clones_share_instance() {
        let err = StatementError::native("disk I/O error");
        let cloned = err.clone();
        assert!(err.ptr_eq(&cloned));

        let other = StatementError::native("disk I/O error");
        assert!(!err.ptr_eq(&other));
    }

    #[test]
    fn test_connection_unusable_closed() {
        let err = StatementError::connection_unusable(ConnectionState::Closed);
        assert!(err.is_connection_unusable());
        assert!(err.message().contains("closed"));
    }

    #[test]
    fn test_unusable_after_open_failure_keeps_message() {
        let open_err = StatementError::native("unable to open database file");
        let err = StatementError::unusable_after(&open_err);
        assert!(err.is_connection_unusable());
        assert_eq!(err.message(), "unable to open database file");
        assert!(!err.ptr_eq(&open_err));
        assert!(err.ptr_eq(&err.clone()));
    }

    #[test]
    fn test_statement_error_debug() {
        let err = StatementError::native("boom");
        let debug_str = format!("{err:?}");
        assert!(debug_str.contains("Native"));
        assert!(debug_str.contains("boom"));
    }

    #[test]
    fn test_crate_error_predicates() {
        let err = Error::Config("database name is required".to_string());
        assert!(err.is_config());
        assert!(!err.is_logging());
        assert!(err.to_string().contains("Configuration error"));

        let err: Error = StatementError::native("boom").into();
        assert!(err.is_statement());
        assert_eq!(err.to_string(), "boom");
    }
}
