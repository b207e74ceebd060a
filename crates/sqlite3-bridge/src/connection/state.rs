//! Connection lifecycle states.

use std::fmt;

use crate::error::StatementError;
use crate::value::HandleId;

/// Observable state of a [`Database`](super::Database).
///
/// `Opening → Open | Failed`, then `Open → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Native open in flight; work is queued.
    Opening,
    /// Handle assigned; work runs immediately.
    Open,
    /// Native open failed. Terminal.
    Failed,
    /// Native close in flight.
    Closing,
    /// Native close succeeded. Terminal.
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Opening => "connection is opening",
            Self::Open => "connection is open",
            Self::Failed => "connection failed to open",
            Self::Closing => "connection is closing",
            Self::Closed => "connection is closed",
        }
    }

    /// Whether submitted work can still reach the native engine.
    #[must_use]
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Opening | Self::Open)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Failed => "failed",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal lifecycle. The handle exists only in `Open`.
#[derive(Debug, Clone)]
pub(super) enum Lifecycle {
    Opening,
    Open(HandleId),
    Failed(StatementError),
    Closing,
    Closed,
}

impl Lifecycle {
    pub(super) const fn state(&self) -> ConnectionState {
        match self {
            Self::Opening => ConnectionState::Opening,
            Self::Open(_) => ConnectionState::Open,
            Self::Failed(_) => ConnectionState::Failed,
            Self::Closing => ConnectionState::Closing,
            Self::Closed => ConnectionState::Closed,
        }
    }

    pub(super) const fn handle(&self) -> Option<HandleId> {
        match self {
            Self::Open(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Error for work that can no longer run, or `None` if work is accepted.
    pub(super) fn rejection(&self) -> Option<StatementError> {
        match self {
            Self::Opening | Self::Open(_) => None,
            Self::Failed(open_error) => Some(StatementError::unusable_after(open_error)),
            Self::Closing | Self::Closed => {
                Some(StatementError::connection_unusable(self.state()))
            }
        }
    }
}
