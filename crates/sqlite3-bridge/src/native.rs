//! Capability surface of the native SQL engine.
//!
//! The engine is opaque: it receives SQL text and bound parameters and reports
//! failures as plain messages. Two row-delivery shapes exist:
//!
//! - [`CursorEngine`] exposes `prepare` and `step` primitives; the coordinator
//!   pulls one row per step.
//! - [`ChannelEngine`] exposes a single `exec` primitive that pushes rows onto
//!   an [`EventBus`] channel while the call is in flight.
//!
//! All traits are object safe so the coordinator can hold `Arc<dyn ...>`.

use std::fmt;

use async_trait::async_trait;

use crate::events::{ChannelToken, EventBus};
use crate::value::{HandleId, Row, StatementId, Value};

/// Opaque error payload produced by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError(String);

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_message(self) -> String {
        self.0
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NativeError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for NativeError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

/// Lifecycle primitives shared by both protocols.
#[async_trait]
pub trait NativeEngine: Send + Sync + fmt::Debug + 'static {
    /// Open (or create) the database identified by `name`.
    async fn open_from_filename(&self, name: &str) -> NativeResult<HandleId>;

    /// Close a database previously returned by `open_from_filename`.
    async fn close_database(&self, handle: HandleId) -> NativeResult<()>;
}

/// Pull-style row delivery.
#[async_trait]
pub trait CursorEngine: NativeEngine {
    /// Prepare `sql` with `params` bound.
    async fn prepare_statement(
        &self,
        handle: HandleId,
        sql: &str,
        params: &[Value],
    ) -> NativeResult<StatementId>;

    /// Advance the statement by one row. `Ok(None)` is the end-of-results sentinel.
    async fn step_statement(
        &self,
        handle: HandleId,
        statement: StatementId,
    ) -> NativeResult<Option<Row>>;
}

/// Push-style row delivery over a named channel.
#[async_trait]
pub trait ChannelEngine: NativeEngine {
    /// Bus on which this engine emits rows.
    fn events(&self) -> &EventBus;

    /// Execute `sql`, emitting every row on `token` before resolving.
    async fn exec_on_database(
        &self,
        handle: HandleId,
        sql: &str,
        params: &[Value],
        token: &ChannelToken,
    ) -> NativeResult<()>;
}
