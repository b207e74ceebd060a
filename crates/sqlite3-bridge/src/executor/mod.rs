//! Statement execution against an open handle.
//!
//! Two row-streaming protocols, chosen by the engine's capability surface:
//!
//! - [`RowProtocol::Cursor`]: prepare once, then step until the end sentinel
//!   or an error. One step in flight at a time.
//! - [`RowProtocol::Channel`]: subscribe a fresh channel, issue one exec call,
//!   unsubscribe when it resolves.
//!
//! Either way the per-row callback sees rows in engine order and the caller
//! gets exactly one terminal result.

mod channel;
mod cursor;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::StatementError;
use crate::native::{ChannelEngine, CursorEngine, NativeResult};
use crate::value::{HandleId, Row, Value};

/// Per-row callback. Invoked zero or more times, in result order.
pub type RowCallback = Box<dyn FnMut(Row) + Send>;

/// Terminal callback of one execute call. Invoked exactly once.
pub type CompletionCallback = Box<dyn FnOnce(Result<(), StatementError>) + Send>;

/// Row delivery protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowProtocol {
    /// Prepare and step (pull).
    #[default]
    Cursor,
    /// Single exec with rows pushed on an event channel.
    Channel,
}

impl RowProtocol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for RowProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cursor" | "step" => Ok(Self::Cursor),
            "channel" | "events" => Ok(Self::Channel),
            other => Err(format!("unknown row protocol: {other}")),
        }
    }
}

/// Native engine bound to the protocol it speaks.
#[derive(Clone)]
pub(crate) enum Executor {
    Cursor(Arc<dyn CursorEngine>),
    Channel(Arc<dyn ChannelEngine>),
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cursor(engine) => f.debug_tuple("Cursor").field(engine).finish(),
            Self::Channel(engine) => f.debug_tuple("Channel").field(engine).finish(),
        }
    }
}

impl Executor {
    pub(crate) const fn protocol(&self) -> RowProtocol {
        match self {
            Self::Cursor(_) => RowProtocol::Cursor,
            Self::Channel(_) => RowProtocol::Channel,
        }
    }

    pub(crate) async fn open(&self, name: &str) -> NativeResult<HandleId> {
        match self {
            Self::Cursor(engine) => engine.open_from_filename(name).await,
            Self::Channel(engine) => engine.open_from_filename(name).await,
        }
    }

    pub(crate) async fn close(&self, handle: HandleId) -> NativeResult<()> {
        match self {
            Self::Cursor(engine) => engine.close_database(handle).await,
            Self::Channel(engine) => engine.close_database(handle).await,
        }
    }

    /// Drive one statement to completion.
    pub(crate) async fn execute(
        &self,
        handle: HandleId,
        sql: &str,
        params: &[Value],
        on_row: RowCallback,
    ) -> Result<(), StatementError> {
        let span = tracing::debug_span!(
            "sqlite3.execute",
            protocol = %self.protocol(),
            handle = %handle,
            params = params.len(),
        );

        let result = async {
            match self {
                Self::Cursor(engine) => cursor::run(&**engine, handle, sql, params, on_row).await,
                Self::Channel(engine) => {
                    channel::run(&**engine, handle, sql, params, on_row).await
                }
            }
        }
        .instrument(span.clone())
        .await;

        match result {
            Ok(rows) => {
                tracing::debug!(parent: &span, rows, "statement completed");
                Ok(())
            }
            Err(err) => {
                tracing::debug!(parent: &span, error = %err, "statement failed");
                Err(err)
            }
        }
    }
}

/// Hand a row to the consumer. A panicking consumer does not stop the stream.
fn deliver_row(on_row: &mut RowCallback, row: Row) {
    if catch_unwind(AssertUnwindSafe(|| on_row(row))).is_err() {
        tracing::warn!("row callback panicked; continuing to the next row");
    }
}
