//! Async coordinator for callback-based embedded SQLite engines.
//!
//! The native engine executes SQL; this crate only imposes ordering,
//! lifecycle, and row-streaming semantics on top of its asynchronous
//! primitives.
//!
//! # Features
//!
//! - Work submitted before the open resolves is queued and replayed in order,
//!   or failed with the open error
//! - Two row protocols: cursor stepping ([`CursorEngine`]) and bulk exec with
//!   rows pushed on an [`EventBus`] channel ([`ChannelEngine`])
//! - Exactly one terminal callback per statement, after all of its rows
//! - Async conveniences: [`connect`], [`Database::execute`], [`Database::query`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! let db = sqlite3_bridge::open(Arc::new(engine), "app.sqlite", |opened| {
//!     if let Err(e) = opened {
//!         tracing::error!("open failed: {e}");
//!     }
//! });
//!
//! // Queued until the open resolves.
//! db.execute_sql(
//!     "SELECT id FROM t WHERE id > ?",
//!     vec![1.into()],
//!     |row| println!("{row:?}"),
//!     |done| println!("done: {done:?}"),
//! );
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod executor;
pub mod native;
pub mod observability;
mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod value;

use std::sync::Arc;

use tokio::sync::oneshot;

pub use config::{Config, ConfigBuilder, DatabaseConfig, TelemetryConfig};
pub use connection::{ConnectionState, Database, OpenCallback};
pub use error::{Error, Result, StatementError};
pub use events::{ChannelToken, EventBus, Subscription};
pub use executor::{CompletionCallback, RowCallback, RowProtocol};
pub use native::{ChannelEngine, CursorEngine, NativeEngine, NativeError, NativeResult};
pub use stream::RowStream;
pub use value::{HandleId, Row, StatementId, Value};

use crate::executor::Executor;

/// Open `name` on a cursor-stepping engine.
///
/// Returns immediately with a connection in [`ConnectionState::Opening`];
/// `callback` receives the outcome exactly once. Must be called from within
/// a Tokio runtime.
pub fn open<E, F>(engine: Arc<E>, name: &str, callback: F) -> Database
where
    E: CursorEngine,
    F: FnOnce(std::result::Result<Database, StatementError>) + Send + 'static,
{
    Database::open(Executor::Cursor(engine), name, Box::new(callback))
}

/// Open `name` on an engine that pushes rows over its event bus.
pub fn open_streaming<E, F>(engine: Arc<E>, name: &str, callback: F) -> Database
where
    E: ChannelEngine,
    F: FnOnce(std::result::Result<Database, StatementError>) + Send + 'static,
{
    Database::open(Executor::Channel(engine), name, Box::new(callback))
}

/// Open the configured database with the configured row protocol.
pub fn open_with_config<E, F>(engine: Arc<E>, config: &DatabaseConfig, callback: F) -> Database
where
    E: CursorEngine + ChannelEngine,
    F: FnOnce(std::result::Result<Database, StatementError>) + Send + 'static,
{
    let executor = match config.protocol {
        RowProtocol::Cursor => Executor::Cursor(engine),
        RowProtocol::Channel => Executor::Channel(engine),
    };
    Database::open(executor, &config.name, Box::new(callback))
}

/// Open on a cursor-stepping engine and wait for the outcome.
pub async fn connect<E: CursorEngine>(
    engine: Arc<E>,
    name: &str,
) -> std::result::Result<Database, StatementError> {
    let (tx, rx) = oneshot::channel();
    let _opening = open(engine, name, move |opened| {
        let _ = tx.send(opened);
    });
    rx.await.unwrap_or_else(|_| Err(StatementError::abandoned()))
}

/// Open on a channel engine and wait for the outcome.
pub async fn connect_streaming<E: ChannelEngine>(
    engine: Arc<E>,
    name: &str,
) -> std::result::Result<Database, StatementError> {
    let (tx, rx) = oneshot::channel();
    let _opening = open_streaming(engine, name, move |opened| {
        let _ = tx.send(opened);
    });
    rx.await.unwrap_or_else(|_| Err(StatementError::abandoned()))
}
