//! Bundled SQLite engine speaking both row protocols.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, params_from_iter};
use sqlite3_bridge::{
    ChannelEngine, ChannelToken, CursorEngine, EventBus, HandleId, NativeEngine, NativeError,
    NativeResult, Row, StatementId, Value,
};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use crate::convert;
use crate::cursor::LiveCursor;

/// Name that opens a private in-memory database.
pub const MEMORY: &str = ":memory:";

type SharedConnection = Arc<Mutex<Connection>>;

fn invalid_handle(handle: HandleId) -> NativeError {
    NativeError::new(format!("invalid database handle: {handle}"))
}

/// An open connection and the gate close waits on.
struct Slot {
    conn: SharedConnection,
    gate: Arc<RwLock<()>>,
}

/// A connection borrowed by one native call. Close waits until every lease
/// taken before it is dropped.
pub(crate) struct Lease {
    // Dropped before the gate opens, so close finds the connection unshared.
    conn: SharedConnection,
    _open: OwnedRwLockReadGuard<()>,
}

impl Lease {
    pub(crate) fn connection(&self) -> &Mutex<Connection> {
        &self.conn
    }
}

#[derive(Default)]
struct Registry {
    connections: HashMap<HandleId, Slot>,
    statements: HashMap<StatementId, LiveCursor>,
}

/// Native engine backed by `rusqlite`.
///
/// Connections and prepared statements live in a registry keyed by
/// counter-assigned ids. SQLite calls run on the blocking pool, and each
/// prepared statement keeps a live cursor that is stepped one row at a time.
/// Closing a connection waits for calls already issued on it, live cursors
/// included, the way `sqlite3_close_v2` defers until statements finalize.
pub struct RusqliteEngine {
    base_dir: Option<PathBuf>,
    registry: Mutex<Registry>,
    next_handle: AtomicU64,
    next_statement: AtomicU64,
    events: EventBus,
}

impl fmt::Debug for RusqliteEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("RusqliteEngine")
            .field("base_dir", &self.base_dir)
            .field("connections", &registry.connections.len())
            .field("statements", &registry.statements.len())
            .finish_non_exhaustive()
    }
}

impl Default for RusqliteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RusqliteEngine {
    /// Engine resolving names against the working directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_dir: None,
            registry: Mutex::new(Registry::default()),
            next_handle: AtomicU64::new(1),
            next_statement: AtomicU64::new(1),
            events: EventBus::new(),
        }
    }

    /// Engine resolving relative names under `dir`.
    #[must_use]
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Number of open connections.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.registry.lock().connections.len()
    }

    /// Number of prepared statements not yet stepped to the end.
    #[must_use]
    pub fn live_statements(&self) -> usize {
        self.registry.lock().statements.len()
    }

    fn resolve(&self, name: &str) -> PathBuf {
        match &self.base_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Borrow an open connection. Fails once a close has been issued on it.
    fn lease(&self, handle: HandleId) -> NativeResult<Lease> {
        let registry = self.registry.lock();
        let slot = registry
            .connections
            .get(&handle)
            .ok_or_else(|| invalid_handle(handle))?;
        let open = Arc::clone(&slot.gate)
            .try_read_owned()
            .map_err(|_| NativeError::new("database is closing"))?;
        Ok(Lease {
            conn: Arc::clone(&slot.conn),
            _open: open,
        })
    }

    fn insert(&self, handle: HandleId, conn: SharedConnection, gate: Arc<RwLock<()>>) {
        self.registry
            .lock()
            .connections
            .insert(handle, Slot { conn, gate });
    }
}

/// Run `sql` and hand every row to `sink` as it is read.
fn for_each_row(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    mut sink: impl FnMut(Row),
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter().map(convert::to_sql)))?;

    let mut count = 0;
    while let Some(row) = rows.next()? {
        sink(convert::read_row(row, &columns)?);
        count += 1;
    }
    Ok(count)
}

async fn blocking<T, F>(f: F) -> NativeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> NativeResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| NativeError::new(format!("sqlite worker failed: {e}")))?
}

#[async_trait]
impl NativeEngine for RusqliteEngine {
    async fn open_from_filename(&self, name: &str) -> NativeResult<HandleId> {
        let conn = if name == MEMORY {
            blocking(|| Connection::open_in_memory().map_err(|e| convert::native_error(&e))).await?
        } else {
            let path = self.resolve(name);
            blocking(move || Connection::open(&path).map_err(|e| convert::native_error(&e)))
                .await?
        };

        let handle = HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.insert(handle, Arc::new(Mutex::new(conn)), Arc::default());
        tracing::debug!(name, handle = %handle, "sqlite connection opened");
        Ok(handle)
    }

    async fn close_database(&self, handle: HandleId) -> NativeResult<()> {
        let gate = self
            .registry
            .lock()
            .connections
            .get(&handle)
            .map(|slot| Arc::clone(&slot.gate))
            .ok_or_else(|| invalid_handle(handle))?;
        let _exclusive = gate.write().await;

        let slot = self
            .registry
            .lock()
            .connections
            .remove(&handle)
            .ok_or_else(|| invalid_handle(handle))?;
        let conn = match Arc::try_unwrap(slot.conn) {
            Ok(conn) => conn.into_inner(),
            Err(conn) => {
                self.insert(handle, conn, slot.gate);
                return Err(NativeError::new("database is busy"));
            }
        };

        match blocking(move || Ok(conn.close())).await? {
            Ok(()) => {
                tracing::debug!(handle = %handle, "sqlite connection closed");
                Ok(())
            }
            Err((conn, err)) => {
                self.insert(handle, Arc::new(Mutex::new(conn)), slot.gate);
                Err(convert::native_error(&err))
            }
        }
    }
}

#[async_trait]
impl CursorEngine for RusqliteEngine {
    async fn prepare_statement(
        &self,
        handle: HandleId,
        sql: &str,
        params: &[Value],
    ) -> NativeResult<StatementId> {
        let lease = self.lease(handle)?;
        let cursor = LiveCursor::prepare(handle, lease, sql.to_owned(), params.to_vec()).await?;

        let id = StatementId::new(self.next_statement.fetch_add(1, Ordering::Relaxed));
        self.registry.lock().statements.insert(id, cursor);
        Ok(id)
    }

    async fn step_statement(
        &self,
        handle: HandleId,
        statement: StatementId,
    ) -> NativeResult<Option<Row>> {
        let reply = {
            let registry = self.registry.lock();
            match registry
                .statements
                .get(&statement)
                .filter(|cursor| cursor.handle() == handle)
            {
                Some(cursor) => cursor.step(),
                None => Err(NativeError::new(format!("no such statement: {statement}"))),
            }
        }?;

        let next = reply
            .await
            .unwrap_or_else(|_| Err(NativeError::new("sqlite cursor worker stopped")));
        if !matches!(next, Ok(Some(_))) {
            // Finished or failed: the worker has dropped its lease.
            self.registry.lock().statements.remove(&statement);
        }
        next
    }
}

#[async_trait]
impl ChannelEngine for RusqliteEngine {
    fn events(&self) -> &EventBus {
        &self.events
    }

    async fn exec_on_database(
        &self,
        handle: HandleId,
        sql: &str,
        params: &[Value],
        token: &ChannelToken,
    ) -> NativeResult<()> {
        let lease = self.lease(handle)?;
        let sql = sql.to_owned();
        let params = params.to_vec();
        let events = self.events.clone();
        let token = token.clone();
        let emitted = blocking(move || {
            let conn = lease.connection().lock();
            for_each_row(&conn, &sql, &params, |row| {
                events.emit(&token, row);
            })
            .map_err(|e| convert::native_error(&e))
        })
        .await?;
        tracing::trace!(handle = %handle, emitted, "exec finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_and_close() {
        let engine = RusqliteEngine::new();
        let handle = engine.open_from_filename(MEMORY).await.unwrap();
        assert_eq!(engine.open_connections(), 1);

        engine.close_database(handle).await.unwrap();
        assert_eq!(engine.open_connections(), 0);

        let err = engine.close_database(handle).await.unwrap_err();
        assert!(err.message().contains("invalid database handle"));
    }

    #[tokio::test]
    async fn test_step_drains_statement() {
        let engine = RusqliteEngine::new();
        let handle = engine.open_from_filename(MEMORY).await.unwrap();
        let stmt = engine
            .prepare_statement(handle, "SELECT 1 AS one, 'a' AS letter", &[])
            .await
            .unwrap();
        assert_eq!(engine.live_statements(), 1);

        let row = engine.step_statement(handle, stmt).await.unwrap().unwrap();
        assert_eq!(row.get("one"), Some(&Value::Integer(1)));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["one", "letter"]);

        assert!(engine.step_statement(handle, stmt).await.unwrap().is_none());
        assert_eq!(engine.live_statements(), 0);
        assert!(engine.step_statement(handle, stmt).await.is_err());
    }

    #[tokio::test]
    async fn test_statement_bound_to_handle() {
        let engine = RusqliteEngine::new();
        let first = engine.open_from_filename(MEMORY).await.unwrap();
        let second = engine.open_from_filename(MEMORY).await.unwrap();
        assert_ne!(first, second);

        let stmt = engine.prepare_statement(first, "SELECT 1", &[]).await.unwrap();
        let err = engine.step_statement(second, stmt).await.unwrap_err();
        assert!(err.message().contains("no such statement"));

        engine.close_database(second).await.unwrap();
        assert_eq!(engine.live_statements(), 1);
    }

    #[tokio::test]
    async fn test_close_waits_for_live_statement() {
        let engine = Arc::new(RusqliteEngine::new());
        let handle = engine.open_from_filename(MEMORY).await.unwrap();
        let stmt = engine
            .prepare_statement(handle, "SELECT 1 AS one UNION ALL SELECT 2", &[])
            .await
            .unwrap();

        let closer = Arc::clone(&engine);
        let close = tokio::spawn(async move { closer.close_database(handle).await });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(!close.is_finished());
        assert_eq!(engine.open_connections(), 1);

        let err = engine.prepare_statement(handle, "SELECT 3", &[]).await.unwrap_err();
        assert_eq!(err.message(), "database is closing");

        let mut seen = Vec::new();
        while let Some(row) = engine.step_statement(handle, stmt).await.unwrap() {
            seen.push(row.get("one").and_then(Value::as_integer));
        }
        assert_eq!(seen, vec![Some(1), Some(2)]);

        close.await.unwrap().unwrap();
        assert_eq!(engine.open_connections(), 0);
        assert_eq!(engine.live_statements(), 0);
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_exec() {
        let engine = Arc::new(RusqliteEngine::new());
        let handle = engine.open_from_filename(MEMORY).await.unwrap();
        let lease = engine.lease(handle).unwrap();

        let closer = Arc::clone(&engine);
        let close = tokio::spawn(async move { closer.close_database(handle).await });
        tokio::task::yield_now().await;
        assert!(!close.is_finished());

        lease
            .connection()
            .lock()
            .execute_batch("CREATE TABLE t (id INTEGER)")
            .unwrap();
        drop(lease);

        close.await.unwrap().unwrap();
        assert_eq!(engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_cursor_steps_lazily() {
        let engine = RusqliteEngine::new();
        let handle = engine.open_from_filename(MEMORY).await.unwrap();

        // Unbounded result set: only rows that are stepped get read.
        let stmt = engine
            .prepare_statement(
                handle,
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT x FROM c",
                &[],
            )
            .await
            .unwrap();
        for expected in 1..=3 {
            let row = engine.step_statement(handle, stmt).await.unwrap().unwrap();
            assert_eq!(row.get("x"), Some(&Value::Integer(expected)));
        }
        assert_eq!(engine.live_statements(), 1);
        drop(engine);
    }

    #[tokio::test]
    async fn test_bind_failure_releases_connection() {
        let engine = RusqliteEngine::new();
        let handle = engine.open_from_filename(MEMORY).await.unwrap();
        let stmt = engine
            .prepare_statement(handle, "SELECT ? AS a", &[Value::Integer(1), Value::Integer(2)])
            .await;
        assert!(stmt.is_err());
        assert_eq!(engine.live_statements(), 0);

        engine.close_database(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_prepare_reports_sqlite_message() {
        let engine = RusqliteEngine::new();
        let handle = engine.open_from_filename(MEMORY).await.unwrap();
        let err = engine
            .prepare_statement(handle, "SELECT * FROM t", &[])
            .await
            .unwrap_err();
        assert_eq!(err.message(), "no such table: t");
    }

    #[test]
    fn test_with_base_dir_resolves_names() {
        let engine = RusqliteEngine::with_base_dir("/data");
        assert_eq!(engine.base_dir(), Some(Path::new("/data")));
        assert_eq!(engine.resolve("app.sqlite"), PathBuf::from("/data/app.sqlite"));
        assert_eq!(RusqliteEngine::new().resolve("app.sqlite"), PathBuf::from("app.sqlite"));
    }
}
