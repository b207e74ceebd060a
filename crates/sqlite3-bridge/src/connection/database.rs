//! The connection handle and its lifecycle.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::queue::{PendingOperation, PendingQueue};
use super::state::{ConnectionState, Lifecycle};
use crate::error::StatementError;
use crate::executor::{CompletionCallback, Executor, RowCallback, RowProtocol};
use crate::native::NativeResult;
use crate::stream::RowStream;
use crate::value::{HandleId, Row, Value};

/// Issue the first native call of `job` before returning, then finish it on
/// a spawned task.
///
/// Admission runs in submission order, so native calls are issued in that
/// order too, whatever order the scheduler later polls the tasks in. The
/// spawned task re-polls and registers its own waker.
fn dispatch(mut job: BoxFuture<'static, ()>) {
    let mut cx = Context::from_waker(futures::task::noop_waker_ref());
    match catch_unwind(AssertUnwindSafe(|| job.as_mut().poll(&mut cx))) {
        Ok(Poll::Pending) => {
            tokio::spawn(job);
        }
        Ok(Poll::Ready(())) => {}
        Err(_) => tracing::warn!("completion callback panicked"),
    }
}

/// Receives the outcome of `open`. Invoked exactly once.
pub type OpenCallback = Box<dyn FnOnce(Result<Database, StatementError>) + Send>;

/// How an operation is handled at submission time.
enum Admission {
    Queue,
    Run(HandleId),
    Reject(StatementError),
}

#[derive(Debug)]
struct Inner {
    lifecycle: Lifecycle,
    queue: PendingQueue,
}

impl Inner {
    /// Decide under the lock. A close moves the lifecycle to `Closing` here so
    /// nothing admitted after it can reach the handle.
    fn admit(&mut self, op: &PendingOperation, draining_pass: bool) -> Admission {
        if let Some(error) = self.lifecycle.rejection() {
            return Admission::Reject(error);
        }
        match self.lifecycle {
            // Mid-drain submissions wait behind the batch being replayed.
            Lifecycle::Open(handle) if draining_pass || !self.queue.is_draining() => {
                if matches!(op, PendingOperation::Close { .. }) {
                    self.lifecycle = Lifecycle::Closing;
                }
                Admission::Run(handle)
            }
            _ => Admission::Queue,
        }
    }
}

struct Shared {
    name: String,
    executor: Executor,
    inner: Mutex<Inner>,
}

/// One logical connection to a native database.
///
/// Cheap to clone; clones share the same lifecycle and queue. Work submitted
/// while the connection is opening is buffered and replayed in submission
/// order once the open succeeds, or failed with the open error.
///
/// Work submitted after the open failed, or once close has begun, is
/// rejected immediately with an error for which
/// [`StatementError::is_connection_unusable`] holds.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.shared.name)
            .field("protocol", &self.shared.executor.protocol())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Issue the native open and return the still-opening handle.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn open(executor: Executor, name: &str, callback: OpenCallback) -> Self {
        let db = Self {
            shared: Arc::new(Shared {
                name: name.to_owned(),
                executor,
                inner: Mutex::new(Inner {
                    lifecycle: Lifecycle::Opening,
                    queue: PendingQueue::default(),
                }),
            }),
        };
        tracing::debug!(
            database = %db.shared.name,
            protocol = %db.shared.executor.protocol(),
            "opening database"
        );

        let task_db = db.clone();
        tokio::spawn(async move {
            let result = task_db.shared.executor.open(&task_db.shared.name).await;
            task_db.finish_open(result, callback);
        });
        db
    }

    fn finish_open(&self, result: NativeResult<HandleId>, callback: OpenCallback) {
        match result {
            Ok(handle) => {
                let batch = {
                    let mut inner = self.shared.inner.lock();
                    inner.lifecycle = Lifecycle::Open(handle);
                    inner.queue.begin_drain()
                };
                tracing::info!(database = %self.shared.name, handle = %handle, "database open");
                self.drain(batch);
                callback(Ok(self.clone()));
            }
            Err(native) => {
                let error = StatementError::native(native);
                let pending = {
                    let mut inner = self.shared.inner.lock();
                    inner.lifecycle = Lifecycle::Failed(error.clone());
                    inner.queue.take_all()
                };
                tracing::warn!(
                    database = %self.shared.name,
                    error = %error,
                    failed = pending.len(),
                    "database open failed"
                );
                for op in pending {
                    op.fail(error.clone());
                }
                callback(Err(error));
            }
        }
    }

    /// Replay queued work in FIFO order, including work queued mid-drain.
    fn drain(&self, mut batch: VecDeque<PendingOperation>) {
        let mut drained = 0_usize;
        loop {
            for op in batch.drain(..) {
                drained += 1;
                let admission = self.shared.inner.lock().admit(&op, true);
                self.act(admission, op);
            }
            match self.shared.inner.lock().queue.next_batch() {
                Some(next) => batch = next,
                None => break,
            }
        }
        if drained > 0 {
            tracing::debug!(database = %self.shared.name, drained, "pending operations drained");
        }
    }

    fn submit(&self, op: PendingOperation) {
        let admission = {
            let mut inner = self.shared.inner.lock();
            let admission = inner.admit(&op, false);
            if matches!(admission, Admission::Queue) {
                tracing::trace!(kind = op.kind(), "operation queued until open resolves");
                inner.queue.push(op);
                return;
            }
            admission
        };
        self.act(admission, op);
    }

    fn act(&self, admission: Admission, op: PendingOperation) {
        match admission {
            Admission::Run(handle) => self.start(handle, op),
            Admission::Reject(error) => {
                tracing::debug!(
                    database = %self.shared.name,
                    kind = op.kind(),
                    error = %error,
                    "operation rejected"
                );
                op.fail(error);
            }
            Admission::Queue => self.shared.inner.lock().queue.push(op),
        }
    }

    fn start(&self, handle: HandleId, op: PendingOperation) {
        let job: BoxFuture<'static, ()> = match op {
            PendingOperation::Execute {
                sql,
                params,
                on_row,
                on_complete,
            } => {
                let executor = self.shared.executor.clone();
                async move {
                    let result = executor.execute(handle, &sql, &params, on_row).await;
                    on_complete(result);
                }
                .boxed()
            }
            PendingOperation::Close { on_close } => {
                tracing::debug!(database = %self.shared.name, handle = %handle, "closing database");
                let db = self.clone();
                async move {
                    let result = db.shared.executor.close(handle).await;
                    db.finish_close(handle, result, on_close);
                }
                .boxed()
            }
        };
        dispatch(job);
    }

    fn finish_close(
        &self,
        handle: HandleId,
        result: NativeResult<()>,
        on_close: Option<CompletionCallback>,
    ) {
        let result = match result {
            Ok(()) => {
                self.shared.inner.lock().lifecycle = Lifecycle::Closed;
                tracing::info!(database = %self.shared.name, "database closed");
                Ok(())
            }
            Err(native) => {
                // The engine still owns the handle; keep it usable.
                self.shared.inner.lock().lifecycle = Lifecycle::Open(handle);
                let error = StatementError::native(native);
                tracing::warn!(database = %self.shared.name, error = %error, "database close failed");
                Err(error)
            }
        };
        if let Some(on_close) = on_close {
            on_close(result);
        }
    }

    /// Run `sql` with `params`, streaming rows to `on_row`.
    ///
    /// `on_complete` fires exactly once, after every `on_row` call for this
    /// statement. Rows arrive in engine order. Calls issued concurrently on
    /// one connection are not ordered relative to each other.
    pub fn execute_sql<R, C>(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
        on_row: R,
        on_complete: C,
    ) where
        R: FnMut(Row) + Send + 'static,
        C: FnOnce(Result<(), StatementError>) + Send + 'static,
    {
        let on_row: RowCallback = Box::new(on_row);
        let on_complete: CompletionCallback = Box::new(on_complete);
        self.submit(PendingOperation::Execute {
            sql: sql.into(),
            params,
            on_row,
            on_complete,
        });
    }

    /// Close without observing the outcome.
    pub fn close(&self) {
        self.submit(PendingOperation::Close { on_close: None });
    }

    /// Close and report the outcome to `callback`.
    pub fn close_with<C>(&self, callback: C)
    where
        C: FnOnce(Result<(), StatementError>) + Send + 'static,
    {
        self.submit(PendingOperation::Close {
            on_close: Some(Box::new(callback)),
        });
    }

    /// Async form of [`Database::execute_sql`].
    pub async fn execute<R>(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
        on_row: R,
    ) -> Result<(), StatementError>
    where
        R: FnMut(Row) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute_sql(sql, params, on_row, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or_else(|_| Err(StatementError::abandoned()))
    }

    /// Stream the rows of `sql`.
    ///
    /// Rows not yet consumed are buffered in the stream. A failing statement
    /// ends the stream with its error.
    pub fn query(&self, sql: impl Into<String>, params: Vec<Value>) -> RowStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let row_tx = tx.clone();
        self.execute_sql(
            sql,
            params,
            move |row| {
                let _ = row_tx.send(Ok(row));
            },
            move |result| {
                if let Err(error) = result {
                    let _ = tx.send(Err(error));
                }
            },
        );
        RowStream::new(rx)
    }

    /// Collect every row of `sql`.
    pub async fn fetch_all(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<Vec<Row>, StatementError> {
        let rows = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&rows);
        self.execute(sql, params, move |row| sink.lock().push(row))
            .await?;
        let rows = std::mem::take(&mut *rows.lock());
        Ok(rows)
    }

    /// Async form of [`Database::close_with`].
    pub async fn close_and_wait(&self) -> Result<(), StatementError> {
        let (tx, rx) = oneshot::channel();
        self.close_with(move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or_else(|_| Err(StatementError::abandoned()))
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().lifecycle.state()
    }

    /// Native handle, present only while open.
    #[must_use]
    pub fn handle(&self) -> Option<HandleId> {
        self.shared.inner.lock().lifecycle.handle()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn protocol(&self) -> RowProtocol {
        self.shared.executor.protocol()
    }

    /// Operations waiting for the open to resolve.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }
}
