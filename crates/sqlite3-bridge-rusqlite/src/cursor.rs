//! Live SQLite cursors stepped on a blocking worker.
//!
//! `rusqlite::Statement` borrows its connection, so each prepared statement
//! gets a worker on the blocking pool that owns the borrow for the cursor's
//! lifetime and answers step requests one row at a time. The worker holds the
//! connection lock and its lease until the cursor is finished or dropped.

use parking_lot::Mutex;
use rusqlite::{Connection, params_from_iter};
use sqlite3_bridge::{HandleId, NativeError, NativeResult, Row, Value};
use tokio::sync::{mpsc, oneshot};

use crate::convert;
use crate::engine::Lease;

type StepReply = oneshot::Sender<NativeResult<Option<Row>>>;

fn worker_stopped() -> NativeError {
    NativeError::new("sqlite cursor worker stopped")
}

/// A prepared statement whose cursor lives on a blocking worker.
///
/// Dropping it ends the worker and finalizes the statement.
pub(crate) struct LiveCursor {
    handle: HandleId,
    requests: mpsc::UnboundedSender<StepReply>,
}

impl LiveCursor {
    /// Prepare `sql` with `params` bound. Resolves once the statement is
    /// ready, or with SQLite's error.
    pub(crate) async fn prepare(
        handle: HandleId,
        lease: Lease,
        sql: String,
        params: Vec<Value>,
    ) -> NativeResult<Self> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (requests, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || run(lease, &sql, &params, ready_tx, rx));
        ready_rx.await.map_err(|_| worker_stopped())??;
        Ok(Self { handle, requests })
    }

    pub(crate) const fn handle(&self) -> HandleId {
        self.handle
    }

    /// Ask for the next row. Requests are answered in order.
    pub(crate) fn step(&self) -> NativeResult<oneshot::Receiver<NativeResult<Option<Row>>>> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(tx).map_err(|_| worker_stopped())?;
        Ok(rx)
    }
}

/// Last message of a worker, sent after the connection is released.
enum Final {
    Failed(oneshot::Sender<NativeResult<()>>, NativeError),
    Step(StepReply, NativeResult<Option<Row>>),
}

impl Final {
    fn send(self) {
        match self {
            Self::Failed(ready, err) => {
                let _ = ready.send(Err(err));
            }
            Self::Step(reply, outcome) => {
                let _ = reply.send(outcome);
            }
        }
    }
}

fn run(
    lease: Lease,
    sql: &str,
    params: &[Value],
    ready: oneshot::Sender<NativeResult<()>>,
    mut requests: mpsc::UnboundedReceiver<StepReply>,
) {
    let last = serve(lease.connection(), sql, params, ready, &mut requests);
    // Whoever sees the last message may close the connection right away.
    drop(lease);
    if let Some(last) = last {
        last.send();
    }
}

fn serve(
    conn: &Mutex<Connection>,
    sql: &str,
    params: &[Value],
    ready: oneshot::Sender<NativeResult<()>>,
    requests: &mut mpsc::UnboundedReceiver<StepReply>,
) -> Option<Final> {
    let conn = conn.lock();
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => return Some(Final::Failed(ready, convert::native_error(&e))),
    };
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = match stmt.query(params_from_iter(params.iter().map(convert::to_sql))) {
        Ok(rows) => rows,
        Err(e) => return Some(Final::Failed(ready, convert::native_error(&e))),
    };
    if ready.send(Ok(())).is_err() {
        return None;
    }

    while let Some(reply) = requests.blocking_recv() {
        let next = match rows.next() {
            Ok(Some(row)) => convert::read_row(row, &columns).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match next {
            Ok(Some(row)) => {
                let _ = reply.send(Ok(Some(row)));
            }
            Ok(None) => return Some(Final::Step(reply, Ok(None))),
            Err(e) => return Some(Final::Step(reply, Err(convert::native_error(&e)))),
        }
    }
    None
}
