//! Operations buffered while the connection is opening.
//!
//! Entries are tagged records, not closures, so draining and failing are
//! plain matches over a finite set of operations.

use std::collections::VecDeque;
use std::fmt;

use crate::error::StatementError;
use crate::executor::{CompletionCallback, RowCallback};
use crate::value::Value;

/// One deferred unit of work with the callback that must see its outcome.
pub(crate) enum PendingOperation {
    Execute {
        sql: String,
        params: Vec<Value>,
        on_row: RowCallback,
        on_complete: CompletionCallback,
    },
    Close {
        on_close: Option<CompletionCallback>,
    },
}

impl PendingOperation {
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "execute",
            Self::Close { .. } => "close",
        }
    }

    /// Complete without touching the native engine.
    pub(crate) fn fail(self, error: StatementError) {
        match self {
            Self::Execute { on_complete, .. } => on_complete(Err(error)),
            Self::Close { on_close } => {
                if let Some(on_close) = on_close {
                    on_close(Err(error));
                }
            }
        }
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execute { sql, params, .. } => f
                .debug_struct("Execute")
                .field("sql", sql)
                .field("params", &params.len())
                .finish_non_exhaustive(),
            Self::Close { on_close } => f
                .debug_struct("Close")
                .field("has_callback", &on_close.is_some())
                .finish(),
        }
    }
}

/// FIFO buffer with a drain-in-progress flag.
///
/// While a drain pass runs, the batch being dispatched lives outside the
/// queue and new submissions land in `entries`. The drainer picks them up
/// with [`PendingQueue::next_batch`] until the queue is empty, at which point
/// the flag clears in the same critical section.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: VecDeque<PendingOperation>,
    draining: bool,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, op: PendingOperation) {
        self.entries.push_back(op);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) const fn is_draining(&self) -> bool {
        self.draining
    }

    /// Start a drain pass and take the first batch.
    pub(crate) fn begin_drain(&mut self) -> VecDeque<PendingOperation> {
        self.draining = true;
        std::mem::take(&mut self.entries)
    }

    /// Take entries queued during the previous pass, or end the drain.
    pub(crate) fn next_batch(&mut self) -> Option<VecDeque<PendingOperation>> {
        if self.entries.is_empty() {
            self.draining = false;
            None
        } else {
            Some(std::mem::take(&mut self.entries))
        }
    }

    /// Take everything for failing. Ends any drain.
    pub(crate) fn take_all(&mut self) -> VecDeque<PendingOperation> {
        self.draining = false;
        std::mem::take(&mut self.entries)
    }
}
