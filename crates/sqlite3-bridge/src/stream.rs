//! Row stream over one execute call.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::StatementError;
use crate::value::Row;

/// Rows of one statement in engine order, ending with the error if it failed.
pub struct RowStream {
    inner: UnboundedReceiverStream<Result<Row, StatementError>>,
}

impl RowStream {
    pub(crate) fn new(rx: UnboundedReceiver<Result<Row, StatementError>>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(rx),
        }
    }
}

impl Stream for RowStream {
    type Item = Result<Row, StatementError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::value::Value;

    #[test]
    fn test_pending_until_row_arrives() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = task::spawn(RowStream::new(rx));

        assert_pending!(stream.poll_next());

        let row: Row = [("id", Value::from(1))].into_iter().collect();
        tx.send(Ok(row.clone())).unwrap();
        assert!(stream.is_woken());
        let item = assert_ready!(stream.poll_next());
        assert_eq!(item.unwrap().unwrap(), row);

        drop(tx);
        assert!(assert_ready!(stream.poll_next()).is_none());
    }

    #[tokio::test]
    async fn test_error_item_ends_stream() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Err(StatementError::native("interrupted"))).unwrap();
        drop(tx);

        let items: Vec<_> = RowStream::new(rx).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().message(), "interrupted");
    }
}
