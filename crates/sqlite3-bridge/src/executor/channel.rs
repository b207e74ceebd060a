//! Protocol B: one exec call, rows pushed on a dedicated event channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::RowCallback;
use crate::error::StatementError;
use crate::events::ChannelToken;
use crate::native::ChannelEngine;
use crate::value::{HandleId, Value};

/// Returns the number of rows delivered.
pub(super) async fn run(
    engine: &dyn ChannelEngine,
    handle: HandleId,
    sql: &str,
    params: &[Value],
    mut on_row: RowCallback,
) -> Result<u64, StatementError> {
    let token = ChannelToken::next();
    let delivered = Arc::new(AtomicU64::new(0));

    // Must be live before exec is issued; the guard releases it on every exit path.
    let counter = Arc::clone(&delivered);
    let subscription = engine.events().subscribe(token.clone(), move |row| {
        counter.fetch_add(1, Ordering::Relaxed);
        on_row(row);
    });

    let result = engine.exec_on_database(handle, sql, params, &token).await;
    subscription.unsubscribe();

    result
        .map(|()| delivered.load(Ordering::Relaxed))
        .map_err(StatementError::native)
}
