//! Protocol A: prepare, then step one row at a time.

use super::{RowCallback, deliver_row};
use crate::error::StatementError;
use crate::native::CursorEngine;
use crate::value::{HandleId, Value};

/// Returns the number of rows delivered.
pub(super) async fn run(
    engine: &dyn CursorEngine,
    handle: HandleId,
    sql: &str,
    params: &[Value],
    mut on_row: RowCallback,
) -> Result<u64, StatementError> {
    let statement = engine
        .prepare_statement(handle, sql, params)
        .await
        .map_err(StatementError::native)?;
    tracing::trace!(statement = %statement, "statement prepared");

    let mut delivered = 0_u64;
    loop {
        // Next step is issued only after the previous one resolved.
        let step = engine
            .step_statement(handle, statement)
            .await
            .map_err(StatementError::native)?;

        match step {
            Some(row) => {
                delivered += 1;
                deliver_row(&mut on_row, row);
            }
            None => return Ok(delivered),
        }
    }
}
