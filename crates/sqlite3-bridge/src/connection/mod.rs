//! Connection lifecycle and the pending-operation queue.

mod database;
mod queue;
mod state;

pub use database::{Database, OpenCallback};
pub use state::ConnectionState;
