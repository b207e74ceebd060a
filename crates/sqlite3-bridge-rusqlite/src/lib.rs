//! Bundled SQLite native engine for `sqlite3-bridge`.
//!
//! [`RusqliteEngine`] implements both capability surfaces, so a database can
//! be opened with either row protocol:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use sqlite3_bridge_rusqlite::RusqliteEngine;
//!
//! let engine = Arc::new(RusqliteEngine::with_base_dir(data_dir));
//! let db = sqlite3_bridge::connect(engine, "app.sqlite").await?;
//! let rows = db.fetch_all("SELECT id FROM t WHERE id > ?", vec![1.into()]).await?;
//! ```

mod convert;
mod cursor;
mod engine;

pub use engine::{MEMORY, RusqliteEngine};
