//! TuneForge Store: durable SQLite registry for jobs and the budget ledger.

pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::JobStore;
pub use types::*;
