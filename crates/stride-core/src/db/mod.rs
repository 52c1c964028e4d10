//! Database layer for Stride

mod bookkeeping;
mod connection;
mod migrations;
mod mutation_log;
mod records;
mod store;

pub use bookkeeping::{BookkeepingRepository, CycleOutcome};
pub use connection::Database;
pub use mutation_log::MutationLog;
pub use records::{next_version, ListFilter, RecordRepository, WriteOutcome};
pub use store::LocalStore;
