//! Data models for Stride

mod bookkeeping;
mod mutation;
mod record;

pub use bookkeeping::{SyncBookkeeping, SyncStatus};
pub use mutation::PendingMutation;
pub use record::{EntityRecord, RecordDraft, RecordId, SyncTable, UserId};
