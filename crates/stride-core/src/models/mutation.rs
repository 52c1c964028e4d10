//! Pending mutation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EntityRecord, SyncTable};

/// A local write not yet acknowledged by the remote store.
///
/// Keyed by (table, record id): repeated edits before a push collapse into
/// one entry holding the newest value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub table: SyncTable,
    /// Latest local value, tombstones included
    pub record: EntityRecord,
    /// Local version the value was written with
    pub local_version: i64,
    pub queued_at: DateTime<Utc>,
}
