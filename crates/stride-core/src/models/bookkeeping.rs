//! Sync bookkeeping model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::models::{SyncTable, UserId};

/// Cycle status of one (table, user) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Conflict => "conflict",
        }
    }

    /// Whether this is a terminal status of a finished cycle.
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Conflict)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "syncing" => Ok(Self::Syncing),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::InvalidInput(format!("unknown sync status `{other}`"))),
        }
    }
}

/// One record per (table, user) describing the last sync cycles.
///
/// Consumed by observability and UI layers ("last synced ..." and the
/// non-blocking failure warning).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBookkeeping {
    pub table_name: SyncTable,
    pub user_id: UserId,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    /// Diagnostic counter, never decreases
    pub conflict_count: i64,
    pub error_message: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub record_count: Option<i64>,
    /// Opaque remote cursor for incremental pulls
    pub sync_token: Option<String>,
    /// Optimistic counter of the bookkeeping row itself
    pub version: i64,
}

impl SyncBookkeeping {
    /// Fresh bookkeeping for a table that has never been synced
    #[must_use]
    pub const fn new(table_name: SyncTable, user_id: UserId) -> Self {
        Self {
            table_name,
            user_id,
            last_sync_at: None,
            last_push_at: None,
            last_pull_at: None,
            sync_status: SyncStatus::Idle,
            conflict_count: 0,
            error_message: None,
            last_error_at: None,
            record_count: None,
            sync_token: None,
            version: 1,
        }
    }
}
