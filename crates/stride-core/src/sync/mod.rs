//! Sync engine: reconciles the local store with the shared remote store.
//!
//! Local writes never wait on the network. A sync cycle pushes the mutation
//! log and pulls remote changes per table through [`SyncCoordinator`], which
//! allows one cycle per user at a time.

mod coordinator;
mod error;
mod http;
mod remote;
mod report;
mod resolver;
mod retry;
mod sqlite_remote;


use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use coordinator::{IdleState, SyncCoordinator, SyncOutcome};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemote;
pub use remote::{
    AcceptedRecord, PullCursor, PullResponse, PushRequest, PushResponse, RejectReason,
    RejectedRecord, RemoteEndpoint,
};
pub use report::{SyncReport, TableSyncReport};
pub use resolver::{resolve, ConflictResolver, MergeSummary, Resolution, ResolutionRule, Winner};
pub use retry::RetryPolicy;
pub use sqlite_remote::SqliteRemote;

/// Which half of a cycle to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
    /// Pull, then push: locally winning conflicts are re-sent in the same
    /// cycle
    #[default]
    Both,
}

impl SyncDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Both => "both",
        }
    }

    #[must_use]
    pub const fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::Both)
    }

    #[must_use]
    pub const fn pulls(self) -> bool {
        matches!(self, Self::Pull | Self::Both)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            "both" => Ok(Self::Both),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown sync direction `{other}` (expected push, pull or both)"
            ))),
        }
    }
}
