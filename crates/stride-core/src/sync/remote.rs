//! Remote endpoint contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{SyncError, SyncResult};
use crate::models::{EntityRecord, RecordId, SyncBookkeeping, SyncTable, UserId};

/// Position a pull resumes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullCursor {
    /// Nothing pulled yet
    Beginning,
    /// Opaque cursor returned by the previous pull
    Token(String),
    /// Remote does not issue cursors; fetch changes after this instant
    Since(DateTime<Utc>),
}

impl PullCursor {
    /// Resume point recorded in a table's bookkeeping
    #[must_use]
    pub fn from_bookkeeping(bookkeeping: &SyncBookkeeping) -> Self {
        if let Some(token) = &bookkeeping.sync_token {
            return Self::Token(token.clone());
        }
        bookkeeping
            .last_pull_at
            .map_or(Self::Beginning, Self::Since)
    }
}

/// A record the remote stored, with the version it now holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedRecord {
    pub id: RecordId,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The remote holds the same or a newer version
    StaleVersion,
    /// The remote record is a tombstone
    Deleted,
    /// Another live remote record holds the same natural key
    DuplicateKey,
    /// The payload failed remote validation
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRecord {
    pub id: RecordId,
    pub reason: RejectReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RejectedRecord {
    /// Classify the rejection. Version disputes are conflicts for the next
    /// pull to resolve; invalid payloads are validation failures.
    #[must_use]
    pub fn to_error(&self) -> SyncError {
        let detail = self
            .message
            .as_deref()
            .map_or_else(String::new, |message| format!(": {message}"));
        match self.reason {
            RejectReason::StaleVersion => {
                SyncError::Conflict(format!("{} has a newer remote version{detail}", self.id))
            }
            RejectReason::Deleted => {
                SyncError::Conflict(format!("{} is deleted remotely{detail}", self.id))
            }
            RejectReason::DuplicateKey => SyncError::Conflict(format!(
                "{} duplicates the natural key of a remote record{detail}",
                self.id
            )),
            RejectReason::Invalid => {
                SyncError::Validation(format!("{} was rejected{detail}", self.id))
            }
        }
    }
}

/// Per-record outcome of a push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    #[serde(default)]
    pub accepted: Vec<AcceptedRecord>,
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Changed records in the order the remote applied them
    #[serde(default)]
    pub records: Vec<EntityRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub user_id: UserId,
    pub records: Vec<EntityRecord>,
}

/// The shared remote store.
///
/// Implementations must accept a push idempotently per
/// (record id, submitted version): re-sending an accepted record returns the
/// same accepted version without writing again.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn push(
        &self,
        table: SyncTable,
        user: &UserId,
        records: &[EntityRecord],
    ) -> SyncResult<PushResponse>;

    async fn pull(
        &self,
        table: SyncTable,
        user: &UserId,
        cursor: &PullCursor,
    ) -> SyncResult<PullResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::now;
    use pretty_assertions::assert_eq;

    #[test]
    fn cursor_prefers_token_over_timestamp() {
        let user: UserId = "u1".parse().unwrap();
        let mut bookkeeping = SyncBookkeeping::new(SyncTable::Sessions, user);
        assert_eq!(
            PullCursor::from_bookkeeping(&bookkeeping),
            PullCursor::Beginning
        );

        let pulled_at = now();
        bookkeeping.last_pull_at = Some(pulled_at);
        assert_eq!(
            PullCursor::from_bookkeeping(&bookkeeping),
            PullCursor::Since(pulled_at)
        );

        bookkeeping.sync_token = Some("42".into());
        assert_eq!(
            PullCursor::from_bookkeeping(&bookkeeping),
            PullCursor::Token("42".into())
        );
    }

    #[test]
    fn push_response_uses_wire_names() {
        let payload = r#"{
            "accepted": [{"id": "a", "version": 2}],
            "rejected": [{"id": "b", "reason": "stale_version"}]
        }"#;
        let response: PushResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(response.accepted[0].version, 2);
        assert_eq!(response.rejected[0].reason, RejectReason::StaleVersion);
        assert!(response.rejected[0].to_error().is_conflict());

        let pull: PullResponse =
            serde_json::from_str(r#"{"records": [], "nextCursor": "7"}"#).unwrap();
        assert_eq!(pull.next_cursor.as_deref(), Some("7"));
        assert!(!pull.has_more);
    }

    #[test]
    fn invalid_rejection_is_validation_error() {
        let rejected = RejectedRecord {
            id: "a".parse().unwrap(),
            reason: RejectReason::Invalid,
            message: Some("missing key".into()),
        };
        assert!(matches!(rejected.to_error(), SyncError::Validation(message) if message.contains("missing key")));
    }
}
