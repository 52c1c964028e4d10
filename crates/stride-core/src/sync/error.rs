//! Sync failure taxonomy

use serde::Serialize;
use thiserror::Error;

/// Classified failure of a sync step.
///
/// `Clone` so one single-flight outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SyncError {
    /// Malformed record or payload; never retried
    #[error("Validation failed: {0}")]
    Validation(String),
    /// Credentials rejected; the caller must re-authenticate
    #[error("Authorization failed: {0}")]
    Auth(String),
    /// Timeout or connectivity failure; retried with backoff
    #[error("Network error: {0}")]
    TransientNetwork(String),
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Divergent versions; resolved by the next pull
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The local store failed while applying sync results
    #[error("Local store error: {0}")]
    LocalStore(String),
    /// Another cycle holds the (table, user) bookkeeping row
    #[error("Sync already in progress for {0}")]
    CycleInProgress(String),
    /// The cycle task ended without reporting a result
    #[error("Sync cycle interrupted: {0}")]
    Interrupted(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Whether the retry controller may re-attempt the failed call
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Whether the caller has to re-authenticate before syncing again
    #[must_use]
    pub const fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Conflicts are resolved automatically and are not cycle failures
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<crate::Error> for SyncError {
    fn from(error: crate::Error) -> Self {
        match error {
            crate::Error::Sync(error) => error,
            crate::Error::InvalidInput(message) => Self::Validation(message),
            other => Self::LocalStore(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(SyncError::TransientNetwork("timeout".into()).is_retryable());
        assert!(!SyncError::Auth("expired".into()).is_retryable());
        assert!(!SyncError::Validation("bad".into()).is_retryable());
        assert!(!SyncError::QuotaExceeded("limit".into()).is_retryable());
        assert!(!SyncError::Conflict("stale".into()).is_retryable());
    }

    #[test]
    fn core_errors_convert_without_nesting() {
        let wrapped = crate::Error::Sync(SyncError::Auth("expired".into()));
        assert_eq!(SyncError::from(wrapped), SyncError::Auth("expired".into()));

        let invalid = crate::Error::InvalidInput("missing key".into());
        assert_eq!(
            SyncError::from(invalid),
            SyncError::Validation("missing key".into())
        );

        let missing = crate::Error::NotFound("sessions/x".into());
        assert!(matches!(
            SyncError::from(missing),
            SyncError::LocalStore(_)
        ));
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(SyncError::QuotaExceeded("plan limit".into())).unwrap();
        assert_eq!(json["kind"], "quota_exceeded");
        assert_eq!(json["message"], "plan limit");
    }
}
