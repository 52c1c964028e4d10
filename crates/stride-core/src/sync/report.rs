//! Per-cycle sync reports

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::SyncError;
use super::SyncDirection;
use crate::models::{SyncStatus, SyncTable, UserId};

/// What one cycle did to one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSyncReport {
    pub table: SyncTable,
    pub status: SyncStatus,
    /// Records the remote accepted
    pub pushed: usize,
    /// Records the remote rejected; still queued
    pub rejected: usize,
    /// Remote values written locally
    pub pulled: usize,
    /// Conflicts resolved during the pull
    pub conflicts: u64,
    /// Live records after the cycle
    pub record_count: Option<i64>,
    /// Cycle failure, or the first rejection when the cycle itself completed
    pub error: Option<SyncError>,
}

impl TableSyncReport {
    pub(crate) const fn new(table: SyncTable) -> Self {
        Self {
            table,
            status: SyncStatus::Syncing,
            pushed: 0,
            rejected: 0,
            pulled: 0,
            conflicts: 0,
            record_count: None,
            error: None,
        }
    }
}

/// Outcome of one `sync` call, shared by every caller that joined it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub user_id: UserId,
    pub direction: SyncDirection,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableSyncReport>,
}

impl SyncReport {
    /// Aggregate status: any error, else any conflict, else success
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let statuses = self.tables.iter().map(|table| table.status);
        if statuses.clone().any(|status| status == SyncStatus::Error) {
            SyncStatus::Error
        } else if statuses.clone().any(|status| status == SyncStatus::Conflict) {
            SyncStatus::Conflict
        } else {
            SyncStatus::Success
        }
    }

    #[must_use]
    pub fn table(&self, table: SyncTable) -> Option<&TableSyncReport> {
        self.tables.iter().find(|report| report.table == table)
    }

    #[must_use]
    pub fn total_conflicts(&self) -> u64 {
        self.tables.iter().map(|table| table.conflicts).sum()
    }

    #[must_use]
    pub fn total_pushed(&self) -> usize {
        self.tables.iter().map(|table| table.pushed).sum()
    }

    #[must_use]
    pub fn total_pulled(&self) -> usize {
        self.tables.iter().map(|table| table.pulled).sum()
    }

    /// Whether any table failed because credentials were rejected
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        self.tables
            .iter()
            .filter_map(|table| table.error.as_ref())
            .any(SyncError::requires_reauth)
    }

    /// Non-blocking warnings for the user, one per failed table
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|table| table.status == SyncStatus::Error)
            .map(|table| match &table.error {
                Some(error) => format!("{}: {error}", table.table),
                None => format!("{}: sync failed", table.table),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::now;
    use pretty_assertions::assert_eq;

    fn report(tables: Vec<TableSyncReport>) -> SyncReport {
        SyncReport {
            user_id: "u1".parse().unwrap(),
            direction: SyncDirection::Both,
            started_at: now(),
            finished_at: now(),
            tables,
        }
    }

    fn table(table: SyncTable, status: SyncStatus, error: Option<SyncError>) -> TableSyncReport {
        TableSyncReport {
            status,
            error,
            ..TableSyncReport::new(table)
        }
    }

    #[test]
    fn aggregate_status_prefers_error_then_conflict() {
        let ok = report(vec![table(SyncTable::Sessions, SyncStatus::Success, None)]);
        assert_eq!(ok.status(), SyncStatus::Success);
        assert!(ok.warnings().is_empty());

        let conflicted = report(vec![
            table(SyncTable::Sessions, SyncStatus::Success, None),
            table(SyncTable::Templates, SyncStatus::Conflict, None),
        ]);
        assert_eq!(conflicted.status(), SyncStatus::Conflict);

        let failed = report(vec![
            table(SyncTable::Sessions, SyncStatus::Conflict, None),
            table(
                SyncTable::Templates,
                SyncStatus::Error,
                Some(SyncError::Auth("token expired".into())),
            ),
        ]);
        assert_eq!(failed.status(), SyncStatus::Error);
        assert!(failed.requires_reauth());
        assert_eq!(
            failed.warnings(),
            vec!["templates: Authorization failed: token expired".to_string()]
        );
    }
}
