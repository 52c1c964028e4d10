//! Sync bookkeeping repository

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{SyncBookkeeping, SyncStatus, SyncTable, UserId};
use crate::sync::SyncError;
use crate::util::{from_millis, to_millis};

const BOOKKEEPING_COLUMNS: &str = "table_name, user_id, last_sync_at, last_push_at, last_pull_at,
     sync_status, conflict_count, error_message, last_error_at, record_count, sync_token, version";

/// How a cycle ended for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub status: SyncStatus,
    pub finished_at: DateTime<Utc>,
    pub record_count: i64,
    pub error_message: Option<String>,
}

/// `SQLite` access to the `sync_bookkeeping` table.
///
/// Every write bumps the row's own `version`.
pub struct BookkeepingRepository<'a> {
    conn: &'a Connection,
}

impl<'a> BookkeepingRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_bookkeeping(row: &Row<'_>) -> rusqlite::Result<SyncBookkeeping> {
        let parse_error = |index: usize, message: String| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                message.into(),
            )
        };

        let table_name: String = row.get(0)?;
        let status: String = row.get(5)?;
        Ok(SyncBookkeeping {
            table_name: table_name
                .parse()
                .map_err(|error: Error| parse_error(0, error.to_string()))?,
            user_id: UserId::from_raw(row.get(1)?),
            last_sync_at: row.get::<_, Option<i64>>(2)?.map(from_millis),
            last_push_at: row.get::<_, Option<i64>>(3)?.map(from_millis),
            last_pull_at: row.get::<_, Option<i64>>(4)?.map(from_millis),
            sync_status: status
                .parse()
                .map_err(|error: Error| parse_error(5, error.to_string()))?,
            conflict_count: row.get(6)?,
            error_message: row.get(7)?,
            last_error_at: row.get::<_, Option<i64>>(8)?.map(from_millis),
            record_count: row.get(9)?,
            sync_token: row.get(10)?,
            version: row.get(11)?,
        })
    }

    pub fn get(&self, table: SyncTable, user: &UserId) -> Result<Option<SyncBookkeeping>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {BOOKKEEPING_COLUMNS} FROM sync_bookkeeping
                     WHERE table_name = ? AND user_id = ?"
                ),
                params![table.as_str(), user.as_str()],
                Self::parse_bookkeeping,
            )
            .optional()?;
        Ok(record)
    }

    /// Bookkeeping rows of a user, in table order
    pub fn list_for_user(&self, user: &UserId) -> Result<Vec<SyncBookkeeping>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BOOKKEEPING_COLUMNS} FROM sync_bookkeeping WHERE user_id = ?"
        ))?;
        let mut records = stmt
            .query_map(params![user.as_str()], Self::parse_bookkeeping)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        records.sort_by_key(|record| record.table_name);
        Ok(records)
    }

    /// Fetch the row, creating an idle one on first use
    pub fn ensure(&self, table: SyncTable, user: &UserId) -> Result<SyncBookkeeping> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_bookkeeping (table_name, user_id) VALUES (?, ?)",
            params![table.as_str(), user.as_str()],
        )?;
        self.get(table, user)?
            .ok_or_else(|| Error::NotFound(format!("bookkeeping {table}/{user}")))
    }

    /// Move the row to `syncing`.
    ///
    /// Fails with [`SyncError::CycleInProgress`] while another cycle holds the
    /// row. A `syncing` row older than `stale_after` was left behind by an
    /// interrupted process and is taken over.
    pub fn begin_cycle(
        &self,
        table: SyncTable,
        user: &UserId,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<SyncBookkeeping> {
        let current = self.ensure(table, user)?;
        let stale_before = now
            .checked_sub_signed(stale_after)
            .map_or(i64::MIN, |at| to_millis(&at));

        let rows = self.conn.execute(
            "UPDATE sync_bookkeeping
             SET sync_status = 'syncing', cycle_started_at = ?3, version = version + 1
             WHERE table_name = ?1 AND user_id = ?2
               AND (sync_status != 'syncing'
                    OR cycle_started_at IS NULL
                    OR cycle_started_at < ?4)",
            params![table.as_str(), user.as_str(), to_millis(&now), stale_before],
        )?;

        if rows == 0 {
            return Err(SyncError::CycleInProgress(format!("{table}/{user}")).into());
        }
        if current.sync_status == SyncStatus::Syncing {
            tracing::warn!(
                table = %table,
                user = %user,
                "Taking over stale sync cycle left by an interrupted run"
            );
        }

        self.get(table, user)?
            .ok_or_else(|| Error::NotFound(format!("bookkeeping {table}/{user}")))
    }

    /// Record a completed push phase
    pub fn record_push(&self, table: SyncTable, user: &UserId, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_bookkeeping SET last_push_at = ?3, version = version + 1
             WHERE table_name = ?1 AND user_id = ?2",
            params![table.as_str(), user.as_str(), to_millis(&at)],
        )?;
        Ok(())
    }

    /// Advance the pull position after a batch is merged.
    ///
    /// Must run in the transaction that merged the batch. A `None` token
    /// keeps the previous cursor and a `None` instant keeps `last_pull_at`.
    pub fn advance_pull(
        &self,
        table: SyncTable,
        user: &UserId,
        token: Option<&str>,
        pulled_through: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_bookkeeping
             SET sync_token = COALESCE(?3, sync_token),
                 last_pull_at = COALESCE(?4, last_pull_at),
                 version = version + 1
             WHERE table_name = ?1 AND user_id = ?2",
            params![
                table.as_str(),
                user.as_str(),
                token,
                pulled_through.as_ref().map(to_millis)
            ],
        )?;
        Ok(())
    }

    /// Add resolved conflicts to the diagnostic counter
    pub fn add_conflicts(&self, table: SyncTable, user: &UserId, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.conn.execute(
            "UPDATE sync_bookkeeping
             SET conflict_count = conflict_count + ?3, version = version + 1
             WHERE table_name = ?1 AND user_id = ?2",
            params![
                table.as_str(),
                user.as_str(),
                i64::try_from(count).unwrap_or(i64::MAX)
            ],
        )?;
        Ok(())
    }

    /// Leave `syncing` with the cycle's final status.
    ///
    /// `last_sync_at` only moves on a non-error outcome; errors stamp
    /// `last_error_at` instead.
    pub fn finish_cycle(
        &self,
        table: SyncTable,
        user: &UserId,
        outcome: &CycleOutcome,
    ) -> Result<SyncBookkeeping> {
        let finished_at = to_millis(&outcome.finished_at);
        let succeeded = outcome.status != SyncStatus::Error;

        self.conn.execute(
            "UPDATE sync_bookkeeping
             SET sync_status = ?3,
                 last_sync_at = CASE WHEN ?4 THEN ?5 ELSE last_sync_at END,
                 error_message = ?6,
                 last_error_at = CASE WHEN ?6 IS NOT NULL THEN ?5 ELSE last_error_at END,
                 record_count = ?7,
                 cycle_started_at = NULL,
                 version = version + 1
             WHERE table_name = ?1 AND user_id = ?2",
            params![
                table.as_str(),
                user.as_str(),
                outcome.status.as_str(),
                succeeded,
                finished_at,
                outcome.error_message,
                outcome.record_count,
            ],
        )?;

        self.get(table, user)?
            .ok_or_else(|| Error::NotFound(format!("bookkeeping {table}/{user}")))
    }

    /// Release a cycle whose outcome could not be recorded.
    ///
    /// Leaves the row in `error` with no cycle running.
    pub fn abandon_cycle(
        &self,
        table: SyncTable,
        user: &UserId,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_bookkeeping
             SET sync_status = 'error',
                 error_message = ?3,
                 last_error_at = ?4,
                 cycle_started_at = NULL,
                 version = version + 1
             WHERE table_name = ?1 AND user_id = ?2",
            params![table.as_str(), user.as_str(), message, to_millis(&at)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::util::now;

    fn user() -> UserId {
        "u1".parse().unwrap()
    }

    #[test]
    fn test_ensure_creates_idle_row_once() {
        let db = Database::open_in_memory().unwrap();
        let repo = BookkeepingRepository::new(db.connection());

        let first = repo.ensure(SyncTable::Sessions, &user()).unwrap();
        assert_eq!(first, SyncBookkeeping::new(SyncTable::Sessions, user()));

        let second = repo.ensure(SyncTable::Sessions, &user()).unwrap();
        assert_eq!(second.version, 1);
    }

    #[test]
    fn test_cycle_transitions() {
        let db = Database::open_in_memory().unwrap();
        let repo = BookkeepingRepository::new(db.connection());
        let started = now();

        let syncing = repo
            .begin_cycle(SyncTable::Sessions, &user(), started, Duration::minutes(10))
            .unwrap();
        assert_eq!(syncing.sync_status, SyncStatus::Syncing);

        let blocked =
            repo.begin_cycle(SyncTable::Sessions, &user(), started, Duration::minutes(10));
        assert!(matches!(
            blocked,
            Err(Error::Sync(SyncError::CycleInProgress(_)))
        ));

        let done = repo
            .finish_cycle(
                SyncTable::Sessions,
                &user(),
                &CycleOutcome {
                    status: SyncStatus::Success,
                    finished_at: started,
                    record_count: 3,
                    error_message: None,
                },
            )
            .unwrap();
        assert_eq!(done.sync_status, SyncStatus::Success);
        assert_eq!(done.last_sync_at, Some(started));
        assert_eq!(done.record_count, Some(3));
        assert!(done.version > syncing.version);
    }

    #[test]
    fn test_stale_syncing_row_is_taken_over() {
        let db = Database::open_in_memory().unwrap();
        let repo = BookkeepingRepository::new(db.connection());
        let long_ago = now() - Duration::hours(2);

        repo.begin_cycle(SyncTable::Sessions, &user(), long_ago, Duration::minutes(10))
            .unwrap();
        let resumed = repo
            .begin_cycle(SyncTable::Sessions, &user(), now(), Duration::minutes(10))
            .unwrap();
        assert_eq!(resumed.sync_status, SyncStatus::Syncing);
    }

    #[test]
    fn test_error_outcome_keeps_last_sync_at() {
        let db = Database::open_in_memory().unwrap();
        let repo = BookkeepingRepository::new(db.connection());
        let first = now();

        repo.begin_cycle(SyncTable::Preferences, &user(), first, Duration::minutes(10))
            .unwrap();
        repo.finish_cycle(
            SyncTable::Preferences,
            &user(),
            &CycleOutcome {
                status: SyncStatus::Success,
                finished_at: first,
                record_count: 1,
                error_message: None,
            },
        )
        .unwrap();

        let later = first + Duration::seconds(30);
        repo.begin_cycle(SyncTable::Preferences, &user(), later, Duration::minutes(10))
            .unwrap();
        let failed = repo
            .finish_cycle(
                SyncTable::Preferences,
                &user(),
                &CycleOutcome {
                    status: SyncStatus::Error,
                    finished_at: later,
                    record_count: 1,
                    error_message: Some("offline".to_string()),
                },
            )
            .unwrap();

        assert_eq!(failed.sync_status, SyncStatus::Error);
        assert_eq!(failed.last_sync_at, Some(first));
        assert_eq!(failed.last_error_at, Some(later));
        assert_eq!(failed.error_message.as_deref(), Some("offline"));
    }

    #[test]
    fn test_conflicts_and_cursor_advance() {
        let db = Database::open_in_memory().unwrap();
        let repo = BookkeepingRepository::new(db.connection());
        repo.ensure(SyncTable::Schedules, &user()).unwrap();
        let at = now();

        repo.add_conflicts(SyncTable::Schedules, &user(), 2).unwrap();
        repo.advance_pull(SyncTable::Schedules, &user(), Some("42"), Some(at))
            .unwrap();
        repo.advance_pull(SyncTable::Schedules, &user(), None, None)
            .unwrap();

        let record = repo.get(SyncTable::Schedules, &user()).unwrap().unwrap();
        assert_eq!(record.conflict_count, 2);
        assert_eq!(record.sync_token.as_deref(), Some("42"));
        assert_eq!(record.last_pull_at, Some(at));
    }

    #[test]
    fn test_abandoned_cycle_can_restart_immediately() {
        let db = Database::open_in_memory().unwrap();
        let repo = BookkeepingRepository::new(db.connection());
        let started = now();

        repo.begin_cycle(SyncTable::Templates, &user(), started, Duration::minutes(10))
            .unwrap();
        repo.abandon_cycle(SyncTable::Templates, &user(), "disk full", started)
            .unwrap();

        let row = repo.get(SyncTable::Templates, &user()).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Error);
        assert_eq!(row.error_message.as_deref(), Some("disk full"));
        assert_eq!(row.last_error_at, Some(started));

        let restarted = repo
            .begin_cycle(SyncTable::Templates, &user(), started, Duration::minutes(10))
            .unwrap();
        assert_eq!(restarted.sync_status, SyncStatus::Syncing);
    }
}
