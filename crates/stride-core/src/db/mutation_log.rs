//! Pending mutation log

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{EntityRecord, PendingMutation, RecordId, SyncTable, UserId};
use crate::util::{from_millis, to_millis};

/// Writes awaiting remote acknowledgement, one entry per (table, record id)
pub struct MutationLog<'a> {
    conn: &'a Connection,
}

impl<'a> MutationLog<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Queue the latest value of a record.
    ///
    /// An existing entry is overwritten with the newer value but keeps its
    /// original queue position.
    pub fn enqueue(
        &self,
        table: SyncTable,
        record: &EntityRecord,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO pending_mutations
                (table_name, record_id, user_id, local_version, payload, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(table_name, record_id) DO UPDATE SET
                user_id = excluded.user_id,
                local_version = excluded.local_version,
                payload = excluded.payload",
            params![
                table.as_str(),
                record.id.as_str(),
                record.user_id.as_str(),
                record.version,
                payload,
                to_millis(&now),
            ],
        )?;
        Ok(())
    }

    /// Pending entries of a user for one table, oldest first
    pub fn list(&self, table: SyncTable, user: &UserId) -> Result<Vec<PendingMutation>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload, local_version, queued_at FROM pending_mutations
             WHERE table_name = ? AND user_id = ?
             ORDER BY queued_at ASC, record_id ASC",
        )?;
        let rows = stmt
            .query_map(params![table.as_str(), user.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(payload, local_version, queued_at)| -> Result<PendingMutation> {
                Ok(PendingMutation {
                    table,
                    record: serde_json::from_str(&payload)?,
                    local_version,
                    queued_at: from_millis(queued_at),
                })
            })
            .collect()
    }

    /// Pending entry for one record
    pub fn get(&self, table: SyncTable, id: &RecordId) -> Result<Option<PendingMutation>> {
        let row = self
            .conn
            .query_row(
                "SELECT payload, local_version, queued_at FROM pending_mutations
                 WHERE table_name = ? AND record_id = ?",
                params![table.as_str(), id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(payload, local_version, queued_at)| -> Result<PendingMutation> {
            Ok(PendingMutation {
                table,
                record: serde_json::from_str(&payload)?,
                local_version,
                queued_at: from_millis(queued_at),
            })
        })
        .transpose()
    }

    /// Remove an entry after the remote accepted `submitted_version`.
    ///
    /// An entry rewritten since the push was sent stays queued.
    pub fn acknowledge(
        &self,
        table: SyncTable,
        id: &RecordId,
        submitted_version: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM pending_mutations
             WHERE table_name = ? AND record_id = ? AND local_version = ?",
            params![table.as_str(), id.as_str(), submitted_version],
        )?;
        Ok(rows > 0)
    }

    /// Drop an entry whose local value lost to the remote
    pub fn discard(&self, table: SyncTable, id: &RecordId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM pending_mutations WHERE table_name = ? AND record_id = ?",
            params![table.as_str(), id.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Total pending entries of a user across all tables
    pub fn count_for_user(&self, user: &UserId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_mutations WHERE user_id = ?",
            params![user.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::util::now;
    use serde_json::json;

    fn record(version: i64, name: &str) -> EntityRecord {
        let at = now();
        EntityRecord {
            id: RecordId::from_raw("rec-1".to_string()),
            user_id: "u1".parse().unwrap(),
            version,
            deleted_at: None,
            created_at: at,
            updated_at: at,
            data: json!({ "name": name }),
        }
    }

    #[test]
    fn test_enqueue_coalesces_repeated_edits() {
        let db = Database::open_in_memory().unwrap();
        let log = MutationLog::new(db.connection());
        let user: UserId = "u1".parse().unwrap();

        log.enqueue(SyncTable::Sessions, &record(1, "a"), now()).unwrap();
        log.enqueue(SyncTable::Sessions, &record(2, "b"), now()).unwrap();
        log.enqueue(SyncTable::Sessions, &record(3, "c"), now()).unwrap();

        let pending = log.list(SyncTable::Sessions, &user).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_version, 3);
        assert_eq!(pending[0].record.data["name"], "c");
        assert_eq!(log.count_for_user(&user).unwrap(), 1);
    }

    #[test]
    fn test_acknowledge_only_matching_version() {
        let db = Database::open_in_memory().unwrap();
        let log = MutationLog::new(db.connection());
        let id = RecordId::from_raw("rec-1".to_string());

        log.enqueue(SyncTable::Sessions, &record(2, "b"), now()).unwrap();
        assert!(!log.acknowledge(SyncTable::Sessions, &id, 1).unwrap());
        assert!(log.get(SyncTable::Sessions, &id).unwrap().is_some());

        assert!(log.acknowledge(SyncTable::Sessions, &id, 2).unwrap());
        assert!(log.get(SyncTable::Sessions, &id).unwrap().is_none());
    }

    #[test]
    fn test_discard_removes_entry() {
        let db = Database::open_in_memory().unwrap();
        let log = MutationLog::new(db.connection());
        let id = RecordId::from_raw("rec-1".to_string());

        log.enqueue(SyncTable::Templates, &record(4, "x"), now()).unwrap();
        assert!(log.discard(SyncTable::Templates, &id).unwrap());
        assert!(!log.discard(SyncTable::Templates, &id).unwrap());
    }
}
