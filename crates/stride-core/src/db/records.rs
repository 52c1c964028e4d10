//! Entity record repository

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{EntityRecord, RecordDraft, RecordId, SyncTable, UserId};
use crate::util::{from_millis, to_millis};

const RECORD_COLUMNS: &str = "id, user_id, version, deleted_at, created_at, updated_at, data";

/// Query options for [`RecordRepository::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Include tombstoned records
    pub include_deleted: bool,
    /// Only the record holding this natural key
    pub natural_key: Option<String>,
    /// Only records updated at or after this instant
    pub updated_since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Result of a local write: the stored record and the version it now holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub record: EntityRecord,
    pub version: i64,
}

/// The version a local write produces on top of the prior stored value.
///
/// This is the only place local versions are incremented.
pub fn next_version(prior: Option<&EntityRecord>) -> i64 {
    prior.map_or(1, |record| record.version + 1)
}

/// `SQLite` access to the `records` table
pub struct RecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> RecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row selected with `RECORD_COLUMNS`
    fn parse_record(row: &Row<'_>) -> rusqlite::Result<EntityRecord> {
        Ok(EntityRecord {
            id: RecordId::from_raw(row.get(0)?),
            user_id: UserId::from_raw(row.get(1)?),
            version: row.get(2)?,
            deleted_at: row.get::<_, Option<i64>>(3)?.map(from_millis),
            created_at: from_millis(row.get(4)?),
            updated_at: from_millis(row.get(5)?),
            data: row.get(6)?,
        })
    }

    /// Get a record by id, tombstones included
    pub fn get(&self, table: SyncTable, id: &RecordId) -> Result<Option<EntityRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE table_name = ? AND id = ?"),
                params![table.as_str(), id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    /// List a user's records, most recently updated first
    pub fn list(
        &self,
        table: SyncTable,
        user: &UserId,
        filter: &ListFilter,
    ) -> Result<Vec<EntityRecord>> {
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE table_name = ? AND user_id = ?"
        );
        let mut args = vec![
            SqlValue::Text(table.as_str().to_string()),
            SqlValue::Text(user.as_str().to_string()),
        ];

        if !filter.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        if let Some(key) = &filter.natural_key {
            sql.push_str(" AND natural_key = ?");
            args.push(SqlValue::Text(key.clone()));
        }
        if let Some(since) = &filter.updated_since {
            sql.push_str(" AND updated_at >= ?");
            args.push(SqlValue::Integer(to_millis(since)));
        }

        sql.push_str(" ORDER BY updated_at DESC, id ASC LIMIT ? OFFSET ?");
        args.push(SqlValue::Integer(
            filter
                .limit
                .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX)),
        ));
        args.push(SqlValue::Integer(
            i64::try_from(filter.offset).unwrap_or(i64::MAX),
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args), Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// The live record currently holding a natural key, if any
    pub fn find_live_by_natural_key(
        &self,
        table: SyncTable,
        user: &UserId,
        key: &str,
    ) -> Result<Option<EntityRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records
                     WHERE table_name = ? AND user_id = ? AND natural_key = ? AND deleted_at IS NULL"
                ),
                params![table.as_str(), user.as_str(), key],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Number of live records a user holds in a table
    pub fn count_live(&self, table: SyncTable, user: &UserId) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE table_name = ? AND user_id = ? AND deleted_at IS NULL",
            params![table.as_str(), user.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Build the record a local `put` stores, without writing it.
    ///
    /// Resolves the target id, enforces ownership, tombstone and natural key
    /// rules, and assigns the next version.
    pub fn prepare_put(
        &self,
        table: SyncTable,
        draft: RecordDraft,
        now: DateTime<Utc>,
    ) -> Result<EntityRecord> {
        let RecordDraft { id, user_id, data } = draft;

        if !data.is_object() {
            return Err(Error::InvalidInput(
                "record payload must be a JSON object".into(),
            ));
        }
        let natural_key = table.natural_key(&data)?;

        let prior = match (&id, &natural_key) {
            (Some(id), _) => self.get(table, id)?,
            (None, Some(key)) => self.find_live_by_natural_key(table, &user_id, key)?,
            (None, None) => None,
        };

        if let Some(prior) = &prior {
            if prior.user_id != user_id {
                return Err(Error::InvalidInput(format!(
                    "record {} belongs to another user",
                    prior.id
                )));
            }
            if prior.is_deleted() {
                return Err(Error::Tombstoned(prior.id.to_string()));
            }
        }

        let id = prior
            .as_ref()
            .map(|prior| prior.id.clone())
            .or(id)
            .unwrap_or_default();

        if let Some(key) = &natural_key {
            if let Some(holder) = self.find_live_by_natural_key(table, &user_id, key)? {
                if holder.id != id {
                    return Err(Error::InvalidInput(format!(
                        "{table} already has a live record for `{key}` ({})",
                        holder.id
                    )));
                }
            }
        }

        Ok(EntityRecord {
            version: next_version(prior.as_ref()),
            created_at: prior.as_ref().map_or(now, |prior| prior.created_at),
            updated_at: now,
            deleted_at: None,
            id,
            user_id,
            data,
        })
    }

    /// Build the tombstone a local `soft_delete` stores.
    ///
    /// Returns `None` when the record is already deleted.
    pub fn prepare_soft_delete(
        &self,
        table: SyncTable,
        id: &RecordId,
        now: DateTime<Utc>,
    ) -> Result<Option<EntityRecord>> {
        let prior = self
            .get(table, id)?
            .ok_or_else(|| Error::NotFound(format!("{table}/{id}")))?;

        if prior.is_deleted() {
            return Ok(None);
        }

        Ok(Some(EntityRecord {
            version: next_version(Some(&prior)),
            deleted_at: Some(now),
            updated_at: now,
            ..prior
        }))
    }

    /// Create or replace a record exactly as given
    pub fn upsert(&self, table: SyncTable, record: &EntityRecord) -> Result<()> {
        let natural_key = table.natural_key(&record.data).ok().flatten();

        self.conn.execute(
            "INSERT INTO records
                (table_name, id, user_id, version, natural_key, data, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(table_name, id) DO UPDATE SET
                user_id = excluded.user_id,
                version = excluded.version,
                natural_key = excluded.natural_key,
                data = excluded.data,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at",
            params![
                table.as_str(),
                record.id.as_str(),
                record.user_id.as_str(),
                record.version,
                natural_key,
                &record.data,
                to_millis(&record.created_at),
                to_millis(&record.updated_at),
                record.deleted_at.as_ref().map(to_millis),
            ],
        )?;
        Ok(())
    }

    /// Reconcile a record's version with the value the remote accepted.
    ///
    /// Only applies while the row still holds the submitted version.
    pub fn reconcile_version(
        &self,
        table: SyncTable,
        id: &RecordId,
        submitted: i64,
        accepted: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE records SET version = ?4 WHERE table_name = ?1 AND id = ?2 AND version = ?3",
            params![table.as_str(), id.as_str(), submitted, accepted],
        )?;
        Ok(rows > 0)
    }
}
