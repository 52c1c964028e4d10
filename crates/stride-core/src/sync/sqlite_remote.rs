//! Remote store backed by a shared `SQLite` file

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use tokio::sync::Mutex;

use super::error::{SyncError, SyncResult};
use super::remote::{
    AcceptedRecord, PullCursor, PullResponse, PushResponse, RejectReason, RejectedRecord,
    RemoteEndpoint,
};
use crate::models::{EntityRecord, RecordId, SyncTable, UserId};
use crate::util::{from_millis, to_millis};

const DEFAULT_PAGE_SIZE: usize = 500;

const REMOTE_COLUMNS: &str = "id, user_id, version, deleted_at, created_at, updated_at, data";

const REMOTE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS remote_records (
    table_name TEXT NOT NULL,
    id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    natural_key TEXT,
    data TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    seq INTEGER NOT NULL,
    PRIMARY KEY (table_name, id)
);

CREATE INDEX IF NOT EXISTS idx_remote_records_seq
    ON remote_records(table_name, user_id, seq);

CREATE TABLE IF NOT EXISTS push_receipts (
    table_name TEXT NOT NULL,
    id TEXT NOT NULL,
    submitted_version INTEGER NOT NULL,
    accepted_version INTEGER NOT NULL,
    PRIMARY KEY (table_name, id, submitted_version)
);

CREATE TABLE IF NOT EXISTS change_sequence (
    table_name TEXT PRIMARY KEY,
    seq INTEGER NOT NULL
);
";

/// The remote contract implemented on a `SQLite` file.
///
/// Several local profiles pointing at the same file converge through it.
/// The pull cursor is the table's change sequence number.
#[derive(Clone)]
pub struct SqliteRemote {
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl SqliteRemote {
    /// Open (or create) a remote store file
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> crate::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> crate::Result<Self> {
        conn.execute_batch(REMOTE_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Limit the number of records returned per pull
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Current remote copy of a record
    pub async fn get(&self, table: SyncTable, id: &RecordId) -> crate::Result<Option<EntityRecord>> {
        let conn = self.conn.lock().await;
        Ok(fetch(&conn, table, id)?)
    }

    /// Write a record exactly as given, bypassing version checks.
    ///
    /// Stands in for a write another device made directly on the remote.
    pub async fn put_record(&self, table: SyncTable, record: &EntityRecord) -> crate::Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        store(&tx, table, record)?;
        tx.commit()?;
        Ok(())
    }

    fn apply_push(
        tx: &Transaction<'_>,
        table: SyncTable,
        user: &UserId,
        records: &[EntityRecord],
    ) -> rusqlite::Result<PushResponse> {
        let mut response = PushResponse::default();

        for record in records {
            let reject = |reason, message: Option<String>| RejectedRecord {
                id: record.id.clone(),
                reason,
                message,
            };

            if &record.user_id != user {
                response.rejected.push(reject(
                    RejectReason::Invalid,
                    Some("record belongs to another user".into()),
                ));
                continue;
            }
            if let Err(error) = record.validate(table) {
                response
                    .rejected
                    .push(reject(RejectReason::Invalid, Some(error.to_string())));
                continue;
            }

            if let Some(accepted) = receipt(tx, table, &record.id, record.version)? {
                response.accepted.push(AcceptedRecord {
                    id: record.id.clone(),
                    version: accepted,
                });
                continue;
            }

            let stored = fetch(tx, table, &record.id)?;
            let decision = match &stored {
                None => Ok(Some(record.version)),
                Some(stored) if stored.is_deleted() && !record.is_deleted() => {
                    Err(RejectReason::Deleted)
                }
                // Already deleted: converge on the stored tombstone
                Some(stored) if stored.is_deleted() => {
                    if record.version > stored.version {
                        Ok(Some(record.version))
                    } else {
                        Ok(None)
                    }
                }
                Some(stored) if record.is_deleted() => {
                    Ok(Some(record.version.max(stored.version + 1)))
                }
                Some(stored) if record.version > stored.version => Ok(Some(record.version)),
                Some(_) => Err(RejectReason::StaleVersion),
            };

            let accepted_version = match decision {
                Ok(Some(version)) => {
                    if !record.is_deleted() && holds_natural_key(tx, table, record)? {
                        response
                            .rejected
                            .push(reject(RejectReason::DuplicateKey, None));
                        continue;
                    }
                    store(
                        tx,
                        table,
                        &EntityRecord {
                            version,
                            ..record.clone()
                        },
                    )?;
                    version
                }
                Ok(None) => stored.map_or(record.version, |stored| stored.version),
                Err(reason) => {
                    response.rejected.push(reject(reason, None));
                    continue;
                }
            };

            tx.execute(
                "INSERT INTO push_receipts (table_name, id, submitted_version, accepted_version)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    table.as_str(),
                    record.id.as_str(),
                    record.version,
                    accepted_version
                ],
            )?;
            response.accepted.push(AcceptedRecord {
                id: record.id.clone(),
                version: accepted_version,
            });
        }

        Ok(response)
    }

    fn read_changes(
        conn: &Connection,
        table: SyncTable,
        user: &UserId,
        cursor: &PullCursor,
        page_size: usize,
    ) -> SyncResult<PullResponse> {
        let (condition, bound) = match cursor {
            PullCursor::Beginning => ("seq > ?3", 0),
            PullCursor::Token(token) => {
                let seq = token.parse::<i64>().map_err(|_| {
                    SyncError::Validation(format!("unrecognized pull cursor `{token}`"))
                })?;
                ("seq > ?3", seq)
            }
            PullCursor::Since(since) => ("updated_at > ?3", to_millis(since)),
        };

        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REMOTE_COLUMNS}, seq FROM remote_records
                 WHERE table_name = ?1 AND user_id = ?2 AND {condition}
                 ORDER BY seq ASC LIMIT ?4"
            ))
            .map_err(remote_error)?;
        let rows = stmt
            .query_map(
                params![table.as_str(), user.as_str(), bound, limit.saturating_add(1)],
                |row| Ok((parse_record(row)?, row.get::<_, i64>(7)?)),
            )
            .map_err(remote_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(remote_error)?;

        let has_more = rows.len() > page_size;
        let page: Vec<_> = rows.into_iter().take(page_size).collect();
        let next_cursor = page
            .last()
            .map(|(_, seq)| seq.to_string())
            .or_else(|| match cursor {
                PullCursor::Beginning => Some(bound.to_string()),
                PullCursor::Token(token) => Some(token.clone()),
                PullCursor::Since(_) => None,
            });

        Ok(PullResponse {
            records: page.into_iter().map(|(record, _)| record).collect(),
            next_cursor,
            has_more,
        })
    }
}

#[async_trait]
impl RemoteEndpoint for SqliteRemote {
    async fn push(
        &self,
        table: SyncTable,
        user: &UserId,
        records: &[EntityRecord],
    ) -> SyncResult<PushResponse> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(remote_error)?;
        let response = Self::apply_push(&tx, table, user, records).map_err(remote_error)?;
        tx.commit().map_err(remote_error)?;
        Ok(response)
    }

    async fn pull(
        &self,
        table: SyncTable,
        user: &UserId,
        cursor: &PullCursor,
    ) -> SyncResult<PullResponse> {
        let conn = self.conn.lock().await;
        Self::read_changes(&conn, table, user, cursor, self.page_size)
    }
}

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

fn fetch(conn: &Connection, table: SyncTable, id: &RecordId) -> rusqlite::Result<Option<EntityRecord>> {
    conn.query_row(
        &format!("SELECT {REMOTE_COLUMNS} FROM remote_records WHERE table_name = ? AND id = ?"),
        params![table.as_str(), id.as_str()],
        parse_record,
    )
    .optional()
}

fn receipt(
    conn: &Connection,
    table: SyncTable,
    id: &RecordId,
    submitted_version: i64,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT accepted_version FROM push_receipts
         WHERE table_name = ? AND id = ? AND submitted_version = ?",
        params![table.as_str(), id.as_str(), submitted_version],
        |row| row.get(0),
    )
    .optional()
}

/// Whether a different live record already holds this record's natural key
fn holds_natural_key(
    conn: &Connection,
    table: SyncTable,
    record: &EntityRecord,
) -> rusqlite::Result<bool> {
    let Ok(Some(key)) = table.natural_key(&record.data) else {
        return Ok(false);
    };
    let holder: Option<String> = conn
        .query_row(
            "SELECT id FROM remote_records
             WHERE table_name = ? AND user_id = ? AND natural_key = ?
               AND deleted_at IS NULL AND id != ?
             LIMIT 1",
            params![
                table.as_str(),
                record.user_id.as_str(),
                key,
                record.id.as_str()
            ],
            |row| row.get(0),
        )
        .optional()?;
    Ok(holder.is_some())
}

/// Write a record under the table's next change sequence number
fn store(tx: &Transaction<'_>, table: SyncTable, record: &EntityRecord) -> rusqlite::Result<()> {
    let seq: i64 = tx.query_row(
        "INSERT INTO change_sequence (table_name, seq) VALUES (?1, 1)
         ON CONFLICT(table_name) DO UPDATE SET seq = seq + 1
         RETURNING seq",
        params![table.as_str()],
        |row| row.get(0),
    )?;
    let natural_key = table.natural_key(&record.data).ok().flatten();

    tx.execute(
        "INSERT INTO remote_records
            (table_name, id, user_id, version, natural_key, data, created_at, updated_at, deleted_at, seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(table_name, id) DO UPDATE SET
            user_id = excluded.user_id,
            version = excluded.version,
            natural_key = excluded.natural_key,
            data = excluded.data,
            updated_at = excluded.updated_at,
            deleted_at = excluded.deleted_at,
            seq = excluded.seq",
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
            seq,
        ],
    )?;
    Ok(())
}

/// A remote file that cannot be read right now behaves like an unreachable
/// server; anything else is a problem with the data itself.
fn remote_error(error: rusqlite::Error) -> SyncError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
            ) =>
        {
            SyncError::TransientNetwork(error.to_string())
        }
        _ => SyncError::Validation(format!("remote store error: {error}")),
    }
}
