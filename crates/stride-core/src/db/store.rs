//! Local store: the async read/write surface used by the application

use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tokio::sync::Mutex;

use super::{
    BookkeepingRepository, Database, ListFilter, MutationLog, RecordRepository, WriteOutcome,
};
use crate::error::Result;
use crate::models::{
    EntityRecord, PendingMutation, RecordDraft, RecordId, SyncBookkeeping, SyncTable, UserId,
};
use crate::util::now;

/// Durable per-user record cache, shared between the application and the
/// sync engine.
///
/// All access to a record is serialized through one connection. Every write
/// updates the record and the mutation log in a single transaction, so a
/// failed write leaves neither a partial record nor a phantom pending
/// mutation.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open a store backed by a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Fetch a record by id; tombstones are returned with `deleted_at` set
    pub async fn get(&self, table: SyncTable, id: &RecordId) -> Result<Option<EntityRecord>> {
        self.read(|conn| RecordRepository::new(conn).get(table, id))
            .await
    }

    /// List a user's records in a table
    pub async fn list(
        &self,
        table: SyncTable,
        user: &UserId,
        filter: &ListFilter,
    ) -> Result<Vec<EntityRecord>> {
        self.read(|conn| RecordRepository::new(conn).list(table, user, filter))
            .await
    }

    /// Create or replace a record; the stored version is always bumped
    /// relative to the prior value
    pub async fn put(&self, table: SyncTable, draft: RecordDraft) -> Result<WriteOutcome> {
        let outcome = self
            .transact(move |tx| {
                let at = now();
                let records = RecordRepository::new(tx);
                let record = records.prepare_put(table, draft, at)?;
                records.upsert(table, &record)?;
                MutationLog::new(tx).enqueue(table, &record, at)?;
                Ok(WriteOutcome {
                    version: record.version,
                    record,
                })
            })
            .await?;

        tracing::debug!(
            table = %table,
            id = %outcome.record.id,
            version = outcome.version,
            "Stored local write"
        );
        Ok(outcome)
    }

    /// Tombstone a record. Deleting an already deleted record is a no-op.
    pub async fn soft_delete(&self, table: SyncTable, id: &RecordId) -> Result<WriteOutcome> {
        self.transact(|tx| {
            let at = now();
            let records = RecordRepository::new(tx);
            let Some(tombstone) = records.prepare_soft_delete(table, id, at)? else {
                let existing = records
                    .get(table, id)?
                    .ok_or_else(|| crate::Error::NotFound(format!("{table}/{id}")))?;
                return Ok(WriteOutcome {
                    version: existing.version,
                    record: existing,
                });
            };
            records.upsert(table, &tombstone)?;
            MutationLog::new(tx).enqueue(table, &tombstone, at)?;
            Ok(WriteOutcome {
                version: tombstone.version,
                record: tombstone,
            })
        })
        .await
    }

    /// Writes of a user awaiting remote acknowledgement in one table
    pub async fn pending(&self, table: SyncTable, user: &UserId) -> Result<Vec<PendingMutation>> {
        self.read(|conn| MutationLog::new(conn).list(table, user))
            .await
    }

    /// Number of unacknowledged writes of a user across all tables
    pub async fn pending_count(&self, user: &UserId) -> Result<usize> {
        self.read(|conn| MutationLog::new(conn).count_for_user(user))
            .await
    }

    /// Bookkeeping of every table the user has synced
    pub async fn bookkeeping(&self, user: &UserId) -> Result<Vec<SyncBookkeeping>> {
        self.read(|conn| BookkeepingRepository::new(conn).list_for_user(user))
            .await
    }

    /// Bookkeeping of one table, `None` before its first sync
    pub async fn bookkeeping_for(
        &self,
        table: SyncTable,
        user: &UserId,
    ) -> Result<Option<SyncBookkeeping>> {
        self.read(|conn| BookkeepingRepository::new(conn).get(table, user))
            .await
    }

    /// Run read-only work against the connection
    pub(crate) async fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db.lock().await;
        f(db.connection())
    }

    /// Run work inside one immediate transaction; an error rolls it back
    pub(crate) async fn transact<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
