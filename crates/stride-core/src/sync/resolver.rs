//! Conflict resolution and pull merge

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{BookkeepingRepository, MutationLog, RecordRepository};
use crate::error::Result;
use crate::models::{EntityRecord, SyncTable, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Remote,
}

/// Which rule decided a conflict, in order of precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    /// A tombstone beats a live record regardless of version
    Tombstone,
    /// The strictly greater version wins
    HigherVersion,
    /// Equal versions: the remote copy is canonical
    RemoteOnTie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub winner: Winner,
    pub rule: ResolutionRule,
}

/// Pick the winner between a local and a remote copy of one record.
///
/// Deterministic: the outcome depends only on `version` and `deleted_at`.
#[must_use]
pub fn resolve(local: &EntityRecord, remote: &EntityRecord) -> Resolution {
    match (local.is_deleted(), remote.is_deleted()) {
        (true, false) => Resolution {
            winner: Winner::Local,
            rule: ResolutionRule::Tombstone,
        },
        (false, true) => Resolution {
            winner: Winner::Remote,
            rule: ResolutionRule::Tombstone,
        },
        _ if local.version > remote.version => Resolution {
            winner: Winner::Local,
            rule: ResolutionRule::HigherVersion,
        },
        _ if remote.version > local.version => Resolution {
            winner: Winner::Remote,
            rule: ResolutionRule::HigherVersion,
        },
        _ => Resolution {
            winner: Winner::Remote,
            rule: ResolutionRule::RemoteOnTie,
        },
    }
}

/// What merging one pulled page changed locally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Remote values written to the local store
    pub applied: usize,
    /// Records already identical locally
    pub unchanged: usize,
    /// Conflicts the local copy won; left queued for push
    pub kept_local: usize,
    /// Resolver invocations, natural-key collisions included
    pub conflicts: u64,
    /// Records of other users, ignored
    pub skipped: usize,
    /// Malformed records, ignored and reported
    pub invalid: Vec<String>,
}

/// Merges pulled records into the local store.
///
/// Runs on the connection of an open transaction: the merged records, the
/// advanced cursor and the conflict counter commit together or not at all.
pub struct ConflictResolver<'a> {
    conn: &'a Connection,
}

impl<'a> ConflictResolver<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Merge one page and advance the table's pull position past it.
    ///
    /// `pulled_through` is the instant every change up to which has now been
    /// merged; `None` leaves `last_pull_at` where it was.
    pub fn merge_page(
        &self,
        table: SyncTable,
        user: &UserId,
        records: &[EntityRecord],
        next_cursor: Option<&str>,
        pulled_through: Option<DateTime<Utc>>,
        merged_at: DateTime<Utc>,
    ) -> Result<MergeSummary> {
        let summary = self.merge(table, user, records, merged_at)?;

        let bookkeeping = BookkeepingRepository::new(self.conn);
        bookkeeping.advance_pull(table, user, next_cursor, pulled_through)?;
        bookkeeping.add_conflicts(table, user, summary.conflicts)?;
        Ok(summary)
    }

    /// Merge records in the order received
    pub fn merge(
        &self,
        table: SyncTable,
        user: &UserId,
        records: &[EntityRecord],
        now: DateTime<Utc>,
    ) -> Result<MergeSummary> {
        let repository = RecordRepository::new(self.conn);
        let log = MutationLog::new(self.conn);
        let mut summary = MergeSummary::default();

        for remote in records {
            if &remote.user_id != user {
                tracing::warn!(
                    table = %table,
                    id = %remote.id,
                    "Ignoring pulled record owned by another user"
                );
                summary.skipped += 1;
                continue;
            }
            if let Err(error) = remote.validate(table) {
                tracing::warn!(table = %table, id = %remote.id, error = %error, "Ignoring malformed pulled record");
                summary.invalid.push(error.to_string());
                continue;
            }

            let Some(local) = repository.get(table, &remote.id)? else {
                summary.conflicts += self.release_natural_key(table, remote, now)?;
                repository.upsert(table, remote)?;
                summary.applied += 1;
                continue;
            };

            if local.same_state(remote) {
                // Push accepted earlier but the acknowledgement was lost
                log.acknowledge(table, &remote.id, remote.version)?;
                summary.unchanged += 1;
                continue;
            }

            summary.conflicts += 1;
            let resolution = resolve(&local, remote);
            tracing::debug!(
                table = %table,
                id = %remote.id,
                local_version = local.version,
                remote_version = remote.version,
                winner = ?resolution.winner,
                rule = ?resolution.rule,
                "Resolved conflict"
            );

            match resolution.winner {
                Winner::Remote => {
                    summary.conflicts += self.release_natural_key(table, remote, now)?;
                    repository.upsert(table, remote)?;
                    log.discard(table, &remote.id)?;
                    summary.applied += 1;
                }
                Winner::Local => {
                    if log.get(table, &local.id)?.is_none() {
                        log.enqueue(table, &local, now)?;
                    }
                    summary.kept_local += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Tombstone a different live local record holding the natural key the
    /// incoming remote record claims. Returns the number of conflicts.
    fn release_natural_key(
        &self,
        table: SyncTable,
        remote: &EntityRecord,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if remote.is_deleted() {
            return Ok(0);
        }
        let Some(key) = table.natural_key(&remote.data)? else {
            return Ok(0);
        };

        let repository = RecordRepository::new(self.conn);
        let Some(holder) = repository.find_live_by_natural_key(table, &remote.user_id, &key)?
        else {
            return Ok(0);
        };
        if holder.id == remote.id {
            return Ok(0);
        }

        let Some(tombstone) = repository.prepare_soft_delete(table, &holder.id, now)? else {
            return Ok(0);
        };
        tracing::info!(
            table = %table,
            key = %key,
            local = %holder.id,
            remote = %remote.id,
            "Natural key taken by remote record; tombstoning local duplicate"
        );
        repository.upsert(table, &tombstone)?;
        MutationLog::new(self.conn).enqueue(table, &tombstone, now)?;
        Ok(1)
    }
}
