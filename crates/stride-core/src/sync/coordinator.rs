//! Sync coordinator: per-user single-flight push/pull cycles

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;

use super::error::{SyncError, SyncResult};
use super::remote::{PullCursor, PullResponse, RemoteEndpoint};
use super::report::{SyncReport, TableSyncReport};
use super::resolver::ConflictResolver;
use super::retry::RetryPolicy;
use super::SyncDirection;
use crate::config::SyncSettings;
use crate::db::{BookkeepingRepository, CycleOutcome, LocalStore, MutationLog, RecordRepository};
use crate::models::{EntityRecord, SyncBookkeeping, SyncStatus, SyncTable, UserId};
use crate::util::now;

/// Result every caller of one cycle receives
pub type SyncOutcome = SyncResult<SyncReport>;

type CompletionReceiver = watch::Receiver<Option<SyncOutcome>>;

/// Result of a bounded wait on a user's cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleState {
    /// No cycle was running
    Idle,
    /// The running cycle finished within the wait
    Finished(SyncOutcome),
    /// Still running; the cycle continues in the background
    TimedOut,
}

/// Runs sync cycles against one local store and one remote endpoint.
///
/// At most one cycle per user is in flight. A caller that arrives while a
/// cycle runs joins it and receives the same outcome instead of starting
/// another round-trip. Cycles run as spawned tasks and are never cancelled
/// by a caller giving up on the wait.
#[derive(Clone)]
pub struct SyncCoordinator {
    store: LocalStore,
    remote: Arc<dyn RemoteEndpoint>,
    settings: SyncSettings,
    retry: RetryPolicy,
    in_flight: Arc<Mutex<HashMap<UserId, CompletionReceiver>>>,
}

impl SyncCoordinator {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteEndpoint>, settings: SyncSettings) -> Self {
        let retry = settings.retry_policy();
        Self {
            store,
            remote,
            settings,
            retry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Run a cycle for `user`, or join the one already running
    pub async fn sync(&self, user: &UserId, direction: SyncDirection) -> SyncOutcome {
        let mut receiver = self.start_or_join(user, direction);
        wait_for_completion(&mut receiver).await
    }

    /// Whether a cycle for `user` is in flight
    #[must_use]
    pub fn is_syncing(&self, user: &UserId) -> bool {
        self.lock_in_flight().contains_key(user)
    }

    /// Wait up to `timeout` for the user's running cycle to finish.
    ///
    /// A timeout leaves the cycle running.
    pub async fn wait_for_idle(&self, user: &UserId, timeout: Duration) -> IdleState {
        let receiver = self.lock_in_flight().get(user).cloned();
        let Some(mut receiver) = receiver else {
            return IdleState::Idle;
        };

        match tokio::time::timeout(timeout, wait_for_completion(&mut receiver)).await {
            Ok(outcome) => IdleState::Finished(outcome),
            Err(_) => IdleState::TimedOut,
        }
    }

    /// Bookkeeping of every table the user has synced
    pub async fn bookkeeping(&self, user: &UserId) -> crate::Result<Vec<SyncBookkeeping>> {
        self.store.bookkeeping(user).await
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<UserId, CompletionReceiver>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check-and-set under one lock: either hand out the running cycle's
    /// receiver or register and spawn a new cycle.
    fn start_or_join(&self, user: &UserId, direction: SyncDirection) -> CompletionReceiver {
        let mut in_flight = self.lock_in_flight();
        if let Some(receiver) = in_flight.get(user) {
            tracing::debug!(user = %user, "Joining in-flight sync cycle");
            return receiver.clone();
        }

        let (sender, receiver) = watch::channel(None);
        in_flight.insert(user.clone(), receiver.clone());

        let coordinator = self.clone();
        let user = user.clone();
        tokio::spawn(async move {
            let registration = InFlightRegistration {
                in_flight: Arc::clone(&coordinator.in_flight),
                user: user.clone(),
            };
            let report = coordinator.run_cycle(&user, direction).await;
            // Unregister before publishing so a caller woken by the result
            // starts a fresh cycle instead of joining a finished one.
            drop(registration);
            sender.send_replace(Some(Ok(report)));
        });

        receiver
    }

    async fn run_cycle(&self, user: &UserId, direction: SyncDirection) -> SyncReport {
        let started_at = now();
        tracing::info!(user = %user, direction = %direction, "Starting sync cycle");

        let tables = join_all(
            self.settings
                .tables
                .iter()
                .map(|table| self.sync_table(*table, user, direction)),
        )
        .await;

        let report = SyncReport {
            user_id: user.clone(),
            direction,
            started_at,
            finished_at: now(),
            tables,
        };
        tracing::info!(
            user = %user,
            status = %report.status(),
            pushed = report.total_pushed(),
            pulled = report.total_pulled(),
            conflicts = report.total_conflicts(),
            "Sync cycle finished"
        );
        report
    }

    async fn sync_table(
        &self,
        table: SyncTable,
        user: &UserId,
        direction: SyncDirection,
    ) -> TableSyncReport {
        let mut report = TableSyncReport::new(table);
        let stale_after = self.settings.stale_cycle_after();

        let begin = self
            .store
            .transact(|tx| BookkeepingRepository::new(tx).begin_cycle(table, user, now(), stale_after))
            .await;
        if let Err(error) = begin {
            let error = SyncError::from(error);
            tracing::warn!(table = %table, user = %user, error = %error, "Cannot start table sync");
            report.status = SyncStatus::Error;
            report.error = Some(error);
            return report;
        }

        let mut failure = None;
        let mut rejections = Vec::new();

        if direction.pulls() {
            if let Err(error) = self.pull_table(table, user, &mut report).await {
                failure = Some(error);
            }
        }
        if direction.pushes() && failure.is_none() {
            if let Err(error) = self.push_table(table, user, &mut report, &mut rejections).await {
                failure = Some(error);
            }
        }

        let record_count = self
            .store
            .read(|conn| RecordRepository::new(conn).count_live(table, user))
            .await;
        let record_count = match record_count {
            Ok(count) => count,
            Err(error) => {
                failure.get_or_insert(SyncError::from(error));
                0
            }
        };

        let first_invalid = rejections.iter().find(|error| !error.is_conflict()).cloned();
        let (status, error) = match (failure, first_invalid) {
            (Some(error), _) | (None, Some(error)) => (SyncStatus::Error, Some(error)),
            (None, None) if report.conflicts > 0 || !rejections.is_empty() => {
                (SyncStatus::Conflict, rejections.into_iter().next())
            }
            (None, None) => (SyncStatus::Success, None),
        };

        let outcome = CycleOutcome {
            status,
            finished_at: now(),
            record_count,
            error_message: (status == SyncStatus::Error)
                .then(|| error.as_ref().map(ToString::to_string))
                .flatten(),
        };
        if let Err(error) = self
            .store
            .transact(|tx| BookkeepingRepository::new(tx).finish_cycle(table, user, &outcome))
            .await
        {
            tracing::error!(table = %table, user = %user, error = %error, "Failed to record sync outcome");
            let message = format!("failed to record sync outcome: {error}");
            if let Err(error) = self
                .store
                .transact(|tx| {
                    BookkeepingRepository::new(tx).abandon_cycle(table, user, &message, now())
                })
                .await
            {
                tracing::error!(table = %table, user = %user, error = %error, "Failed to release sync cycle");
            }
        }

        if let Some(error) = &error {
            tracing::warn!(table = %table, user = %user, status = %status, error = %error, "Table sync did not complete cleanly");
        }
        report.status = status;
        report.error = error;
        report.record_count = Some(record_count);
        report
    }

    /// Pull remote changes page by page; each page is merged and the cursor
    /// advanced in one transaction.
    async fn pull_table(
        &self,
        table: SyncTable,
        user: &UserId,
        report: &mut TableSyncReport,
    ) -> SyncResult<()> {
        // Remote writes landing while the pull runs must not be skipped by
        // the next timestamp-based pull.
        let pulled_at = now();
        let mut cursor = self
            .store
            .bookkeeping_for(table, user)
            .await?
            .map_or(PullCursor::Beginning, |bookkeeping| {
                PullCursor::from_bookkeeping(&bookkeeping)
            });
        let operation = format!("pull {table}");

        for _ in 0..self.settings.max_pull_pages.max(1) {
            let response = self
                .retry
                .run(&operation, || self.remote.pull(table, user, &cursor))
                .await?;
            let pulled_through = page_watermark(&response, pulled_at);

            let summary = self
                .store
                .transact(|tx| {
                    ConflictResolver::new(tx).merge_page(
                        table,
                        user,
                        &response.records,
                        response.next_cursor.as_deref(),
                        pulled_through,
                        now(),
                    )
                })
                .await?;
            report.pulled += summary.applied;
            report.conflicts += summary.conflicts;

            if let Some(invalid) = summary.invalid.into_iter().next() {
                return Err(SyncError::Validation(invalid));
            }
            if !response.has_more {
                return Ok(());
            }
            cursor = match (response.next_cursor, pulled_through) {
                (Some(token), _) => PullCursor::Token(token),
                (None, Some(since)) if cursor != PullCursor::Since(since) => {
                    PullCursor::Since(since)
                }
                (None, _) => {
                    tracing::warn!(
                        table = %table,
                        user = %user,
                        "Remote reported more changes without a way to page past them; continuing next cycle"
                    );
                    return Ok(());
                }
            };
        }

        tracing::debug!(table = %table, user = %user, "Pull page limit reached; continuing next cycle");
        Ok(())
    }

    /// Push the table's pending mutations in batches
    async fn push_table(
        &self,
        table: SyncTable,
        user: &UserId,
        report: &mut TableSyncReport,
        rejections: &mut Vec<SyncError>,
    ) -> SyncResult<()> {
        let pending = self.store.pending(table, user).await?;
        if pending.is_empty() {
            return Ok(());
        }
        let operation = format!("push {table}");

        for batch in pending.chunks(self.settings.push_batch_size.max(1)) {
            let records: Vec<EntityRecord> =
                batch.iter().map(|mutation| mutation.record.clone()).collect();
            let response = self
                .retry
                .run(&operation, || self.remote.push(table, user, &records))
                .await?;
            let pushed_at = now();

            self.store
                .transact(|tx| {
                    let repository = RecordRepository::new(tx);
                    let log = MutationLog::new(tx);
                    for accepted in &response.accepted {
                        let Some(submitted) =
                            batch.iter().find(|mutation| mutation.record.id == accepted.id)
                        else {
                            tracing::warn!(table = %table, id = %accepted.id, "Remote accepted a record that was not pushed");
                            continue;
                        };
                        repository.reconcile_version(
                            table,
                            &accepted.id,
                            submitted.local_version,
                            accepted.version,
                        )?;
                        log.acknowledge(table, &accepted.id, submitted.local_version)?;
                    }
                    BookkeepingRepository::new(tx).record_push(table, user, pushed_at)
                })
                .await?;

            report.pushed += response.accepted.len();
            report.rejected += response.rejected.len();
            for rejected in &response.rejected {
                let error = rejected.to_error();
                tracing::warn!(table = %table, id = %rejected.id, error = %error, "Remote rejected record");
                rejections.push(error);
            }
        }

        Ok(())
    }
}

/// Instant up to which a merged page covers the remote's changes.
///
/// The last page covers everything up to the start of the pull. A page
/// carrying a cursor token needs no timestamp. A page of a remote that pages
/// by timestamp only covers its newest change, so the next page and any
/// later cycle resume from there.
fn page_watermark(response: &PullResponse, pulled_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !response.has_more {
        Some(pulled_at)
    } else if response.next_cursor.is_some() {
        None
    } else {
        response.records.iter().map(|record| record.updated_at).max()
    }
}

/// Removes the user's in-flight entry when the cycle task ends, including
/// by panic.
struct InFlightRegistration {
    in_flight: Arc<Mutex<HashMap<UserId, CompletionReceiver>>>,
    user: UserId,
}

impl Drop for InFlightRegistration {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user);
    }
}

async fn wait_for_completion(receiver: &mut CompletionReceiver) -> SyncOutcome {
    match receiver.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or_else(|| {
            Err(SyncError::Interrupted(
                "cycle finished without a result".to_string(),
            ))
        }),
        Err(_) => Err(SyncError::Interrupted(
            "sync task ended before reporting a result".to_string(),
        )),
    }
}
