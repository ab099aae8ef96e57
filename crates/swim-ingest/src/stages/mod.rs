//! Batch stages over the registry.
//!
//! A stage consumes entries in one status and moves each one forward. For
//! every entry the runner:
//!
//! 1. runs the stage's unclaimed work ([`Stage::prepare`]) on a plain read
//! 2. opens a transaction and claims the row (`FOR UPDATE SKIP LOCKED`)
//! 3. runs the stage's database work inside a savepoint
//! 4. on success, applies the stage's transition in the same transaction
//! 5. on a data failure, rolls the savepoint back and records the failure
//!    status with the error message
//!
//! Transient errors leave the entry untouched. A claim lost to another run is
//! retried after a fresh read while the row is still in the input status and
//! counted as skipped once it has moved on. A transaction the database rolled
//! back (deadlock, serialization failure) is retried from the start.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, PgPool};
use tracing::{error, info, warn};

use crate::config::StageConfig;
use crate::error::{IngestError, Result};
use crate::registry::{self, EntryUpdate, FileStatus, TrackedFile};

mod archive;
mod fetch;
mod import;
mod scrape;

pub use archive::ArchiveStage;
pub use fetch::FetchStage;
pub use import::ImportStage;
pub use scrape::ScrapeStage;

/// Pause before re-claiming an entry another run holds
const STALE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Where a successful attempt moves the entry
#[derive(Debug, Clone)]
pub struct Advance {
    pub to: FileStatus,
    pub update: EntryUpdate,
}

impl Advance {
    pub fn to(to: FileStatus) -> Self {
        Self {
            to,
            update: EntryUpdate::default(),
        }
    }

    pub fn with(to: FileStatus, update: EntryUpdate) -> Self {
        Self { to, update }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    /// Output of [`Stage::prepare`], handed to [`Stage::process`]
    type Prepared: Send;

    fn name(&self) -> &'static str;

    /// Status of the entries this stage consumes
    fn input(&self) -> FileStatus;

    /// Status recorded when the work fails on bad data. `None` leaves the
    /// entry in place for the next run.
    fn failure(&self) -> Option<FileStatus>;

    /// Work that needs no lock, run before the claim transaction opens.
    ///
    /// Long network calls belong here so the claim stays short. The entry is
    /// an unlocked read and may be claimed by another run meanwhile.
    async fn prepare(&self, entry: &TrackedFile) -> Result<Self::Prepared>;

    /// Do the work for one claimed entry.
    ///
    /// `conn` is a savepoint inside the claim transaction; everything written
    /// through it commits together with the transition.
    async fn process(
        &self,
        conn: &mut PgConnection,
        entry: &TrackedFile,
        prepared: Self::Prepared,
    ) -> Result<Advance>;
}

/// What happened to one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Advanced(FileStatus),
    Failed(FileStatus),
    /// Left unchanged for the next run
    Deferred,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub processed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
}

impl StageReport {
    fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Advanced(_) => self.processed += 1,
            EntryOutcome::Failed(_) => self.failed += 1,
            EntryOutcome::Deferred => self.deferred += 1,
        }
    }

    /// Some entry ended in a failure status or was left for a retry
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.deferred > 0
    }

    pub fn merge(&mut self, other: StageReport) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
    }
}

pub struct StageRunner {
    pool: PgPool,
    config: StageConfig,
}

impl StageRunner {
    pub fn new(pool: PgPool, config: StageConfig) -> Self {
        Self { pool, config }
    }

    /// Process every entry currently in the stage's input status.
    ///
    /// Fatal errors abort the run; entries already finished stay committed.
    pub async fn run<S: Stage>(&self, stage: &S) -> Result<StageReport> {
        let entries = {
            let mut conn = self.pool.acquire().await?;
            registry::list_by_status(&mut conn, stage.input(), self.config.batch_limit).await?
        };
        info!(stage = stage.name(), entries = entries.len(), "Stage started");

        let mut report = StageReport::default();
        for entry in &entries {
            match self.process_entry(stage, entry.event_id).await {
                Ok(outcome) => report.record(outcome),
                Err(IngestError::StaleState { event_id, expected }) => {
                    info!(stage = stage.name(), event_id, %expected, "Entry taken by another run, skipped");
                    report.skipped += 1;
                },
                Err(e) => {
                    error!(stage = stage.name(), event_id = entry.event_id, error = %e, "Stage aborted");
                    return Err(e);
                },
            }
        }

        info!(
            stage = stage.name(),
            processed = report.processed,
            failed = report.failed,
            deferred = report.deferred,
            skipped = report.skipped,
            "Stage finished"
        );
        Ok(report)
    }

    /// Process one entry, retrying a lost claim while the entry is still in
    /// the stage's input status.
    ///
    /// Returns [`IngestError::StaleState`] once the entry has moved on or the
    /// retries are used up. A transaction that keeps conflicting is deferred
    /// after the same number of retries.
    pub async fn process_entry<S: Stage>(&self, stage: &S, event_id: i64) -> Result<EntryOutcome> {
        let mut retries = 0;
        let mut conflicts = 0;
        loop {
            match self.attempt(stage, event_id).await {
                Err(IngestError::Conflict(message)) => {
                    if conflicts >= self.config.stale_retry_limit {
                        warn!(stage = stage.name(), event_id, error = %message, "Transaction conflict persisted, entry left unchanged");
                        return Ok(EntryOutcome::Deferred);
                    }
                    conflicts += 1;
                    warn!(stage = stage.name(), event_id, error = %message, attempt = conflicts, "Transaction conflict, retrying");
                    tokio::time::sleep(STALE_RETRY_DELAY * conflicts).await;
                },
                Err(IngestError::StaleState { event_id, expected }) => {
                    let fresh = {
                        let mut conn = self.pool.acquire().await?;
                        registry::get(&mut conn, event_id).await?
                    };
                    let still_expected = fresh.as_ref().is_some_and(|e| e.status == expected);
                    if !still_expected || retries >= self.config.stale_retry_limit {
                        return Err(IngestError::StaleState { event_id, expected });
                    }
                    retries += 1;
                    tokio::time::sleep(STALE_RETRY_DELAY * retries).await;
                },
                other => return other,
            }
        }
    }

    async fn attempt<S: Stage>(&self, stage: &S, event_id: i64) -> Result<EntryOutcome> {
        let input = stage.input();
        let snapshot = {
            let mut conn = self.pool.acquire().await?;
            registry::get(&mut conn, event_id).await?
        };
        let snapshot = match snapshot {
            Some(entry) if entry.status == input => entry,
            _ => return Err(IngestError::StaleState { event_id, expected: input }),
        };

        let prepared = match stage.prepare(&snapshot).await {
            Err(e) if e.is_fatal() || e.is_transient() => {
                return Self::left_unchanged(stage, event_id, e);
            },
            prepared => prepared,
        };

        let mut tx = self.pool.begin().await?;
        let entry = registry::claim(&mut tx, event_id, input).await?;

        let mut savepoint = tx.begin().await?;
        let outcome = match prepared {
            Ok(prepared) => stage.process(&mut savepoint, &entry, prepared).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(advance) => {
                savepoint.commit().await?;
                registry::transition(&mut tx, event_id, input, advance.to, &advance.update).await?;
                tx.commit().await?;
                info!(stage = stage.name(), event_id, status = %advance.to, "Entry advanced");
                Ok(EntryOutcome::Advanced(advance.to))
            },
            Err(e) if e.is_fatal() || e.is_transient() || matches!(e, IngestError::StaleState { .. }) => {
                Self::left_unchanged(stage, event_id, e)
            },
            Err(e) => {
                savepoint.rollback().await?;
                match stage.failure() {
                    Some(failed) => {
                        registry::transition(&mut tx, event_id, input, failed, &EntryUpdate::failed(&e)).await?;
                        tx.commit().await?;
                        warn!(stage = stage.name(), event_id, status = %failed, error = %e, "Entry failed");
                        Ok(EntryOutcome::Failed(failed))
                    },
                    None => {
                        warn!(stage = stage.name(), event_id, error = %e, "Entry failed, left unchanged");
                        Ok(EntryOutcome::Deferred)
                    },
                }
            },
        }
    }

    // Fatal errors, lost claims and rolled-back transactions go back to the
    // caller; anything else transient defers the entry.
    fn left_unchanged<S: Stage>(stage: &S, event_id: i64, e: IngestError) -> Result<EntryOutcome> {
        match e {
            e if e.is_fatal() => Err(e),
            e @ (IngestError::StaleState { .. } | IngestError::Conflict(_)) => Err(e),
            e => {
                warn!(stage = stage.name(), event_id, error = %e, "Transient failure, entry left unchanged");
                Ok(EntryOutcome::Deferred)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_failures() {
        let mut report = StageReport::default();
        report.record(EntryOutcome::Advanced(FileStatus::Downloaded));
        assert!(!report.has_failures());

        report.skipped += 1;
        assert!(!report.has_failures());

        report.record(EntryOutcome::Deferred);
        assert!(report.has_failures());
    }

    #[test]
    fn test_report_merge() {
        let mut total = StageReport {
            processed: 1,
            ..StageReport::default()
        };
        total.merge(StageReport {
            processed: 2,
            failed: 1,
            deferred: 0,
            skipped: 3,
        });
        assert_eq!(
            total,
            StageReport {
                processed: 3,
                failed: 1,
                deferred: 0,
                skipped: 3,
            }
        );
    }
}
