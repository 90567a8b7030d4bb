// Update orchestration: the schedule and results jobs, their busy locks,
// fetch retries and post-cycle scoring work.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use fantacup_core::config::{Config, RetryConfig};
use fantacup_core::db::{settings, Database};
use fantacup_core::elimination::{self, GroupStageOutcome};
use fantacup_core::fixtures::{FetchWindow, FixtureRecord, FixtureSource, SourceError};
use fantacup_core::ingest::{ingest_fixture, IngestOutcome};
use fantacup_core::leaderboard;
use fantacup_core::model::{to_db_time, LeaderboardEntry, MatchStatus};

/// How many failures the in-memory error log keeps.
pub const ERROR_LOG_CAPACITY: usize = 50;

// ---------------------------------------------------------------------------
// Job kinds and locks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Schedule,
    Results,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Schedule => "schedule",
            JobKind::Results => "results",
        }
    }

    /// Settings key holding the last successful run of this job.
    pub fn last_run_key(&self) -> &'static str {
        match self {
            JobKind::Schedule => settings::LAST_SCHEDULE_UPDATE,
            JobKind::Results => settings::LAST_RESULTS_UPDATE,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running {
        /// Monotonic start, used for the stale check.
        since: Instant,
        /// Wall-clock start, reported to callers.
        started_at: DateTime<Utc>,
        run_id: u64,
    },
}

#[derive(Debug)]
struct LockTable {
    schedule: JobState,
    results: JobState,
    next_run_id: u64,
}

impl LockTable {
    fn slot(&mut self, kind: JobKind) -> &mut JobState {
        match kind {
            JobKind::Schedule => &mut self.schedule,
            JobKind::Results => &mut self.results,
        }
    }
}

/// Per-job busy flags. Acquiring is an atomic check-and-set; the returned
/// guard releases on drop, but only if it still owns the slot.
#[derive(Debug)]
pub struct JobLocks {
    table: Mutex<LockTable>,
    max_run: Duration,
}

/// Returned when a job of the same kind is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Busy {
    pub since: DateTime<Utc>,
}

impl JobLocks {
    pub fn new(max_run: Duration) -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(LockTable {
                schedule: JobState::Idle,
                results: JobState::Idle,
                next_run_id: 1,
            }),
            max_run,
        })
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().expect("job lock table poisoned")
    }

    /// Mark `kind` as running. A run older than `max_run` is treated as
    /// crashed and replaced.
    pub fn try_acquire(self: &Arc<Self>, kind: JobKind) -> Result<JobGuard, Busy> {
        let mut table = self.table();
        if let JobState::Running {
            since,
            started_at,
            run_id,
        } = *table.slot(kind)
        {
            let age = since.elapsed();
            if age < self.max_run {
                return Err(Busy { since: started_at });
            }
            warn!(
                job = %kind,
                run_id,
                age_secs = age.as_secs(),
                "clearing stale job lock"
            );
        }

        let run_id = table.next_run_id;
        table.next_run_id += 1;
        *table.slot(kind) = JobState::Running {
            since: Instant::now(),
            started_at: Utc::now(),
            run_id,
        };
        Ok(JobGuard {
            locks: Arc::clone(self),
            kind,
            run_id,
        })
    }

    pub fn state(&self, kind: JobKind) -> JobState {
        *self.table().slot(kind)
    }

    /// Reset every job to idle. Returns the kinds that were marked running.
    pub fn force_clear(&self) -> Vec<JobKind> {
        let mut table = self.table();
        let mut cleared = Vec::new();
        for kind in [JobKind::Schedule, JobKind::Results] {
            if matches!(table.slot(kind), JobState::Running { .. }) {
                cleared.push(kind);
            }
            *table.slot(kind) = JobState::Idle;
        }
        cleared
    }
}

/// Held for the duration of one job run.
#[derive(Debug)]
pub struct JobGuard {
    locks: Arc<JobLocks>,
    kind: JobKind,
    run_id: u64,
}

impl JobGuard {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut table = self.locks.table();
        let slot = table.slot(self.kind);
        // Force-cleared or taken over after going stale: not ours anymore.
        if matches!(*slot, JobState::Running { run_id, .. } if run_id == self.run_id) {
            *slot = JobState::Idle;
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Pause after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            attempt_timeout: config.fetch_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{kind} fetch failed after {attempts} attempt(s): {source}")]
    Fetch {
        kind: JobKind,
        attempts: u32,
        source: SourceError,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of asking for a job run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome<T> {
    Completed(T),
    /// Another run of the same job holds the lock; nothing was fetched.
    AlreadyRunning { since: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleSummary {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub leaderboard_recalculated: bool,
    pub newly_eliminated: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultsSummary {
    pub fetched: usize,
    /// Live or finished records among those fetched.
    pub relevant: usize,
    pub updated: usize,
    pub newly_finished: usize,
    pub failed: usize,
    pub leaderboard_recalculated: bool,
    pub newly_eliminated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub at: String,
    pub job: String,
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub running: bool,
    pub started_at: Option<String>,
    pub last_success: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub schedule: JobStatus,
    pub results: JobStatus,
    pub group_stage_completed_at: Option<String>,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Both halves of a combined manual update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullUpdateSummary {
    pub schedule: TriggerOutcome<ScheduleSummary>,
    pub results: TriggerOutcome<ResultsSummary>,
}

/// Tallies from ingesting one batch.
#[derive(Debug, Default)]
struct BatchTally {
    created: usize,
    updated: usize,
    newly_finished: usize,
    failed: usize,
}

impl BatchTally {
    fn record(&mut self, outcome: &IngestOutcome) {
        if outcome.created {
            self.created += 1;
        } else if outcome.changed {
            self.updated += 1;
        }
        if outcome.newly_finished() {
            self.newly_finished += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Tunables the coordinator needs from [`Config`].
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub schedule_retry: RetryPolicy,
    pub results_retry: RetryPolicy,
    pub results_window_days: i64,
    pub knockout_start: DateTime<Utc>,
    pub max_run: Duration,
}

impl UpdateSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            schedule_retry: RetryPolicy::from(&config.schedule.retry),
            results_retry: RetryPolicy::from(&config.results.retry),
            results_window_days: config.results.window_days,
            knockout_start: config.tournament.knockout_start,
            max_run: Duration::from_secs(config.updates.max_run_minutes * 60),
        }
    }
}

/// Owns both update jobs. Shared as `Arc<UpdateCoordinator>` between the
/// scheduler loops and the request handlers.
pub struct UpdateCoordinator {
    db: Arc<Database>,
    source: Arc<dyn FixtureSource>,
    locks: Arc<JobLocks>,
    settings: UpdateSettings,
    errors: Mutex<VecDeque<ErrorRecord>>,
}

impl UpdateCoordinator {
    pub fn new(db: Arc<Database>, source: Arc<dyn FixtureSource>, settings: UpdateSettings) -> Self {
        Self {
            locks: JobLocks::new(settings.max_run),
            db,
            source,
            settings,
            errors: Mutex::new(VecDeque::with_capacity(ERROR_LOG_CAPACITY)),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn locks(&self) -> &Arc<JobLocks> {
        &self.locks
    }

    // ----- Jobs -----

    /// Fetch the whole tournament and upsert every fixture.
    pub async fn run_schedule_update(&self) -> Result<TriggerOutcome<ScheduleSummary>, UpdateError> {
        let kind = JobKind::Schedule;
        let guard = match self.locks.try_acquire(kind) {
            Ok(guard) => guard,
            Err(busy) => return Ok(self.already_running(kind, busy)),
        };
        self.log_cycle_start(kind, guard.run_id());

        let records = self
            .fetch_with_retry(kind, &FetchWindow::FullTournament, self.settings.schedule_retry)
            .await?;

        let tally = self.ingest_batch(&records);
        let (leaderboard_recalculated, newly_eliminated) = self.post_cycle(kind)?;

        let summary = ScheduleSummary {
            fetched: records.len(),
            created: tally.created,
            updated: tally.updated,
            failed: tally.failed,
            leaderboard_recalculated,
            newly_eliminated,
        };
        self.finish_cycle(kind)?;
        info!(
            fetched = summary.fetched,
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            "schedule update complete"
        );
        Ok(TriggerOutcome::Completed(summary))
    }

    /// Fetch fixtures around today and upsert the live and finished ones.
    pub async fn run_results_update(&self) -> Result<TriggerOutcome<ResultsSummary>, UpdateError> {
        let kind = JobKind::Results;
        let guard = match self.locks.try_acquire(kind) {
            Ok(guard) => guard,
            Err(busy) => return Ok(self.already_running(kind, busy)),
        };
        self.log_cycle_start(kind, guard.run_id());

        let window = FetchWindow::around(Utc::now().date_naive(), self.settings.results_window_days);
        let records = self
            .fetch_with_retry(kind, &window, self.settings.results_retry)
            .await?;

        let relevant: Vec<FixtureRecord> = records
            .iter()
            .filter(|r| r.status.match_status() != MatchStatus::Scheduled)
            .cloned()
            .collect();

        let tally = self.ingest_batch(&relevant);
        let (leaderboard_recalculated, newly_eliminated) = self.post_cycle(kind)?;

        let summary = ResultsSummary {
            fetched: records.len(),
            relevant: relevant.len(),
            updated: tally.created + tally.updated,
            newly_finished: tally.newly_finished,
            failed: tally.failed,
            leaderboard_recalculated,
            newly_eliminated,
        };
        self.finish_cycle(kind)?;
        info!(
            fetched = summary.fetched,
            relevant = summary.relevant,
            updated = summary.updated,
            newly_finished = summary.newly_finished,
            failed = summary.failed,
            "results update complete"
        );
        Ok(TriggerOutcome::Completed(summary))
    }

    /// Schedule sync followed by a results update, each under its own lock.
    /// A failed schedule sync stops before the results half.
    pub async fn run_full_update(&self) -> Result<FullUpdateSummary, UpdateError> {
        let schedule = self.run_schedule_update().await?;
        let results = self.run_results_update().await?;
        Ok(FullUpdateSummary { schedule, results })
    }

    // ----- Direct operations -----

    pub fn recalculate_leaderboard(&self) -> anyhow::Result<Vec<LeaderboardEntry>> {
        leaderboard::recalculate(&self.db).inspect_err(|e| {
            self.record_error("leaderboard", "store", &format!("{e:#}"));
        })
    }

    pub fn eliminate_group_stage(&self, teams: &[String]) -> anyhow::Result<GroupStageOutcome> {
        elimination::eliminate_group_stage(&self.db, teams, Utc::now())
    }

    pub fn reset_eliminations(&self) -> anyhow::Result<usize> {
        elimination::reset_all_eliminations(&self.db)
    }

    /// Clear both busy flags regardless of age.
    pub fn force_clear_locks(&self) -> Vec<JobKind> {
        let cleared = self.locks.force_clear();
        warn!(cleared = ?cleared, "update locks force-cleared");
        cleared
    }

    pub fn status(&self) -> anyhow::Result<StatusReport> {
        Ok(StatusReport {
            schedule: self.job_status(JobKind::Schedule)?,
            results: self.job_status(JobKind::Results)?,
            group_stage_completed_at: self
                .db
                .get_setting(settings::GROUP_STAGE_ELIMINATION_COMPLETED)?,
            recent_errors: self.recent_errors(),
        })
    }

    /// Most recent failures, newest first.
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.error_log().iter().rev().cloned().collect()
    }

    // ----- Internals -----

    fn already_running<T>(&self, kind: JobKind, busy: Busy) -> TriggerOutcome<T> {
        info!(job = %kind, since = %busy.since, "update already running, skipping");
        TriggerOutcome::AlreadyRunning {
            since: to_db_time(busy.since),
        }
    }

    fn log_cycle_start(&self, kind: JobKind, run_id: u64) {
        match self.db.get_setting(kind.last_run_key()) {
            Ok(Some(last)) => info!(job = %kind, run_id, last_success = %last, "update starting"),
            Ok(None) => info!(job = %kind, run_id, "update starting, no previous run"),
            Err(e) => warn!(job = %kind, run_id, "update starting, last run unreadable: {e:#}"),
        }
    }

    async fn fetch_with_retry(
        &self,
        kind: JobKind,
        window: &FetchWindow,
        policy: RetryPolicy,
    ) -> Result<Vec<FixtureRecord>, UpdateError> {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(policy.attempt_timeout, self.source.fetch(window)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(policy.attempt_timeout)),
            };

            let err = match result {
                Ok(records) => return Ok(records),
                Err(err) => err,
            };

            warn!(
                job = %kind,
                attempt,
                max_attempts = policy.max_attempts,
                category = err.category(),
                "fetch failed: {err}"
            );

            if attempt >= policy.max_attempts {
                let err = UpdateError::Fetch {
                    kind,
                    attempts: attempt,
                    source: err,
                };
                error!(job = %kind, "{err}");
                self.record_error(kind.as_str(), "fetch", &err.to_string());
                return Err(err);
            }

            tokio::time::sleep(policy.delay_after(attempt)).await;
            attempt += 1;
        }
    }

    fn ingest_batch(&self, records: &[FixtureRecord]) -> BatchTally {
        let mut tally = BatchTally::default();
        for record in records {
            match ingest_fixture(&self.db, record) {
                Ok(outcome) => tally.record(&outcome),
                Err(e) => {
                    tally.failed += 1;
                    warn!(fixture = record.external_id, "failed to ingest fixture: {e:#}");
                }
            }
        }
        tally
    }

    /// Recompute standings if the store marks them stale, then run the
    /// knockout pass. Returns whether a recompute ran and who went out.
    fn post_cycle(&self, kind: JobKind) -> Result<(bool, Vec<String>), UpdateError> {
        let stale = self
            .db
            .get_setting(settings::LEADERBOARD_DIRTY)
            .map_err(|e| self.store_failure(kind, e.context("cannot read leaderboard marker")))?
            .is_some();

        if stale {
            if let Err(e) = leaderboard::recalculate(&self.db) {
                let e = e.context(format!("{kind} update: leaderboard recalculation failed"));
                return Err(self.store_failure(kind, e));
            }
        }

        let eliminated = match elimination::process_knockout_eliminations(
            &self.db,
            self.settings.knockout_start,
            Utc::now(),
        ) {
            Ok(teams) => teams,
            Err(e) => {
                error!(job = %kind, "knockout elimination check failed: {e:#}");
                self.record_error(kind.as_str(), "elimination", &format!("{e:#}"));
                Vec::new()
            }
        };
        Ok((stale, eliminated))
    }

    fn store_failure(&self, kind: JobKind, e: anyhow::Error) -> UpdateError {
        error!(job = %kind, "{e:#}");
        self.record_error(kind.as_str(), "store", &format!("{e:#}"));
        UpdateError::Store(e)
    }

    fn finish_cycle(&self, kind: JobKind) -> Result<(), UpdateError> {
        self.db
            .set_time_setting(kind.last_run_key(), Utc::now())
            .map_err(UpdateError::Store)
    }

    fn job_status(&self, kind: JobKind) -> anyhow::Result<JobStatus> {
        let (running, started_at) = match self.locks.state(kind) {
            JobState::Idle => (false, None),
            JobState::Running { started_at, .. } => (true, Some(to_db_time(started_at))),
        };
        Ok(JobStatus {
            running,
            started_at,
            last_success: self.db.get_setting(kind.last_run_key())?,
        })
    }

    fn error_log(&self) -> MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.errors.lock().expect("error log poisoned")
    }

    fn record_error(&self, job: &str, category: &str, message: &str) {
        let mut log = self.error_log();
        if log.len() == ERROR_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(ErrorRecord {
            at: to_db_time(Utc::now()),
            job: job.to_string(),
            category: category.to_string(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(base_secs),
            attempt_timeout: Duration::from_secs(15),
        }
    }

    // ------------------------------------------------------------------
    // Backoff
    // ------------------------------------------------------------------

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = policy(5);
        assert_eq!(p.delay_after(1), Duration::from_secs(5));
        assert_eq!(p.delay_after(2), Duration::from_secs(10));
        assert_eq!(p.delay_after(3), Duration::from_secs(20));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let p = policy(5);
        assert!(p.delay_after(64) >= p.delay_after(31));
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn second_acquire_of_same_kind_is_busy() {
        let locks = JobLocks::new(Duration::from_secs(600));
        let guard = locks.try_acquire(JobKind::Results).unwrap();
        assert!(locks.try_acquire(JobKind::Results).is_err());
        // Other kind is independent.
        let other = locks.try_acquire(JobKind::Schedule).unwrap();

        drop(guard);
        assert_eq!(locks.state(JobKind::Results), JobState::Idle);
        assert!(matches!(locks.state(JobKind::Schedule), JobState::Running { .. }));
        drop(other);
        assert!(locks.try_acquire(JobKind::Results).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lock_is_taken_over() {
        let locks = JobLocks::new(Duration::from_secs(600));
        let stale = locks.try_acquire(JobKind::Schedule).unwrap();

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(locks.try_acquire(JobKind::Schedule).is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        let fresh = locks.try_acquire(JobKind::Schedule).unwrap();
        assert_ne!(fresh.run_id(), stale.run_id());

        // The crashed run finishing late must not release the new run.
        drop(stale);
        assert!(matches!(
            locks.state(JobKind::Schedule),
            JobState::Running { run_id, .. } if run_id == fresh.run_id()
        ));
        drop(fresh);
        assert_eq!(locks.state(JobKind::Schedule), JobState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn force_clear_resets_everything() {
        let locks = JobLocks::new(Duration::from_secs(600));
        let guard = locks.try_acquire(JobKind::Results).unwrap();

        assert_eq!(locks.force_clear(), vec![JobKind::Results]);
        assert_eq!(locks.state(JobKind::Results), JobState::Idle);

        let next = locks.try_acquire(JobKind::Results).unwrap();
        drop(guard);
        assert!(matches!(locks.state(JobKind::Results), JobState::Running { .. }));
        drop(next);
        assert!(locks.force_clear().is_empty());
    }

    // ------------------------------------------------------------------
    // Batch tally
    // ------------------------------------------------------------------

    fn outcome(created: bool, changed: bool, prev: Option<MatchStatus>, status: MatchStatus) -> IngestOutcome {
        IngestOutcome {
            match_id: 1,
            external_id: 1,
            created,
            previous_status: prev,
            status,
            changed,
            created_teams: Vec::new(),
        }
    }

    #[test]
    fn tally_counts_created_updated_and_finished() {
        let mut tally = BatchTally::default();
        tally.record(&outcome(true, true, None, MatchStatus::Scheduled));
        tally.record(&outcome(false, true, Some(MatchStatus::Live), MatchStatus::Finished));
        tally.record(&outcome(false, false, Some(MatchStatus::Finished), MatchStatus::Finished));
        assert_eq!((tally.created, tally.updated, tally.newly_finished), (1, 1, 1));
    }

    #[test]
    fn unchanged_record_is_not_counted() {
        let mut tally = BatchTally::default();
        tally.record(&outcome(false, false, Some(MatchStatus::Live), MatchStatus::Live));
        assert_eq!((tally.created, tally.updated, tally.newly_finished), (0, 0, 0));
    }
}
