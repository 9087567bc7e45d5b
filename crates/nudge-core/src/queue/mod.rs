//! Job store: state machine, retry policy, and the in-memory implementation.

mod memory;
mod record;
mod retry;
mod state;

pub use memory::{DEFAULT_RETENTION, InMemoryJobStore};
pub use record::{JobLock, JobRecord, payload_contains};
pub use retry::RetryPolicy;
pub use state::JobState;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobId, JobKind, LeaseId, RunOutcome, StoreError};

/// What a worker asks for when it polls.
#[derive(Debug, Clone)]
pub struct ClaimRequest<'a> {
    pub kind: &'a JobKind,
    pub worker_id: &'a str,
    pub limit: usize,
    /// Lock lifetime; after it passes the job may be reclaimed.
    pub lease: Duration,
}

/// A job handed to exactly one worker, with the lease proving ownership.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: JobRecord,
    pub lease_id: LeaseId,
}

/// What the store did with a released job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Completed,
    RetryScheduled { fire_at: DateTime<Utc> },
    Failed,
    /// Cancelled while running; stays cancelled whatever the outcome.
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub scheduled: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Durable, shared storage for jobs.
///
/// Design intent:
/// - The store owns every state transition (Scheduled -> Running -> ...).
/// - Workers execute side effects and report the result through `release_job`.
/// - `claim_due_jobs` must hand each job to at most one caller: the claim is
///   a single test-and-set per record, never a read followed by a write.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job that becomes claimable once `fire_at <= now`.
    async fn schedule_job(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        fire_at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError>;

    /// Cancel outstanding jobs of `kind` whose payload contains `filter`.
    /// A job already claimed keeps running; it just will not run again.
    async fn cancel_jobs(
        &self,
        kind: &JobKind,
        filter: &serde_json::Value,
    ) -> Result<usize, StoreError>;

    /// Same as `cancel_jobs`, but `keep` stays outstanding. Used when a task
    /// has just been given a new job and everything older must go.
    async fn cancel_jobs_except(
        &self,
        kind: &JobKind,
        filter: &serde_json::Value,
        keep: JobId,
    ) -> Result<usize, StoreError>;

    /// Cancel one job by id. Returns false if it was no longer outstanding.
    async fn cancel_job(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Atomically claim up to `limit` due jobs, earliest `fire_at` first.
    async fn claim_due_jobs(&self, request: ClaimRequest<'_>) -> Result<Vec<ClaimedJob>, StoreError>;

    /// Report the outcome of a claimed job.
    async fn release_job(
        &self,
        job_id: JobId,
        lease_id: LeaseId,
        outcome: RunOutcome,
    ) -> Result<ReleaseOutcome, StoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Counts of the records currently held. Finished jobs dropped by the
    /// retention sweep are no longer counted.
    async fn counts_by_state(&self) -> Result<JobCounts, StoreError>;
}
