//! In-memory job store with optional JSON snapshot persistence.
//!
//! All records live behind one async mutex, so every claim is a test-and-set
//! on the record while no other caller can observe it. Any number of runners
//! in the process may share the store through `Arc`.
//!
//! With `open(path, ..)` the full job table is written to `path` after every
//! mutation (temp file + rename) and reloaded on start-up, so scheduled jobs
//! survive a crash. Leases held at crash time expire and the jobs are
//! reclaimed by the next runner. A mutation whose snapshot cannot be written
//! is undone before the error is returned.
//!
//! Finished jobs are kept for `retention` after their last update (so callers
//! can still inspect them) and dropped on the next claim after that.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    ClaimRequest, ClaimedJob, JobCounts, JobRecord, JobState, JobStore, ReleaseOutcome,
    RetryPolicy,
};
use crate::domain::{JobId, JobKind, LeaseId, RunOutcome, StoreError};
use crate::ports::{Clock, IdGenerator};

const SNAPSHOT_VERSION: u8 = 1;

/// How long finished jobs are kept by default.
pub const DEFAULT_RETENTION: chrono::Duration = chrono::Duration::days(7);

/// In-memory store state.
#[derive(Default)]
struct InMemoryStoreState {
    /// All job records (single source of truth for jobs).
    jobs: HashMap<JobId, JobRecord>,
}

impl InMemoryStoreState {
    /// Get counts by state for observability.
    fn counts_by_state(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for record in self.jobs.values() {
            match record.state {
                JobState::Scheduled => counts.scheduled += 1,
                JobState::Running => counts.running += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

#[derive(Serialize)]
struct SnapshotOut<'a> {
    version: u8,
    jobs: Vec<&'a JobRecord>,
}

#[derive(Deserialize)]
struct SnapshotIn {
    version: u8,
    jobs: Vec<JobRecord>,
}

/// In-memory job store.
pub struct InMemoryJobStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_policy: Option<RetryPolicy>,
    retention: Option<chrono::Duration>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryJobStore {
    /// Volatile store (tests, single-shot runs).
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::default())),
            clock,
            ids,
            retry_policy: Some(RetryPolicy::default()),
            retention: Some(DEFAULT_RETENTION),
            snapshot_path: None,
        }
    }

    /// Store backed by a snapshot file; loads it if it exists.
    pub async fn open(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let jobs = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: SnapshotIn = serde_json::from_slice(&bytes)?;
                if snapshot.version != SNAPSHOT_VERSION {
                    warn!(
                        path = %path.display(),
                        found = snapshot.version,
                        expected = SNAPSHOT_VERSION,
                        "job snapshot version differs, loading anyway"
                    );
                }
                snapshot
                    .jobs
                    .into_iter()
                    .map(|job| (job.id, job))
                    .collect::<HashMap<_, _>>()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), jobs = jobs.len(), "job store opened");

        let mut store = Self::new(clock, ids);
        store.state = Arc::new(Mutex::new(InMemoryStoreState { jobs }));
        store.snapshot_path = Some(path);
        Ok(store)
    }

    /// `None` disables retries: a failed run marks the job failed at once.
    pub fn with_retry_policy(mut self, policy: Option<RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    /// `None` keeps finished jobs forever.
    pub fn with_retention(mut self, retention: Option<chrono::Duration>) -> Self {
        self.retention = retention;
        self
    }

    /// Write the whole table. Called with the state lock held so snapshots
    /// are written in mutation order.
    async fn persist(&self, state: &InMemoryStoreState) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut jobs: Vec<&JobRecord> = state.jobs.values().collect();
        jobs.sort_by_key(|job| job.id);
        let bytes = serde_json::to_vec_pretty(&SnapshotOut {
            version: SNAPSHOT_VERSION,
            jobs,
        })?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Persist, or put the `previous` versions of the touched records back.
    async fn commit(
        &self,
        state: &mut InMemoryStoreState,
        previous: Vec<JobRecord>,
    ) -> Result<(), StoreError> {
        if let Err(e) = self.persist(state).await {
            warn!(error = %e, records = previous.len(), "job snapshot write failed, change undone");
            for record in previous {
                state.jobs.insert(record.id, record);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove finished jobs past retention; returns them for `commit`.
    fn sweep(&self, state: &mut InMemoryStoreState, now: DateTime<Utc>) -> Vec<JobRecord> {
        let Some(cutoff) = self
            .retention
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return Vec::new();
        };
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.is_expired(cutoff))
            .map(|job| job.id)
            .collect();
        let removed: Vec<JobRecord> = expired
            .iter()
            .filter_map(|id| state.jobs.remove(id))
            .collect();
        if !removed.is_empty() {
            debug!(removed = removed.len(), "finished jobs dropped");
        }
        removed
    }

    async fn cancel_matching(
        &self,
        kind: &JobKind,
        filter: &serde_json::Value,
        keep: Option<JobId>,
    ) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut previous = Vec::new();
        for record in state.jobs.values_mut() {
            if Some(record.id) == keep || !record.matches(kind, filter) {
                continue;
            }
            let before = record.clone();
            if record.cancel(now) {
                previous.push(before);
            }
        }
        let cancelled = previous.len();
        if cancelled > 0 {
            self.commit(&mut state, previous).await?;
            debug!(kind = %kind, filter = %filter, cancelled, "jobs cancelled");
        }
        Ok(cancelled)
    }

    fn retry_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let policy = self.retry_policy.as_ref()?;
        if !policy.allows_retry(attempts) {
            return None;
        }
        let delay = chrono::Duration::from_std(policy.next_delay(attempts)).ok()?;
        now.checked_add_signed(delay)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn schedule_job(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        fire_at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let now = self.clock.now();
        let record = JobRecord::new(self.ids.generate_job_id(), kind, payload, fire_at, now);
        let job_id = record.id;

        let mut state = self.state.lock().await;
        state.jobs.insert(job_id, record.clone());
        if let Err(e) = self.persist(&state).await {
            // not durable, so not scheduled
            state.jobs.remove(&job_id);
            return Err(e);
        }
        debug!(job_id = %job_id, kind = %record.kind, fire_at = %fire_at, "job scheduled");
        Ok(record)
    }

    async fn cancel_jobs(
        &self,
        kind: &JobKind,
        filter: &serde_json::Value,
    ) -> Result<usize, StoreError> {
        self.cancel_matching(kind, filter, None).await
    }

    async fn cancel_jobs_except(
        &self,
        kind: &JobKind,
        filter: &serde_json::Value,
        keep: JobId,
    ) -> Result<usize, StoreError> {
        self.cancel_matching(kind, filter, Some(keep)).await
    }

    async fn cancel_job(&self, job_id: JobId) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(record) = state.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        let before = record.clone();
        if !record.cancel(now) {
            return Ok(false);
        }
        self.commit(&mut state, vec![before]).await?;
        debug!(job_id = %job_id, "job cancelled");
        Ok(true)
    }

    async fn claim_due_jobs(&self, request: ClaimRequest<'_>) -> Result<Vec<ClaimedJob>, StoreError> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut previous = self.sweep(&mut state, now);

        let mut due: Vec<(DateTime<Utc>, JobId)> = state
            .jobs
            .values()
            .filter(|job| &job.kind == request.kind && job.is_claimable(now))
            .map(|job| (job.fire_at, job.id))
            .collect();
        due.sort();

        let mut claimed = Vec::new();
        for (_, job_id) in due.into_iter().take(request.limit) {
            let Some(record) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            let before = record.clone();
            let lease_id = self.ids.generate_lease_id();
            if record.try_claim(now, request.worker_id, lease_id, request.lease) {
                previous.push(before);
                if record.attempts > 1 {
                    debug!(job_id = %job_id, attempts = record.attempts, "job reclaimed");
                }
                claimed.push(ClaimedJob {
                    job: record.clone(),
                    lease_id,
                });
            }
        }

        if !previous.is_empty() {
            self.commit(&mut state, previous).await?;
        }
        Ok(claimed)
    }

    async fn release_job(
        &self,
        job_id: JobId,
        lease_id: LeaseId,
        outcome: RunOutcome,
    ) -> Result<ReleaseOutcome, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let attempts = {
            let record = state
                .jobs
                .get(&job_id)
                .ok_or(StoreError::NotFound(job_id))?;
            if !record.is_held_by(lease_id) {
                return Err(StoreError::LeaseLost(job_id));
            }
            record.attempts
        };
        let retry_at = self.retry_at(attempts, now);

        let record = state
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        let before = record.clone();
        let released = if record.state == JobState::Cancelled {
            record.finish_cancelled(outcome, now);
            ReleaseOutcome::Cancelled
        } else {
            match outcome {
                RunOutcome::Success => {
                    record.mark_completed(now);
                    ReleaseOutcome::Completed
                }
                RunOutcome::Failure(reason) => match retry_at {
                    Some(fire_at) => {
                        record.schedule_retry(fire_at, reason, now);
                        ReleaseOutcome::RetryScheduled { fire_at }
                    }
                    None => {
                        warn!(job_id = %job_id, attempts, reason = %reason, "job failed, no retry left");
                        record.mark_failed(reason, now);
                        ReleaseOutcome::Failed
                    }
                },
            }
        };

        self.commit(&mut state, vec![before]).await?;
        Ok(released)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn counts_by_state(&self) -> Result<JobCounts, StoreError> {
        let state = self.state.lock().await;
        Ok(state.counts_by_state())
    }
}
