//! Job record: the durable unit of work plus its lock/lease state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::JobState;
use crate::domain::{JobId, JobKind, LeaseId, RunOutcome};

/// Ownership claim a worker holds while executing a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLock {
    pub lease_id: LeaseId,
    pub worker_id: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Job record.
///
/// Design:
/// - This is the "single source of truth" for job state.
/// - All state transitions happen through methods here; the store only
///   decides which transition to apply, under its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,

    /// Handler input (for reminders: `{"task_id": "..."}`).
    pub payload: serde_json::Value,

    /// Not claimable before this instant.
    pub fire_at: DateTime<Utc>,

    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<JobLock>,

    /// Number of claims so far (including the current one while Running).
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<RunOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        kind: JobKind,
        payload: serde_json::Value,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            payload,
            fire_at,
            state: JobState::Scheduled,
            lock: None,
            attempts: 0,
            last_outcome: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Due and not held by a live lease.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Scheduled => self.fire_at <= now,
            JobState::Running => self.lock.as_ref().is_some_and(|l| l.expires_at <= now),
            _ => false,
        }
    }

    /// Test-and-set: take the lock if the job is claimable, otherwise leave
    /// the record untouched. This is the only way a job becomes Running.
    pub fn try_claim(
        &mut self,
        now: DateTime<Utc>,
        worker_id: &str,
        lease_id: LeaseId,
        lease: Duration,
    ) -> bool {
        if !self.is_claimable(now) {
            return false;
        }
        self.state = JobState::Running;
        self.lock = Some(JobLock {
            lease_id,
            worker_id: worker_id.to_string(),
            locked_at: now,
            // a lease past the end of time never expires
            expires_at: now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC),
        });
        self.attempts += 1;
        self.last_run_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Whether `lease_id` is the current claim on this job.
    pub fn is_held_by(&self, lease_id: LeaseId) -> bool {
        self.lock.as_ref().is_some_and(|l| l.lease_id == lease_id)
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.lock = None;
        self.last_outcome = Some(RunOutcome::Success);
        self.updated_at = now;
    }

    pub fn schedule_retry(&mut self, next_fire_at: DateTime<Utc>, reason: String, now: DateTime<Utc>) {
        self.state = JobState::Scheduled;
        self.fire_at = next_fire_at;
        self.lock = None;
        self.last_outcome = Some(RunOutcome::Failure(reason));
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) {
        self.state = JobState::Failed;
        self.lock = None;
        self.last_outcome = Some(RunOutcome::Failure(reason));
        self.updated_at = now;
    }

    /// Cancel an outstanding job. The lock stays so the running worker can
    /// still release it; it just cannot be claimed again.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if !self.state.is_outstanding() {
            return false;
        }
        self.state = JobState::Cancelled;
        self.updated_at = now;
        true
    }

    /// Release after a cancelled run: keep Cancelled, drop the lock.
    pub fn finish_cancelled(&mut self, outcome: RunOutcome, now: DateTime<Utc>) {
        self.lock = None;
        self.last_outcome = Some(outcome);
        self.updated_at = now;
    }

    /// Finished, released, and last touched at or before `cutoff`.
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        !self.state.is_outstanding() && self.lock.is_none() && self.updated_at <= cutoff
    }

    /// Whether this job is of `kind` and its payload contains `filter`.
    pub fn matches(&self, kind: &JobKind, filter: &serde_json::Value) -> bool {
        &self.kind == kind && payload_contains(&self.payload, filter)
    }
}

/// Subset match: every key of an object filter must be present with a
/// matching value; anything else compares by equality.
pub fn payload_contains(payload: &serde_json::Value, filter: &serde_json::Value) -> bool {
    match filter {
        serde_json::Value::Object(fields) => fields
            .iter()
            .all(|(key, want)| payload.get(key).is_some_and(|have| payload_contains(have, want))),
        other => payload == other,
    }
}
