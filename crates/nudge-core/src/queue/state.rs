//! Job state machine for the store.

use serde::{Deserialize, Serialize};

/// Job state.
///
/// State transitions:
/// - Scheduled -> Running -> Completed
/// - Scheduled -> Running -> Scheduled (retry with backoff, until max_attempts)
/// - Scheduled -> Running -> Failed (retries exhausted or disabled)
/// - Running -> Running (lease expired, reclaimed by another worker)
/// - Scheduled | Running -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for `fire_at`.
    Scheduled,

    /// Claimed by a worker under a lease.
    Running,

    /// Handler succeeded.
    Completed,

    /// Handler failed and no retry is left.
    Failed,

    /// Cancelled through `cancel_jobs`. A running handler is not interrupted.
    Cancelled,
}

impl JobState {
    /// Still expected to run (counts toward "one outstanding job per task").
    pub fn is_outstanding(self) -> bool {
        matches!(self, JobState::Scheduled | JobState::Running)
    }
}
