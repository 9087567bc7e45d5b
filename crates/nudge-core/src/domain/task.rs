//! Reminder task record and its status state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId, UserId};
use super::offset::OffsetToken;

/// How a task recurs after its reminder fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceMode {
    /// Fire once, then complete.
    #[serde(alias = "once")]
    Single,
    /// Fire every 7 days until the end date.
    #[serde(alias = "weekly")]
    Periodic,
}

/// Task status.
///
/// State transitions:
/// - Pending -> Stopped (user stop)
/// - Pending -> Completed (single fired, or periodic window exhausted)
/// - Pending -> Pending (periodic advance)
///
/// Completed and Stopped are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Stopped)
    }

    /// Whether a record in `self` may be overwritten with `next`.
    pub fn can_become(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => true,
            terminal => terminal == next,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A reminder task.
///
/// `version` is the optimistic-concurrency token: repositories reject a save
/// whose version differs from the stored one and bump it on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner: UserId,
    pub name: String,

    /// Instant the reminder pertains to. Moved forward every periodic cycle.
    pub deadline: DateTime<Utc>,

    /// Last deadline a periodic task may reach (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,

    pub recurrence: RecurrenceMode,
    pub offset: OffsetToken,
    pub status: TaskStatus,

    /// Job currently scheduled for this task, if any future firing is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<JobId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Record a successful send.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.last_sent_at = Some(at);
        self.updated_at = at;
    }

    /// Move to the next periodic cycle.
    pub fn advance(&mut self, deadline: DateTime<Utc>, job_id: JobId, at: DateTime<Utc>) {
        self.deadline = deadline;
        self.current_job = Some(job_id);
        self.updated_at = at;
    }

    /// No-op if already terminal; a stopped task stays stopped.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.current_job = None;
        self.updated_at = at;
    }

    pub fn mark_stopped(&mut self, at: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Stopped;
        self.current_job = None;
        self.updated_at = at;
    }
}

/// Read-only view of the user a task belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Messaging address (e.g. a phone number).
    pub destination: String,
}
