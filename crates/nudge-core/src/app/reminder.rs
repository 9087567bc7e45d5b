//! ReminderHandler - reminder job を実行して task を進める
//!
//! # フロー
//! 1. payload から task を読む（無ければ no-op）
//! 2. 所有 user を読む（無ければ no-op）
//! 3. task が pending でない / current_job がこの job でない → no-op
//! 4. メッセージ送信（失敗したら task は触らずに Err を返す）
//! 5. single → completed、periodic → 次サイクルの job を作って deadline を進める
//! 6. 読んだ時点の version で save（競合したら作った job を取り消す）

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::registry::JobHandler;
use crate::domain::{
    HandlerError, JobId, JobKind, RecurrenceMode, RepositoryError, Task, TaskId,
};
use crate::planner::compute_next_periodic;
use crate::ports::{Clock, MessagingGateway, TaskRepository, UserDirectory};
use crate::queue::{JobRecord, JobStore};

/// Payload of a reminder job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub task_id: TaskId,
}

impl ReminderPayload {
    /// Payload for a new job; also the filter that matches every job of the task.
    pub fn for_task(task_id: TaskId) -> serde_json::Value {
        serde_json::json!({ "task_id": task_id })
    }
}

/// Message text sent to the user.
pub fn render_message(task: &Task, display_offset: FixedOffset) -> String {
    format!(
        "Reminder: {}\nDeadline: {}",
        task.name,
        task.deadline
            .with_timezone(&display_offset)
            .format("%Y-%m-%d %H:%M (UTC%:z)")
    )
}

pub struct ReminderHandler {
    tasks: Arc<dyn TaskRepository>,
    users: Arc<dyn UserDirectory>,
    gateway: Arc<dyn MessagingGateway>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    display_offset: FixedOffset,
}

impl ReminderHandler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        users: Arc<dyn UserDirectory>,
        gateway: Arc<dyn MessagingGateway>,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks,
            users,
            gateway,
            store,
            clock,
            display_offset: Utc.fix(),
        }
    }

    pub fn with_display_offset(mut self, offset: FixedOffset) -> Self {
        self.display_offset = offset;
        self
    }

    /// Load the task this job belongs to, or `None` when the job is stale.
    async fn load_current(&self, job: &JobRecord) -> Result<Option<Task>, HandlerError> {
        let payload: ReminderPayload = serde_json::from_value(job.payload.clone())?;
        let Some(task) = self.tasks.find(payload.task_id).await? else {
            debug!(task_id = %payload.task_id, "task gone, nothing to send");
            return Ok(None);
        };
        if !task.is_pending() {
            debug!(task_id = %task.id, status = %task.status, "task finished, nothing to send");
            return Ok(None);
        }
        if task.current_job != Some(job.id) {
            debug!(
                task_id = %task.id,
                current_job = ?task.current_job.map(|id| id.to_string()),
                "job superseded, nothing to send"
            );
            return Ok(None);
        }
        Ok(Some(task))
    }

    /// Schedule the next cycle of a periodic task (or complete it) and save.
    /// A job scheduled here is cancelled again if the save loses a race.
    async fn advance_and_save(&self, mut task: Task) -> Result<(), HandlerError> {
        let now = self.clock.now();
        let mut scheduled: Option<JobId> = None;

        match task.recurrence {
            RecurrenceMode::Single => task.mark_completed(now),
            RecurrenceMode::Periodic => {
                match compute_next_periodic(task.deadline, task.offset, task.end_date) {
                    Some(next) => {
                        let job = self
                            .store
                            .schedule_job(
                                JobKind::reminder(),
                                ReminderPayload::for_task(task.id),
                                next.fire_at,
                            )
                            .await?;
                        task.advance(next.deadline, job.id, now);
                        scheduled = Some(job.id);
                    }
                    None => task.mark_completed(now),
                }
            }
        }

        let task_id = task.id;
        match self.tasks.save(task).await {
            Ok(saved) => {
                info!(
                    task_id = %task_id,
                    status = %saved.status,
                    deadline = %saved.deadline,
                    next_job = ?saved.current_job.map(|id| id.to_string()),
                    "task advanced"
                );
                Ok(())
            }
            Err(e) => {
                if let Some(job_id) = scheduled {
                    self.store.cancel_job(job_id).await?;
                }
                match e {
                    // a concurrent edit/stop wins
                    RepositoryError::VersionConflict { .. }
                    | RepositoryError::TerminalStatus { .. }
                    | RepositoryError::NotFound(_) => {
                        warn!(task_id = %task_id, error = %e, "task changed while sending; keeping the newer state");
                        Ok(())
                    }
                    other => Err(other.into()),
                }
            }
        }
    }
}

#[async_trait]
impl JobHandler for ReminderHandler {
    async fn handle(&self, job: &JobRecord) -> Result<(), HandlerError> {
        let Some(mut task) = self.load_current(job).await? else {
            return Ok(());
        };
        let Some(user) = self.users.find_user(task.owner).await? else {
            warn!(task_id = %task.id, owner = %task.owner, "owner not found, nothing to send");
            return Ok(());
        };

        let text = render_message(&task, self.display_offset);
        if let Err(e) = self.gateway.send(&user.destination, &text).await {
            warn!(task_id = %task.id, error = %e, "reminder delivery failed");
            return Err(e.into());
        }

        task.mark_sent(self.clock.now());
        self.advance_and_save(task).await
    }

    /// Delivery kept failing. A periodic task skips the missed cycle and
    /// carries on; a single task stays pending without a job so the owner
    /// can see it was never delivered and edit it to try again.
    async fn on_exhausted(&self, job: &JobRecord) -> Result<(), HandlerError> {
        let Some(mut task) = self.load_current(job).await? else {
            return Ok(());
        };
        warn!(task_id = %task.id, job_id = %job.id, "reminder undeliverable, giving up on this cycle");

        if task.recurrence == RecurrenceMode::Periodic {
            return self.advance_and_save(task).await;
        }

        task.current_job = None;
        task.updated_at = self.clock.now();
        match self.tasks.save(task).await {
            Ok(_) => Ok(()),
            Err(RepositoryError::VersionConflict { .. } | RepositoryError::TerminalStatus { .. }) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
