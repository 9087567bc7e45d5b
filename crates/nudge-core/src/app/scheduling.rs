//! TaskScheduler - task の作成・編集・停止・削除
//!
//! API 層から呼ばれる入口です。task ごとの未実行 job は常に高々 1 つ。
//!
//! # 順序
//! job の取り消しは必ず version 付き save が通った後に行います。save が
//! 競合で負けた場合（handler が先に次サイクルを保存した等）は何も取り消さず、
//! 勝った側の job がそのまま残ります。新しい job は save の前に作り、
//! save が失敗したらその job だけを取り下げます。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::reminder::ReminderPayload;
use crate::domain::{
    JobId, JobKind, OffsetToken, PlanError, RecurrenceMode, SchedulingError, Task, TaskId,
    TaskStatus, UserId,
};
use crate::planner::{InitialPlan, compute_initial_fire_time};
use crate::ports::{Clock, IdGenerator, TaskRepository};
use crate::queue::JobStore;

/// Input for `create_task`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner: UserId,
    pub name: String,
    pub deadline: DateTime<Utc>,
    pub recurrence: RecurrenceMode,
    pub offset: OffsetToken,
    /// Required for periodic tasks.
    pub end_date: Option<DateTime<Utc>>,
}

/// Partial update for `edit_task`; `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub name: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub recurrence: Option<RecurrenceMode>,
    pub offset: Option<OffsetToken>,
    pub status: Option<TaskStatus>,
    /// `Some(None)` clears the end date.
    pub end_date: Option<Option<DateTime<Utc>>>,
}

pub struct TaskScheduler {
    tasks: Arc<dyn TaskRepository>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskScheduler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            tasks,
            store,
            clock,
            ids,
        }
    }

    pub async fn create_task(&self, new: NewTask) -> Result<Task, SchedulingError> {
        let name = validate_name(&new.name)?;
        validate_window(new.recurrence, new.deadline, new.end_date)?;

        let now = self.clock.now();
        let plan = plan(now, new.deadline, new.offset, new.recurrence, new.end_date)?;

        let task = Task {
            id: self.ids.generate_task_id(),
            owner: new.owner,
            name,
            deadline: plan.deadline,
            end_date: new.end_date,
            recurrence: new.recurrence,
            offset: new.offset,
            status: TaskStatus::Pending,
            current_job: None,
            last_sent_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let mut task = self.tasks.insert(task).await?;

        let job_id = self.schedule(task.id, plan.fire_at).await?;
        task.current_job = Some(job_id);
        let task = self.save_or_withdraw(task, job_id).await?;

        info!(task_id = %task.id, job_id = %job_id, fire_at = %plan.fire_at, "task created");
        Ok(task)
    }

    /// Apply `edit`, then replace the task's job: a pending task gets a
    /// freshly planned one, a finished task none.
    pub async fn edit_task(
        &self,
        owner: UserId,
        task_id: TaskId,
        edit: TaskEdit,
    ) -> Result<Task, SchedulingError> {
        let mut task = self.owned(owner, task_id).await?;

        if let Some(status) = edit.status
            && status != task.status
        {
            if task.status.is_terminal() {
                return Err(SchedulingError::AlreadyFinished(task.id, task.status));
            }
            task.status = status;
        }
        if let Some(name) = edit.name {
            task.name = validate_name(&name)?;
        }
        if let Some(deadline) = edit.deadline {
            task.deadline = deadline;
        }
        if let Some(recurrence) = edit.recurrence {
            task.recurrence = recurrence;
        }
        if let Some(offset) = edit.offset {
            task.offset = offset;
        }
        if let Some(end_date) = edit.end_date {
            task.end_date = end_date;
        }
        validate_window(task.recurrence, task.deadline, task.end_date)?;

        let now = self.clock.now();
        // plan before touching jobs so a rejected edit leaves the old job in place
        let plan = if task.is_pending() {
            Some(plan(now, task.deadline, task.offset, task.recurrence, task.end_date)?)
        } else {
            None
        };

        task.updated_at = now;
        match plan {
            Some(plan) => {
                let job_id = self.schedule(task.id, plan.fire_at).await?;
                task.deadline = plan.deadline;
                task.current_job = Some(job_id);
                let task = self.save_or_withdraw(task, job_id).await?;
                self.store
                    .cancel_jobs_except(
                        &JobKind::reminder(),
                        &ReminderPayload::for_task(task.id),
                        job_id,
                    )
                    .await?;
                info!(task_id = %task.id, job_id = %job_id, fire_at = %plan.fire_at, "task rescheduled");
                Ok(task)
            }
            None => {
                task.current_job = None;
                let task = self.tasks.save(task).await?;
                self.cancel_all(task.id).await?;
                info!(task_id = %task.id, status = %task.status, "task edited");
                Ok(task)
            }
        }
    }

    /// Irreversible.
    pub async fn stop_task(&self, owner: UserId, task_id: TaskId) -> Result<Task, SchedulingError> {
        let mut task = self.owned(owner, task_id).await?;
        if !task.is_pending() {
            return Err(SchedulingError::AlreadyFinished(task.id, task.status));
        }
        task.mark_stopped(self.clock.now());
        let task = self.tasks.save(task).await?;
        self.cancel_all(task.id).await?;
        info!(task_id = %task.id, "task stopped");
        Ok(task)
    }

    pub async fn delete_task(&self, owner: UserId, task_id: TaskId) -> Result<(), SchedulingError> {
        let task = self.owned(owner, task_id).await?;
        // a handler saving after this point gets NotFound and withdraws its job
        self.tasks.delete(task.id).await?;
        self.cancel_all(task.id).await?;
        info!(task_id = %task.id, "task deleted");
        Ok(())
    }

    /// Newest first. Completed tasks are hidden unless asked for; stopped
    /// tasks are always listed.
    pub async fn list_tasks(
        &self,
        owner: UserId,
        include_completed: bool,
    ) -> Result<Vec<Task>, SchedulingError> {
        let mut tasks = self.tasks.list_by_owner(owner).await?;
        if !include_completed {
            tasks.retain(|t| t.status != TaskStatus::Completed);
        }
        Ok(tasks)
    }

    /// Another user's task is reported as missing.
    async fn owned(&self, owner: UserId, task_id: TaskId) -> Result<Task, SchedulingError> {
        match self.tasks.find(task_id).await? {
            Some(task) if task.owner == owner => Ok(task),
            _ => Err(SchedulingError::NotFound(task_id)),
        }
    }

    async fn schedule(&self, task_id: TaskId, fire_at: DateTime<Utc>) -> Result<JobId, SchedulingError> {
        let job = self
            .store
            .schedule_job(JobKind::reminder(), ReminderPayload::for_task(task_id), fire_at)
            .await?;
        Ok(job.id)
    }

    async fn cancel_all(&self, task_id: TaskId) -> Result<usize, SchedulingError> {
        let filter = ReminderPayload::for_task(task_id);
        Ok(self.store.cancel_jobs(&JobKind::reminder(), &filter).await?)
    }

    async fn save_or_withdraw(&self, task: Task, job_id: JobId) -> Result<Task, SchedulingError> {
        match self.tasks.save(task).await {
            Ok(task) => Ok(task),
            Err(e) => {
                self.store.cancel_job(job_id).await?;
                Err(e.into())
            }
        }
    }
}

fn validate_name(name: &str) -> Result<String, SchedulingError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SchedulingError::Validation("name is required".into()));
    }
    Ok(name.to_string())
}

fn validate_window(
    recurrence: RecurrenceMode,
    deadline: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
) -> Result<(), SchedulingError> {
    if recurrence != RecurrenceMode::Periodic {
        return Ok(());
    }
    match end_date {
        None => Err(SchedulingError::Validation(
            "end date is required for periodic reminders".into(),
        )),
        Some(end) if end < deadline => Err(SchedulingError::Validation(
            "end date must be the same as or after the deadline".into(),
        )),
        Some(_) => Ok(()),
    }
}

fn plan(
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    offset: OffsetToken,
    recurrence: RecurrenceMode,
    end_date: Option<DateTime<Utc>>,
) -> Result<InitialPlan, PlanError> {
    compute_initial_fire_time(now, deadline, offset, recurrence, end_date)
        .ok_or(PlanError::NoUpcomingOccurrence)
}
