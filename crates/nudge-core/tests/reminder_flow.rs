//! End-to-end reminder flow: scheduler → job store → runner → handler.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use tokio::sync::Notify;

use nudge_core::SchedulerConfig;
use nudge_core::app::{HandlerRegistry, JobRunner, NewTask, ReminderHandler, TaskScheduler};
use nudge_core::domain::{
    DeliveryError, JobKind, OffsetToken, RecurrenceMode, Task, TaskId, TaskStatus, User, UserId,
};
use nudge_core::impls::{InMemoryTaskRepository, InMemoryUserDirectory, JsonTaskRepository};
use nudge_core::ports::{FixedClock, MessagingGateway, TaskRepository, UlidGenerator};
use nudge_core::queue::{InMemoryJobStore, JobState, JobStore};

/// Monday 2025-01-06 10:00 UTC.
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap()
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl Outbox {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MessagingGateway for Outbox {
    async fn send(&self, _destination: &str, text: &str) -> Result<(), DeliveryError> {
        if self.fail {
            return Err(DeliveryError::Rejected("unknown number".into()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct World {
    clock: FixedClock,
    store: Arc<InMemoryJobStore>,
    tasks: Arc<InMemoryTaskRepository>,
    scheduler: TaskScheduler,
    runner: Arc<JobRunner>,
    owner: UserId,
}

async fn world(gateway: Arc<dyn MessagingGateway>, store_retry: bool) -> World {
    let clock = FixedClock::new(t0());
    let ids = Arc::new(UlidGenerator::new(clock.clone()));
    let mut store = InMemoryJobStore::new(Arc::new(clock.clone()), ids.clone());
    if !store_retry {
        store = store.with_retry_policy(None);
    }
    let store = Arc::new(store);
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let users = Arc::new(InMemoryUserDirectory::new());
    let owner = UserId::generate();
    users
        .insert(User {
            id: owner,
            name: "alice".into(),
            destination: "+628123456789".into(),
        })
        .await;

    let handler = ReminderHandler::new(
        tasks.clone(),
        users,
        gateway,
        store.clone(),
        Arc::new(clock.clone()),
    );
    let mut registry = HandlerRegistry::new();
    registry
        .register(JobKind::reminder(), Arc::new(handler), 5)
        .unwrap();
    let runner = Arc::new(JobRunner::new(
        store.clone(),
        registry,
        &SchedulerConfig::default(),
    ));
    let scheduler = TaskScheduler::new(tasks.clone(), store.clone(), Arc::new(clock.clone()), ids);

    World {
        clock,
        store,
        tasks,
        scheduler,
        runner,
        owner,
    }
}

impl World {
    async fn create(
        &self,
        deadline: DateTime<Utc>,
        offset: OffsetToken,
        recurrence: RecurrenceMode,
        end_date: Option<DateTime<Utc>>,
    ) -> Task {
        self.scheduler
            .create_task(NewTask {
                owner: self.owner,
                name: "water the plants".into(),
                deadline,
                recurrence,
                offset,
                end_date,
            })
            .await
            .unwrap()
    }

    async fn task(&self, id: TaskId) -> Task {
        self.tasks.find(id).await.unwrap().unwrap()
    }

    async fn fire_at(&self, task: &Task) -> DateTime<Utc> {
        let job_id = task.current_job.expect("pending task has a job");
        self.store.get_job(job_id).await.unwrap().unwrap().fire_at
    }
}

#[tokio::test]
async fn scenario_a_future_single_fires_once_at_deadline_minus_offset() {
    let outbox = Arc::new(Outbox::default());
    let w = world(outbox.clone(), true).await;
    let deadline = t0() + Duration::days(5);

    let task = w
        .create(deadline, OffsetToken::Long, RecurrenceMode::Single, None)
        .await;
    assert_eq!(task.status, TaskStatus::Pending);
    let fire_at = w.fire_at(&task).await;
    assert_eq!(fire_at, deadline - Duration::days(3));
    assert!(fire_at > t0());

    assert_eq!(w.runner.poll_once().await, 0);

    w.clock.set(fire_at);
    assert_eq!(w.runner.poll_once().await, 1);
    assert_eq!(outbox.count(), 1);
    assert!(outbox.sent.lock().unwrap()[0].starts_with("Reminder: water the plants\nDeadline: 2025-01-11"));

    let task = w.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.current_job, None);
    assert_eq!(task.last_sent_at, Some(fire_at));

    // nothing left to run
    w.clock.advance(Duration::days(30));
    assert_eq!(w.runner.poll_once().await, 0);
    assert_eq!(outbox.count(), 1);
}

#[tokio::test]
async fn scenario_b_late_single_fires_sixty_seconds_from_now() {
    let outbox = Arc::new(Outbox::default());
    let w = world(outbox.clone(), true).await;

    let task = w
        .create(
            t0() + Duration::seconds(30),
            OffsetToken::Short,
            RecurrenceMode::Single,
            None,
        )
        .await;
    assert_eq!(w.fire_at(&task).await, t0() + Duration::seconds(60));

    w.clock.advance(Duration::seconds(59));
    assert_eq!(w.runner.poll_once().await, 0);

    w.clock.advance(Duration::seconds(1));
    assert_eq!(w.runner.poll_once().await, 1);
    assert_eq!(outbox.count(), 1);
    assert_eq!(w.task(task.id).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn scenario_c_stale_periodic_catches_up_and_keeps_weekday() {
    let outbox = Arc::new(Outbox::default());
    let w = world(outbox.clone(), true).await;
    let first_deadline = t0() - Duration::days(1);
    let end = t0() + Duration::days(60);

    let task = w
        .create(first_deadline, OffsetToken::Medium, RecurrenceMode::Periodic, Some(end))
        .await;
    let first_fire = w.fire_at(&task).await;
    assert!(first_fire > t0());
    assert_eq!(task.deadline, first_deadline + Duration::days(7));
    assert_eq!(task.deadline.weekday(), first_deadline.weekday());
    assert_eq!(task.deadline.hour(), first_deadline.hour());

    // run every cycle until the window closes
    let mut deadlines = vec![task.deadline];
    let mut current = task;
    for _ in 0..20 {
        let fire_at = w.fire_at(&current).await;
        w.clock.set(fire_at);
        assert_eq!(w.runner.poll_once().await, 1);
        current = w.task(current.id).await;
        if !current.is_pending() {
            break;
        }
        assert_eq!(current.deadline - *deadlines.last().unwrap(), Duration::days(7));
        deadlines.push(current.deadline);
    }

    assert_eq!(current.status, TaskStatus::Completed);
    assert!(deadlines.iter().all(|d| *d <= end));
    assert!(deadlines.iter().all(|d| d.weekday() == first_deadline.weekday()));
    // deadlines at +6, +13, ..., +55 days
    assert_eq!(deadlines.len(), 8);
    assert_eq!(outbox.count(), 8);
    assert_eq!(w.store.counts_by_state().await.unwrap().scheduled, 0);
}

#[tokio::test]
async fn scenario_d_periodic_ending_within_a_period_completes_after_one_send() {
    let outbox = Arc::new(Outbox::default());
    let w = world(outbox.clone(), true).await;
    let deadline = t0() + Duration::days(2);

    let task = w
        .create(
            deadline,
            OffsetToken::Medium,
            RecurrenceMode::Periodic,
            Some(deadline + Duration::days(3)),
        )
        .await;

    w.clock.set(w.fire_at(&task).await);
    assert_eq!(w.runner.poll_once().await, 1);

    let task = w.task(task.id).await;
    assert_eq!(outbox.count(), 1);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.current_job, None);
    assert_eq!(task.deadline, deadline);
}

/// Holds every send until the test lets it through.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl MessagingGateway for Gate {
    async fn send(&self, _destination: &str, _text: &str) -> Result<(), DeliveryError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn scenario_e_stop_during_in_flight_send_stays_stopped() {
    let gate = Arc::new(Gate::default());
    let w = world(gate.clone(), true).await;

    let task = w
        .create(
            t0() + Duration::days(2),
            OffsetToken::Medium,
            RecurrenceMode::Periodic,
            Some(t0() + Duration::days(60)),
        )
        .await;
    let job_id = task.current_job.unwrap();
    w.clock.set(w.fire_at(&task).await);

    let runner = Arc::clone(&w.runner);
    let poll = tokio::spawn(async move { runner.poll_once().await });

    gate.entered.notified().await;
    let stopped = w.scheduler.stop_task(w.owner, task.id).await.unwrap();
    assert_eq!(stopped.status, TaskStatus::Stopped);
    gate.release.notify_one();

    assert_eq!(poll.await.unwrap(), 1);

    let task = w.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Stopped);
    assert_eq!(task.current_job, None);

    let counts = w.store.counts_by_state().await.unwrap();
    assert_eq!(counts.scheduled, 0);
    assert_eq!(counts.running, 0);
    let job = w.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Cancelled);

    // nothing revives it
    w.clock.advance(Duration::days(30));
    assert_eq!(w.runner.poll_once().await, 0);
    assert_eq!(w.task(task.id).await.status, TaskStatus::Stopped);
}

#[tokio::test]
async fn undeliverable_single_reminder_releases_its_job_reference() {
    let outbox = Arc::new(Outbox {
        fail: true,
        ..Outbox::default()
    });
    let w = world(outbox.clone(), false).await;

    let task = w
        .create(
            t0() + Duration::days(5),
            OffsetToken::Long,
            RecurrenceMode::Single,
            None,
        )
        .await;
    let job_id = task.current_job.unwrap();
    w.clock.set(w.fire_at(&task).await);
    assert_eq!(w.runner.poll_once().await, 1);

    let job = w.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);

    let task = w.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.current_job, None);
    assert_eq!(task.last_sent_at, None);
}

#[tokio::test]
async fn edited_deadline_runs_only_the_new_job() {
    let outbox = Arc::new(Outbox::default());
    let w = world(outbox.clone(), true).await;

    let task = w
        .create(
            t0() + Duration::days(5),
            OffsetToken::Long,
            RecurrenceMode::Single,
            None,
        )
        .await;
    let old_fire = w.fire_at(&task).await;

    let edited = w
        .scheduler
        .edit_task(
            w.owner,
            task.id,
            nudge_core::app::TaskEdit {
                deadline: Some(t0() + Duration::days(10)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let new_fire = w.fire_at(&edited).await;

    w.clock.set(old_fire);
    assert_eq!(w.runner.poll_once().await, 0);

    w.clock.set(new_fire);
    assert_eq!(w.runner.poll_once().await, 1);
    assert_eq!(outbox.count(), 1);
    assert_eq!(w.task(task.id).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn scheduled_reminder_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let jobs_path = dir.path().join("jobs.json");
    let tasks_path = dir.path().join("tasks.json");
    let clock = FixedClock::new(t0());
    let owner = UserId::generate();

    let task = {
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let store = Arc::new(
            InMemoryJobStore::open(&jobs_path, Arc::new(clock.clone()), ids.clone())
                .await
                .unwrap(),
        );
        let tasks = Arc::new(JsonTaskRepository::open(&tasks_path).await.unwrap());
        let scheduler = TaskScheduler::new(tasks, store, Arc::new(clock.clone()), ids);
        scheduler
            .create_task(NewTask {
                owner,
                name: "renew insurance".into(),
                deadline: t0() + Duration::days(5),
                recurrence: RecurrenceMode::Single,
                offset: OffsetToken::Long,
                end_date: None,
            })
            .await
            .unwrap()
    };

    // a fresh process picks up both files
    let ids = Arc::new(UlidGenerator::new(clock.clone()));
    let store = Arc::new(
        InMemoryJobStore::open(&jobs_path, Arc::new(clock.clone()), ids)
            .await
            .unwrap(),
    );
    let tasks = Arc::new(JsonTaskRepository::open(&tasks_path).await.unwrap());
    assert_eq!(tasks.find(task.id).await.unwrap(), Some(task.clone()));

    let users = Arc::new(InMemoryUserDirectory::new());
    users
        .insert(User {
            id: owner,
            name: "alice".into(),
            destination: "+628123456789".into(),
        })
        .await;
    let outbox = Arc::new(Outbox::default());
    let handler = ReminderHandler::new(
        tasks.clone(),
        users,
        outbox.clone(),
        store.clone(),
        Arc::new(clock.clone()),
    );
    let mut registry = HandlerRegistry::new();
    registry
        .register(JobKind::reminder(), Arc::new(handler), 5)
        .unwrap();
    let runner = JobRunner::new(store.clone(), registry, &SchedulerConfig::default());

    clock.set(t0() + Duration::days(2));
    assert_eq!(runner.poll_once().await, 1);
    assert_eq!(outbox.count(), 1);

    let reopened = JsonTaskRepository::open(&tasks_path).await.unwrap();
    let done = reopened.find(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.last_sent_at, Some(t0() + Duration::days(2)));
}
