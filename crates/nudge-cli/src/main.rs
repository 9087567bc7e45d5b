//! CLI binary for nudge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nudge_core::app::{HandlerRegistry, JobRunner, NewTask, ReminderHandler, TaskScheduler};
use nudge_core::domain::{DeliveryError, JobKind, OffsetToken, RecurrenceMode, User, UserId};
use nudge_core::impls::{InMemoryTaskRepository, InMemoryUserDirectory, JsonTaskRepository};
use nudge_core::planner::compute_initial_fire_time;
use nudge_core::ports::{Clock, IdGenerator, MessagingGateway, SystemClock, TaskRepository, UlidGenerator};
use nudge_core::queue::InMemoryJobStore;
use nudge_core::SchedulerConfig;

/// Owner of every task created from the command line. Fixed so that tasks
/// reloaded from the task file still resolve to a user.
const LOCAL_USER: &str = "user-00000000000000000000000000";

/// nudge: deadline reminders, once or every week.
#[derive(Parser)]
#[command(name = "nudge", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schedule a reminder and run until it has fired for the last time.
    ///
    /// Example: nudge remind --name "Pay rent" --deadline 2025-07-01T09:00:00Z --offset 1d
    Remind {
        #[command(flatten)]
        task: TaskArgs,

        /// Where the message goes (logged; no real transport is wired in).
        #[arg(long, default_value = "stdout")]
        to: String,
    },

    /// Run reminders saved by earlier `remind` runs until Ctrl-C.
    ///
    /// Needs `snapshot_path` (and optionally `tasks_path`) in the config.
    Run {
        /// Where the messages go (logged; no real transport is wired in).
        #[arg(long, default_value = "stdout")]
        to: String,
    },

    /// Show when a reminder would first fire, without scheduling it.
    Plan {
        #[command(flatten)]
        task: TaskArgs,
    },

    /// Print the effective configuration.
    Config,
}

#[derive(clap::Args)]
struct TaskArgs {
    #[arg(long)]
    name: String,

    /// RFC 3339, e.g. 2025-07-01T09:00:00+09:00
    #[arg(long)]
    deadline: DateTime<Utc>,

    /// 3h, 1d or 3d (also short, medium, long).
    #[arg(long, default_value = "1d")]
    offset: OffsetToken,

    /// Repeat every 7 days until --end-date.
    #[arg(long, requires = "end_date")]
    weekly: bool,

    #[arg(long)]
    end_date: Option<DateTime<Utc>>,
}

impl TaskArgs {
    fn recurrence(&self) -> RecurrenceMode {
        if self.weekly {
            RecurrenceMode::Periodic
        } else {
            RecurrenceMode::Single
        }
    }
}

/// Writes messages to the log instead of a messaging service.
struct LogGateway;

#[async_trait]
impl MessagingGateway for LogGateway {
    async fn send(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
        info!(to = %destination, "\n{text}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SchedulerConfig::default(),
    };

    match cli.command {
        Command::Remind { task, to } => remind(config, task, to).await,
        Command::Run { to } => run(config, to).await,
        Command::Plan { task } => plan(task),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn plan(args: TaskArgs) -> anyhow::Result<()> {
    let now = SystemClock.now();
    let plan = compute_initial_fire_time(
        now,
        args.deadline,
        args.offset,
        args.recurrence(),
        args.end_date,
    );
    let out = match plan {
        Some(plan) => serde_json::json!({
            "name": args.name,
            "deadline": plan.deadline,
            "fire_at": plan.fire_at,
        }),
        None => serde_json::json!({
            "name": args.name,
            "error": "no upcoming reminder before the end date",
        }),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Everything `remind` and `run` share.
struct Wiring {
    tasks: Arc<dyn TaskRepository>,
    scheduler: TaskScheduler,
    runner: JobRunner,
    owner: UserId,
}

async fn wire(config: &SchedulerConfig, to: String) -> anyhow::Result<Wiring> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));

    let store = match &config.snapshot_path {
        Some(path) => InMemoryJobStore::open(path, clock.clone(), ids.clone())
            .await
            .with_context(|| format!("opening job snapshot {}", path.display()))?,
        None => InMemoryJobStore::new(clock.clone(), ids.clone()),
    };
    let store = Arc::new(
        store
            .with_retry_policy(config.retry.policy())
            .with_retention(config.job_retention()),
    );

    let tasks: Arc<dyn TaskRepository> = match config.task_store_path() {
        Some(path) => {
            let repo = JsonTaskRepository::open(&path)
                .await
                .with_context(|| format!("opening task file {}", path.display()))?;
            info!(path = %repo.path().display(), "tasks are kept on disk");
            Arc::new(repo)
        }
        None => Arc::new(InMemoryTaskRepository::new()),
    };

    let owner: UserId = LOCAL_USER.parse().context("local user id")?;
    let users = Arc::new(InMemoryUserDirectory::new());
    users
        .insert(User {
            id: owner,
            name: "cli".to_string(),
            destination: to,
        })
        .await;

    let handler = ReminderHandler::new(
        tasks.clone(),
        users,
        Arc::new(LogGateway),
        store.clone(),
        clock.clone(),
    )
    .with_display_offset(config.display_offset()?);

    let mut registry = HandlerRegistry::new();
    registry.register(JobKind::reminder(), Arc::new(handler), config.default_concurrency)?;

    Ok(Wiring {
        scheduler: TaskScheduler::new(tasks.clone(), store.clone(), clock, ids),
        runner: JobRunner::new(store, registry, config),
        tasks,
        owner,
    })
}

async fn run(config: SchedulerConfig, to: String) -> anyhow::Result<()> {
    if config.snapshot_path.is_none() {
        anyhow::bail!("`run` needs snapshot_path in the config; nothing would be loaded");
    }
    let wiring = wire(&config, to).await?;
    let pending = wiring
        .scheduler
        .list_tasks(wiring.owner, false)
        .await?
        .into_iter()
        .filter(|t| t.is_pending())
        .count();
    info!(pending, "running stored reminders; Ctrl-C to stop");

    let runner = wiring.runner.spawn();
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
    }
    info!("interrupted");
    runner.shutdown_and_join().await;
    Ok(())
}

async fn remind(config: SchedulerConfig, args: TaskArgs, to: String) -> anyhow::Result<()> {
    let Wiring {
        tasks,
        scheduler,
        runner,
        owner,
    } = wire(&config, to).await?;

    let recurrence = args.recurrence();
    let task = scheduler
        .create_task(NewTask {
            owner,
            name: args.name,
            deadline: args.deadline,
            recurrence,
            offset: args.offset,
            end_date: args.end_date,
        })
        .await?;
    info!(
        task_id = %task.id,
        deadline = %task.deadline,
        ?recurrence,
        "reminder scheduled; Ctrl-C to stop"
    );

    let runner = runner.spawn();

    let mut check = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                }
                info!("interrupted");
                break;
            }
            _ = check.tick() => {
                let Some(current) = tasks.find(task.id).await? else {
                    break;
                };
                if !current.is_pending() {
                    info!(task_id = %current.id, status = %current.status, "task finished");
                    break;
                }
                if current.current_job.is_none() {
                    warn!(task_id = %current.id, "reminder could not be delivered");
                    break;
                }
            }
        }
    }

    runner.shutdown_and_join().await;
    Ok(())
}
