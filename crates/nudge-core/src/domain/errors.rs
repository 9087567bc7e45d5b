//! Errors - レイヤーごとのエラー型
//!
//! - `PlanError`: planner / offset 解決（永続化の前に同期的に返す）
//! - `StoreError`: job store
//! - `RepositoryError`: task repository
//! - `DeliveryError`: messaging gateway（handler 内で回収される）
//! - `HandlerError`: handler から runner へ返る失敗
//! - `SchedulingError`: task 作成・編集・停止の拒否理由

use thiserror::Error;

use super::ids::{JobId, TaskId};
use super::task::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("invalid reminder offset '{0}' (expected 3h, 1d or 3d)")]
    InvalidOffset(String),

    #[error("no upcoming reminder before the end date")]
    NoUpcomingOccurrence,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The caller's lease is no longer the current claim on the job.
    #[error("lease on {0} is no longer held by this worker")]
    LeaseLost(JobId),

    #[error("job store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("job store serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already exists: {0}")]
    Duplicate(TaskId),

    #[error("task {task_id} changed concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        task_id: TaskId,
        expected: u64,
        found: u64,
    },

    #[error("task {task_id} is {status} and cannot return to pending")]
    TerminalStatus { task_id: TaskId, status: TaskStatus },

    #[error("task repository: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The gateway answered but refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The gateway could not be reached.
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("payload decode: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("invalid task: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {0} is already {1}")]
    AlreadyFinished(TaskId, TaskStatus),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("handler for job kind '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("concurrency for job kind '{0}' must be at least 1")]
    ZeroConcurrency(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
