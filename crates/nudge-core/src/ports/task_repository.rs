//! TaskRepository / UserDirectory port - task と user の永続化
//!
//! task の正本（source of truth）はここにあります。job store とは別物で、
//! 両者を同一トランザクションで更新することはありません。
//!
//! # 設計原則
//! - save は全置換（full-document replace）
//! - `Task::version` による楽観ロック: 読んだ時点の version と違えば
//!   `RepositoryError::VersionConflict`
//! - 終端状態（completed / stopped）から pending へ戻す save は拒否

use async_trait::async_trait;

use crate::domain::{RepositoryError, Task, TaskId, User, UserId};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find(&self, task_id: TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Insert a new task. Returns it with its stored version.
    async fn insert(&self, task: Task) -> Result<Task, RepositoryError>;

    /// Replace the stored task if its version still equals `task.version`.
    /// Returns the task with the bumped version.
    async fn save(&self, task: Task) -> Result<Task, RepositoryError>;

    /// Returns whether a task was removed.
    async fn delete(&self, task_id: TaskId) -> Result<bool, RepositoryError>;

    /// Newest first.
    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Task>, RepositoryError>;
}

/// user は外部の data model。ここでは宛先の解決だけを行う。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, RepositoryError>;
}
