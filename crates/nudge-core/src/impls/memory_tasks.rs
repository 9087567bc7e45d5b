//! InMemoryTaskRepository / InMemoryUserDirectory - 開発用・テスト用
//!
//! task の正本を HashMap に持ちます。save は version を比較してから置換し、
//! 成功したら version を 1 進めます。保存規則は `TaskTable` にまとめてあり、
//! ファイル版（`JsonTaskRepository`）も同じものを使います。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{RepositoryError, Task, TaskId, User, UserId};
use crate::ports::{TaskRepository, UserDirectory};

/// Task table with the repository rules (version check, terminal guard).
#[derive(Debug, Default, Clone)]
pub(crate) struct TaskTable {
    tasks: HashMap<TaskId, Task>,
}

impl TaskTable {
    pub(crate) fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.id, t)).collect(),
        }
    }

    /// All tasks, oldest id first.
    pub(crate) fn sorted(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn find(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.get(&task_id).cloned()
    }

    pub(crate) fn insert(&mut self, mut task: Task) -> Result<Task, RepositoryError> {
        if self.tasks.contains_key(&task.id) {
            return Err(RepositoryError::Duplicate(task.id));
        }
        task.version = 1;
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    /// Returns the saved task and the one it replaced.
    pub(crate) fn save(&mut self, mut task: Task) -> Result<(Task, Task), RepositoryError> {
        let stored = self
            .tasks
            .get(&task.id)
            .ok_or(RepositoryError::NotFound(task.id))?;

        if stored.version != task.version {
            return Err(RepositoryError::VersionConflict {
                task_id: task.id,
                expected: task.version,
                found: stored.version,
            });
        }
        if !stored.status.can_become(task.status) {
            return Err(RepositoryError::TerminalStatus {
                task_id: task.id,
                status: stored.status,
            });
        }

        task.version += 1;
        let replaced = self
            .tasks
            .insert(task.id, task.clone())
            .ok_or(RepositoryError::NotFound(task.id))?;
        Ok((task, replaced))
    }

    pub(crate) fn delete(&mut self, task_id: TaskId) -> Option<Task> {
        self.tasks.remove(&task_id)
    }

    /// Put back what a failed write changed.
    pub(crate) fn restore(&mut self, task_id: TaskId, previous: Option<Task>) {
        match previous {
            Some(task) => {
                self.tasks.insert(task_id, task);
            }
            None => {
                self.tasks.remove(&task_id);
            }
        }
    }

    pub(crate) fn list_by_owner(&self, owner: UserId) -> Vec<Task> {
        let mut owned: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        owned
    }
}

#[derive(Default, Clone)]
pub struct InMemoryTaskRepository {
    table: Arc<Mutex<TaskTable>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn find(&self, task_id: TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.table.lock().await.find(task_id))
    }

    async fn insert(&self, task: Task) -> Result<Task, RepositoryError> {
        self.table.lock().await.insert(task)
    }

    async fn save(&self, task: Task) -> Result<Task, RepositoryError> {
        let (saved, _) = self.table.lock().await.save(task)?;
        Ok(saved)
    }

    async fn delete(&self, task_id: TaskId) -> Result<bool, RepositoryError> {
        Ok(self.table.lock().await.delete(task_id).is_some())
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Task>, RepositoryError> {
        Ok(self.table.lock().await.list_by_owner(owner))
    }
}

#[derive(Default, Clone)]
pub struct InMemoryUserDirectory {
    users: Arc<Mutex<HashMap<UserId, User>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users.lock().await.insert(user.id, user);
    }

    pub async fn remove(&self, user_id: UserId) -> Option<User> {
        self.users.lock().await.remove(&user_id)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.lock().await.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::domain::{OffsetToken, RecurrenceMode, TaskStatus};

    fn task(owner: UserId, minutes: i64) -> Task {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        Task {
            id: TaskId::generate(),
            owner,
            name: format!("task {minutes}"),
            deadline: at + Duration::days(5),
            end_date: None,
            recurrence: RecurrenceMode::Single,
            offset: OffsetToken::Long,
            status: TaskStatus::Pending,
            current_job: None,
            last_sent_at: None,
            version: 0,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn save_bumps_version_and_rejects_stale_copies() {
        let repo = InMemoryTaskRepository::new();
        let stored = repo.insert(task(UserId::generate(), 0)).await.unwrap();
        assert_eq!(stored.version, 1);

        let stale = stored.clone();
        let mut fresh = stored;
        fresh.name = "renamed".into();
        let saved = repo.save(fresh).await.unwrap();
        assert_eq!(saved.version, 2);

        let err = repo.save(stale).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::VersionConflict { expected: 1, found: 2, .. }
        ));
    }

    #[tokio::test]
    async fn terminal_status_cannot_return_to_pending() {
        let repo = InMemoryTaskRepository::new();
        let mut t = repo.insert(task(UserId::generate(), 0)).await.unwrap();
        t.mark_stopped(t.updated_at);
        let mut t = repo.save(t).await.unwrap();

        t.status = TaskStatus::Pending;
        let err = repo.save(t.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::TerminalStatus { status: TaskStatus::Stopped, .. }
        ));

        t.status = TaskStatus::Completed;
        assert!(repo.save(t).await.is_err());
    }

    #[tokio::test]
    async fn insert_twice_is_duplicate_and_missing_save_is_not_found() {
        let repo = InMemoryTaskRepository::new();
        let t = task(UserId::generate(), 0);
        repo.insert(t.clone()).await.unwrap();
        assert_eq!(
            repo.insert(t.clone()).await.unwrap_err(),
            RepositoryError::Duplicate(t.id)
        );

        let other = task(UserId::generate(), 1);
        assert_eq!(
            repo.save(other.clone()).await.unwrap_err(),
            RepositoryError::NotFound(other.id)
        );
    }

    #[tokio::test]
    async fn list_is_per_owner_newest_first() {
        let repo = InMemoryTaskRepository::new();
        let alice = UserId::generate();
        let bob = UserId::generate();
        let old = repo.insert(task(alice, 0)).await.unwrap();
        let new = repo.insert(task(alice, 10)).await.unwrap();
        repo.insert(task(bob, 5)).await.unwrap();

        let listed: Vec<TaskId> = repo
            .list_by_owner(alice)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(listed, vec![new.id, old.id]);

        assert!(repo.delete(old.id).await.unwrap());
        assert!(!repo.delete(old.id).await.unwrap());
        assert_eq!(repo.list_by_owner(alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_directory_lookup() {
        let users = InMemoryUserDirectory::new();
        let user = User {
            id: UserId::generate(),
            name: "alice".into(),
            destination: "+10000000000".into(),
        };
        users.insert(user.clone()).await;
        assert_eq!(users.find_user(user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(users.remove(user.id).await, Some(user.clone()));
        assert_eq!(users.find_user(user.id).await.unwrap(), None);
    }
}
