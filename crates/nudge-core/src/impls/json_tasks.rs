//! JsonTaskRepository - task を JSON ファイルに保存する実装
//!
//! 表全体をメモリに持ち、変更のたびにファイルへ書き出します（temp file +
//! rename）。書き込みに失敗した変更はメモリからも取り消すので、
//! ファイルとメモリが食い違うことはありません。保存規則は in-memory 版と同じ
//! `TaskTable` です。

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::memory_tasks::TaskTable;
use crate::domain::{RepositoryError, Task, TaskId, UserId};
use crate::ports::TaskRepository;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoredTasksOut<'a> {
    schema_version: u32,
    tasks: Vec<&'a Task>,
}

#[derive(Deserialize)]
struct StoredTasksIn {
    schema_version: u32,
    tasks: Vec<Task>,
}

fn backend(err: impl fmt::Display) -> RepositoryError {
    RepositoryError::Backend(err.to_string())
}

pub struct JsonTaskRepository {
    path: PathBuf,
    table: Mutex<TaskTable>,
}

impl JsonTaskRepository {
    /// Load `path` if it exists; a missing file is an empty repository.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: StoredTasksIn = serde_json::from_slice(&bytes).map_err(backend)?;
                if !(1..=SCHEMA_VERSION).contains(&stored.schema_version) {
                    return Err(RepositoryError::Backend(format!(
                        "{}: unsupported schema_version {}",
                        path.display(),
                        stored.schema_version
                    )));
                }
                TaskTable::from_tasks(stored.tasks)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TaskTable::default(),
            Err(e) => return Err(backend(e)),
        };
        info!(path = %path.display(), tasks = table.len(), "task store opened");
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, table: &TaskTable) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec_pretty(&StoredTasksOut {
            schema_version: SCHEMA_VERSION,
            tasks: table.sorted(),
        })
        .map_err(backend)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(backend)?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(backend)?;

        // destinations are personal data
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, permissions)
                .await
                .map_err(backend)?;
        }

        tokio::fs::rename(&tmp, &self.path).await.map_err(backend)?;
        Ok(())
    }

    /// Write the table, or undo the change to `task_id` and fail.
    async fn commit(
        &self,
        table: &mut TaskTable,
        task_id: TaskId,
        previous: Option<Task>,
    ) -> Result<(), RepositoryError> {
        if let Err(e) = self.write(table).await {
            warn!(path = %self.path.display(), task_id = %task_id, error = %e, "task file write failed, change undone");
            table.restore(task_id, previous);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for JsonTaskRepository {
    async fn find(&self, task_id: TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.table.lock().await.find(task_id))
    }

    async fn insert(&self, task: Task) -> Result<Task, RepositoryError> {
        let mut table = self.table.lock().await;
        let inserted = table.insert(task)?;
        self.commit(&mut table, inserted.id, None).await?;
        Ok(inserted)
    }

    async fn save(&self, task: Task) -> Result<Task, RepositoryError> {
        let mut table = self.table.lock().await;
        let (saved, replaced) = table.save(task)?;
        self.commit(&mut table, saved.id, Some(replaced)).await?;
        Ok(saved)
    }

    async fn delete(&self, task_id: TaskId) -> Result<bool, RepositoryError> {
        let mut table = self.table.lock().await;
        let Some(removed) = table.delete(task_id) else {
            return Ok(false);
        };
        self.commit(&mut table, task_id, Some(removed)).await?;
        Ok(true)
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Task>, RepositoryError> {
        Ok(self.table.lock().await.list_by_owner(owner))
    }
}
