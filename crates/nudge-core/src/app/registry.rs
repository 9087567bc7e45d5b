//! HandlerRegistry - job kind ごとの handler と並列度
//!
//! 起動時に組み立て（mutable）、runner に渡した後は読み取り専用です。
//! ロック不要でシンプルに保つため、実行中の登録はサポートしません。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{HandlerError, JobKind, RegistryError};
use crate::queue::JobRecord;

/// A handler for one job kind.
///
/// Returning `Err` reports the run as failed; the job store then decides
/// between retry and final failure.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord) -> Result<(), HandlerError>;

    /// Called once when the store gives up on a job (retries exhausted or
    /// disabled). The default does nothing.
    async fn on_exhausted(&self, _job: &JobRecord) -> Result<(), HandlerError> {
        Ok(())
    }
}

pub(crate) struct Registration {
    pub(crate) handler: Arc<dyn JobHandler>,
    pub(crate) concurrency: usize,
}

/// Registry of handlers (job kind -> handler + per-kind concurrency).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler that may run at most `concurrency` jobs at once.
    pub fn register(
        &mut self,
        kind: JobKind,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> Result<(), RegistryError> {
        if concurrency == 0 {
            return Err(RegistryError::ZeroConcurrency(kind.to_string()));
        }
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateHandler(kind.to_string()));
        }
        self.handlers.insert(
            kind,
            Registration {
                handler,
                concurrency,
            },
        );
        Ok(())
    }

    pub fn get(&self, kind: &JobKind) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(kind).map(|r| &r.handler)
    }

    pub fn concurrency(&self, kind: &JobKind) -> Option<usize> {
        self.handlers.get(kind).map(|r| r.concurrency)
    }

    pub(crate) fn registrations(&self) -> impl Iterator<Item = (&JobKind, &Registration)> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
