//! Job kind and run outcome shared by the store, the runner and handlers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Names the kind of work a job performs; handlers are registered per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The single kind used by this system.
    pub fn reminder() -> Self {
        Self::new(REMINDER_KIND)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub const REMINDER_KIND: &str = "send_reminder";

/// Result of one handler run, reported back to the store on release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Success,
    Failure(String),
}

impl RunOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        RunOutcome::Failure(reason.into())
    }
}
