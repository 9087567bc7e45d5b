//! Domain model (IDs, tasks, offsets, job kinds, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod offset;
pub mod task;

pub use errors::{
    ConfigError, DeliveryError, HandlerError, PlanError, RegistryError, RepositoryError,
    SchedulingError, StoreError,
};
pub use ids::{JobId, LeaseId, TaskId, UserId};
pub use job::{JobKind, REMINDER_KIND, RunOutcome};
pub use offset::OffsetToken;
pub use task::{RecurrenceMode, Task, TaskStatus, User};
