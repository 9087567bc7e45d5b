//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: Clock の時刻 + 乱数で ULID を作る

use std::sync::Arc;

use rand::Rng;
use ulid::Ulid;

use crate::domain::ids::{Id, IdMarker, JobId, LeaseId, TaskId};
use crate::ports::Clock;

/// IdGenerator は分散環境で衝突しない ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（store・scheduler・runner で共有する）
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_task_id(&self) -> TaskId;

    fn generate_lease_id(&self) -> LeaseId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から取るので、FixedClock を渡せば
/// テストでも時刻順が再現できます。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let random: u128 = rand::thread_rng().r#gen();
        Id::from_ulid(Ulid::from_parts(timestamp_ms, random))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        self.next()
    }

    fn generate_task_id(&self) -> TaskId {
        self.next()
    }

    fn generate_lease_id(&self) -> LeaseId {
        self.next()
    }
}

impl<G: IdGenerator + ?Sized> IdGenerator for Arc<G> {
    fn generate_job_id(&self) -> JobId {
        (**self).generate_job_id()
    }

    fn generate_task_id(&self) -> TaskId {
        (**self).generate_task_id()
    }

    fn generate_lease_id(&self) -> LeaseId {
        (**self).generate_lease_id()
    }
}
