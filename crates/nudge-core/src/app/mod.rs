//! App - アプリケーション層
//!
//! ports と job store を組み合わせて、reminder の一連の流れを実装します。
//!
//! # 主要コンポーネント
//! - **HandlerRegistry**: job kind → handler + 並列度（runner に明示的に渡す）
//! - **JobRunner**: poll → claim → handle → release のループ
//! - **ReminderHandler**: 送信して task を進める / 完了させる
//! - **TaskScheduler**: task の作成・編集・停止・削除（API 層の入口）

pub mod registry;
pub mod reminder;
pub mod runner;
pub mod scheduling;

pub use self::registry::{HandlerRegistry, JobHandler};
pub use self::reminder::{ReminderHandler, ReminderPayload, render_message};
pub use self::runner::{JobRunner, RunnerHandle};
pub use self::scheduling::{NewTask, TaskEdit, TaskScheduler};
