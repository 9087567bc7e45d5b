//! Ports - 抽象化レイヤー
//!
//! core が外部に依存する箇所（時刻、ID、task 永続化、メッセージ配送）を
//! trait として定義します。job store の trait は `queue` にあります。

pub mod clock;
pub mod id_generator;
pub mod messaging;
pub mod task_repository;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::messaging::MessagingGateway;
pub use self::task_repository::{TaskRepository, UserDirectory};
