//! Impls - 実装
//!
//! # 含まれる実装
//! - **InMemoryTaskRepository**: task の正本（version による楽観ロック付き）
//! - **JsonTaskRepository**: 同じ規則で JSON ファイルに保存する版
//! - **InMemoryUserDirectory**: 宛先解決
//!
//! job store の実装は `queue::InMemoryJobStore` にあります。

pub mod json_tasks;
pub mod memory_tasks;

pub use self::json_tasks::JsonTaskRepository;
pub use self::memory_tasks::{InMemoryTaskRepository, InMemoryUserDirectory};
