//! nudge-core
//!
//! Core building blocks for the nudge reminder scheduler.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, offset, job kind, errors）
//! - **planner**: 次の送信時刻の計算（純粋関数）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, TaskRepository, MessagingGateway）
//! - **queue**: job store（claim / lease / retry、in-memory + snapshot 実装）
//! - **app**: runner, reminder handler, task scheduler
//! - **impls**: 開発用の in-memory 実装
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod planner;
pub mod ports;
pub mod queue;

pub use config::SchedulerConfig;
