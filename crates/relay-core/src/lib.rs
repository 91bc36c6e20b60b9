//! relay-core
//!
//! Task orchestration engine: task lifecycle, dependency resolution, per-role
//! priority queues, escalation decisions and a circuit-breaking execution gateway.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, priority, decision, result, errors, events）
//! - **ports**: 抽象化レイヤー（TaskStore, DecisionStore, ExecutionTransport, Clock, IdGenerator）
//! - **impls**: ports の実装（インメモリ / JSON ファイル / HTTP / モック）
//! - **app**: アプリケーションロジック（Orchestrator とその構成要素）
//! - **config**: TOML + 環境変数による設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{Orchestrator, OrchestratorBuilder};
pub use config::RelayConfig;
pub use domain::{RelayError, Task, TaskId, TaskSpec, TaskStatus};
