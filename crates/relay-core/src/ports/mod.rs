//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部（ファイルシステム、
//! 実行サービス、時計）へのインターフェースで、実装の詳細は impls に置く。

pub mod clock;
pub mod decision_store;
pub mod id_generator;
pub mod task_store;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::decision_store::{DecisionEdit, DecisionStore};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{PartitionEdit, TaskEdit, TaskStore};
pub use self::transport::{DispatchAck, ExecutionTransport, TransportError};
