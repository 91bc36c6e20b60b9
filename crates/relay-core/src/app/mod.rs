//! App - アプリケーション層
//!
//! ports を組み合わせてエンジンのロジックを実装する。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: エンジンの構築とワイヤリング（Fail-fast）
//! - **Orchestrator**: すべての操作の入口
//! - **DependencyResolver**: 完了時の依存解除
//! - **RoleQueueView**: role ごとの優先度付きキュー
//! - **EscalationWorkflow**: 決裁の状態機械
//! - **ExecutionGateway**: 実行サービスへのサーキットブレーカー

pub mod builder;
pub mod engine;
pub mod escalation;
pub mod gateway;
pub mod resolver;
pub mod role_queue;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::engine::{Completion, Dispatched, Orchestrator};
pub use self::escalation::EscalationWorkflow;
pub use self::gateway::{
    DispatchClaim, DispatchMode, DispatchReceipt, ExecutionGateway, GatewaySettings, GatewayStatus,
    HealthProbe, ReplayReport, StagedEntry,
};
pub use self::resolver::{CascadePolicy, DependencyResolver};
pub use self::role_queue::{QueueCounts, RoleQueue, RoleQueueView};
pub use self::status::{EngineStatus, RoleSummary};
