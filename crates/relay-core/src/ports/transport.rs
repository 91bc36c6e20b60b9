//! ExecutionTransport port - 外部実行サービスへの経路
//!
//! # 実装
//! - HttpTransport: 本番用（reqwest）
//! - MockTransport: テスト・デモ用（可用性と遅延をスクリプトで制御）
//!
//! ゲートウェイ側のロジック（サーキットブレーカー・ローカル退避）は 1 つだけで、
//! 実装はこの 2 メソッドを提供するだけ。タイムアウトはゲートウェイが掛ける。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Task;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("execution service answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("execution service refused the task: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Acknowledgement returned by the execution service's dispatch endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAck {
    pub accepted: bool,

    /// Position in the remote queue (1-based), when the service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

#[async_trait]
pub trait ExecutionTransport: Send + Sync {
    async fn dispatch(&self, task: &Task) -> Result<DispatchAck, TransportError>;

    /// Ok means the service is live.
    async fn health_check(&self) -> Result<(), TransportError>;

    /// Short label for logs ("http", "mock").
    fn name(&self) -> &'static str;
}
