//! DecisionStore port - エスカレーション記録の保存先
//!
//! Decision は監査ログなので削除操作は持たない。

use async_trait::async_trait;

use crate::domain::{Decision, DecisionId, DecisionStatus, RelayError};

/// Edit applied under the store lock. `Err` aborts without writing.
pub type DecisionEdit<'a> = dyn Fn(&mut Decision) -> Result<(), RelayError> + Send + Sync + 'a;

#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn insert(&self, decision: Decision) -> Result<(), RelayError>;

    async fn get(&self, id: DecisionId) -> Result<Option<Decision>, RelayError>;

    /// Unknown ids fail with `NotFound`.
    async fn update(
        &self,
        id: DecisionId,
        edit: &DecisionEdit<'_>,
    ) -> Result<Decision, RelayError>;

    /// Decisions in creation order; `None` lists every status.
    async fn list(&self, status: Option<DecisionStatus>) -> Result<Vec<Decision>, RelayError>;
}
