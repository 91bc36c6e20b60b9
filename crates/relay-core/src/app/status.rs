//! Status - エンジン全体の状態スナップショット
//!
//! `GET /health` と `relay status` が返す内容。

use serde::Serialize;

use super::gateway::GatewayStatus;
use super::resolver::CascadePolicy;
use super::role_queue::QueueCounts;
use crate::domain::Role;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleSummary {
    pub role: Role,
    pub counts: QueueCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub gateway: GatewayStatus,
    pub cascade: CascadePolicy,
    pub roles: Vec<RoleSummary>,
    pub pending_decisions: usize,
}

impl EngineStatus {
    /// Tasks waiting for a worker across every role (pending + queued).
    pub fn backlog(&self) -> usize {
        self.roles
            .iter()
            .map(|r| r.counts.pending + r.counts.queued)
            .sum()
    }
}
