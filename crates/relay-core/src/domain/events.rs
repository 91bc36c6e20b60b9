//! Events - ドメインイベント
//!
//! Orchestrator が broadcast channel で配信する。購読者がいなくても送信は失敗扱いにしない。

use serde::Serialize;

use super::decision::DecisionStatus;
use super::ids::{DecisionId, TaskId};
use super::state::TaskStatus;
use super::task::Role;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    TaskCreated {
        task_id: TaskId,
        role: Role,
        status: TaskStatus,
    },
    TaskStatusChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// Tasks that moved from `blocked` to `pending` after `completed` finished.
    TasksUnblocked {
        completed: TaskId,
        unblocked: Vec<TaskId>,
    },
    TaskDispatched {
        task_id: TaskId,
        live: bool,
        position: Option<usize>,
    },
    DecisionOpened {
        decision_id: DecisionId,
    },
    DecisionResolved {
        decision_id: DecisionId,
        status: DecisionStatus,
    },
}
