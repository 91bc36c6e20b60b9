//! Role Queue View - role ごとの作業キュー（読み取り専用）
//!
//! # 並び順
//! - 優先度の高い順、同一優先度内は created_at の古い順
//! - created_at も同じならストアの挿入順（安定ソート）
//!
//! blocked も表示はするが、dispatch 対象にはならない。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{RelayError, Role, Task, TaskStatus};
use crate::ports::TaskStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleQueue {
    pub role: Role,
    pub active: Vec<Task>,
    pub queued: Vec<Task>,
    pub blocked: Vec<Task>,
}

/// Per-status task counts for one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub queued: usize,
    pub active: usize,
    pub blocked: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    fn bump(&mut self, status: TaskStatus) {
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Queued => &mut self.queued,
            TaskStatus::Active => &mut self.active,
            TaskStatus::Blocked => &mut self.blocked,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.queued
            + self.active
            + self.blocked
            + self.completed
            + self.failed
            + self.cancelled
    }
}

/// Priority descending, then creation time ascending. Stable.
pub fn sort_for_queue(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

pub struct RoleQueueView {
    tasks: Arc<dyn TaskStore>,
}

impl RoleQueueView {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    pub async fn queue_for(&self, role: &Role) -> Result<RoleQueue, RelayError> {
        let tasks = self
            .tasks
            .list_by_role(
                role,
                &[TaskStatus::Active, TaskStatus::Queued, TaskStatus::Blocked],
            )
            .await?;

        let mut queue = RoleQueue {
            role: role.clone(),
            active: Vec::new(),
            queued: Vec::new(),
            blocked: Vec::new(),
        };
        for task in tasks {
            match task.status {
                TaskStatus::Active => queue.active.push(task),
                TaskStatus::Queued => queue.queued.push(task),
                TaskStatus::Blocked => queue.blocked.push(task),
                _ => {}
            }
        }
        sort_for_queue(&mut queue.active);
        sort_for_queue(&mut queue.queued);
        sort_for_queue(&mut queue.blocked);
        Ok(queue)
    }

    /// Highest-priority dispatchable task: `queued` first, then `pending`.
    pub async fn next_for(&self, role: &Role) -> Result<Option<Task>, RelayError> {
        match self.first_with(role, TaskStatus::Queued).await? {
            Some(task) => Ok(Some(task)),
            None => self.first_with(role, TaskStatus::Pending).await,
        }
    }

    /// Highest-priority task not yet handed to the gateway.
    pub async fn next_pending(&self, role: &Role) -> Result<Option<Task>, RelayError> {
        self.first_with(role, TaskStatus::Pending).await
    }

    async fn first_with(&self, role: &Role, status: TaskStatus) -> Result<Option<Task>, RelayError> {
        let mut tasks = self.tasks.list_by_role(role, &[status]).await?;
        sort_for_queue(&mut tasks);
        Ok(tasks.into_iter().next())
    }

    pub async fn counts(&self, role: &Role) -> Result<QueueCounts, RelayError> {
        let mut counts = QueueCounts::default();
        for task in self.tasks.list_by_role(role, &[]).await? {
            counts.bump(task.status);
        }
        Ok(counts)
    }
}
