//! TaskStore port - タスクの正本（source of truth）
//!
//! # 設計原則
//! - ストレージは role ごとのパーティションに分かれる（ファイル実装では 1 role = 1 ファイル）
//! - read-modify-write は必ずパーティションのロック内で行う（`update` / `update_partition`）
//! - 変更系メソッドは永続化が終わってから Ok を返す
//! - 検証（空タイトルなど）は呼び出し側（app 層）の責務。store は保存だけを担う

use async_trait::async_trait;

use crate::domain::{RelayError, Role, Task, TaskId, TaskStatus};

/// Edit applied to a single task under its partition lock.
///
/// Returning `Err` aborts the edit; nothing is written.
pub type TaskEdit<'a> = dyn Fn(&mut Task) -> Result<(), RelayError> + Send + Sync + 'a;

/// Edit applied to every task of one partition under its lock.
///
/// Returns true for tasks it modified; the store persists the partition only when
/// at least one task changed, in a single write.
pub type PartitionEdit<'a> = dyn Fn(&mut Task) -> bool + Send + Sync + 'a;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task. Fails with `Validation` if the id already exists.
    async fn insert(&self, task: Task) -> Result<(), RelayError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, RelayError>;

    /// Read-modify-write one task. Unknown ids fail with `NotFound`.
    async fn update(&self, id: TaskId, edit: &TaskEdit<'_>) -> Result<Task, RelayError>;

    /// Read-modify-write a whole partition. Returns the tasks the edit changed.
    async fn update_partition(
        &self,
        role: &Role,
        edit: &PartitionEdit<'_>,
    ) -> Result<Vec<Task>, RelayError>;

    /// Tasks of `role` in insertion order. An empty `statuses` slice means all.
    async fn list_by_role(
        &self,
        role: &Role,
        statuses: &[TaskStatus],
    ) -> Result<Vec<Task>, RelayError>;

    /// Every task whose `blocked_by` contains `blocker`, across all partitions.
    async fn dependents_of(&self, blocker: TaskId) -> Result<Vec<Task>, RelayError>;

    /// Roles that currently have at least one task.
    async fn roles(&self) -> Result<Vec<Role>, RelayError>;
}

/// Shared filter so every backend interprets "empty = all" the same way.
pub(crate) fn status_matches(statuses: &[TaskStatus], status: TaskStatus) -> bool {
    statuses.is_empty() || statuses.contains(&status)
}
