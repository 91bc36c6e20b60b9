//! InMemoryTaskStore / InMemoryDecisionStore - テスト・開発用の正本
//!
//! # 実装詳細
//! - 1 つの tokio Mutex で全パーティションを守る（パーティション単位ロックの上位互換）
//! - role ごとの Vec は挿入順を保つ（同一優先度の FIFO はこの順序に依存する）
//! - プロセス終了で消える

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Decision, DecisionId, DecisionStatus, RelayError, Role, Task, TaskId, TaskStatus};
use crate::ports::task_store::status_matches;
use crate::ports::{DecisionEdit, DecisionStore, PartitionEdit, TaskEdit, TaskStore};

#[derive(Default)]
struct TaskState {
    partitions: BTreeMap<Role, Vec<Task>>,
    index: HashMap<TaskId, Role>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<TaskState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        if state.index.contains_key(&task.id) {
            return Err(RelayError::validation(format!("{} already exists", task.id)));
        }
        state.index.insert(task.id, task.assigned_role.clone());
        state
            .partitions
            .entry(task.assigned_role.clone())
            .or_default()
            .push(task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, RelayError> {
        let state = self.state.lock().await;
        let Some(role) = state.index.get(&id) else {
            return Ok(None);
        };
        Ok(state
            .partitions
            .get(role)
            .and_then(|tasks| tasks.iter().find(|t| t.id == id))
            .cloned())
    }

    async fn update(&self, id: TaskId, edit: &TaskEdit<'_>) -> Result<Task, RelayError> {
        let mut state = self.state.lock().await;
        let role = state
            .index
            .get(&id)
            .cloned()
            .ok_or_else(|| RelayError::task_not_found(id))?;
        let slot = state
            .partitions
            .get_mut(&role)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.id == id))
            .ok_or_else(|| RelayError::task_not_found(id))?;

        // edit a copy so a failed edit leaves the stored record untouched
        let mut draft = slot.clone();
        edit(&mut draft)?;
        *slot = draft.clone();
        Ok(draft)
    }

    async fn update_partition(
        &self,
        role: &Role,
        edit: &PartitionEdit<'_>,
    ) -> Result<Vec<Task>, RelayError> {
        let mut state = self.state.lock().await;
        let Some(tasks) = state.partitions.get_mut(role) else {
            return Ok(Vec::new());
        };
        let mut changed = Vec::new();
        for task in tasks.iter_mut() {
            if edit(task) {
                changed.push(task.clone());
            }
        }
        Ok(changed)
    }

    async fn list_by_role(
        &self,
        role: &Role,
        statuses: &[TaskStatus],
    ) -> Result<Vec<Task>, RelayError> {
        let state = self.state.lock().await;
        Ok(state
            .partitions
            .get(role)
            .map(|tasks| {
                tasks
                    .iter()
                    .filter(|t| status_matches(statuses, t.status))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn dependents_of(&self, blocker: TaskId) -> Result<Vec<Task>, RelayError> {
        let state = self.state.lock().await;
        Ok(state
            .partitions
            .values()
            .flatten()
            .filter(|t| t.is_waiting_on(blocker))
            .cloned()
            .collect())
    }

    async fn roles(&self) -> Result<Vec<Role>, RelayError> {
        let state = self.state.lock().await;
        Ok(state.partitions.keys().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryDecisionStore {
    decisions: Mutex<Vec<Decision>>,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn insert(&self, decision: Decision) -> Result<(), RelayError> {
        let mut decisions = self.decisions.lock().await;
        if decisions.iter().any(|d| d.id == decision.id) {
            return Err(RelayError::validation(format!("{} already exists", decision.id)));
        }
        decisions.push(decision);
        Ok(())
    }

    async fn get(&self, id: DecisionId) -> Result<Option<Decision>, RelayError> {
        let decisions = self.decisions.lock().await;
        Ok(decisions.iter().find(|d| d.id == id).cloned())
    }

    async fn update(
        &self,
        id: DecisionId,
        edit: &DecisionEdit<'_>,
    ) -> Result<Decision, RelayError> {
        let mut decisions = self.decisions.lock().await;
        let slot = decisions
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| RelayError::decision_not_found(id))?;
        let mut draft = slot.clone();
        edit(&mut draft)?;
        *slot = draft.clone();
        Ok(draft)
    }

    async fn list(&self, status: Option<DecisionStatus>) -> Result<Vec<Decision>, RelayError> {
        let decisions = self.decisions.lock().await;
        Ok(decisions
            .iter()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .cloned()
            .collect())
    }
}
