//! Orchestrator - エンジンの表面
//!
//! ストア・リゾルバ・キュービュー・決裁ワークフロー・ゲートウェイを 1 つの
//! インスタンスが所有する。グローバルな状態は持たない。
//!
//! # 不変条件
//! - 変更系はストアの永続化が終わってからイベントを流す
//! - `complete` は状態更新と依存解決を 1 呼び出しで行う（解決は更新成功後）
//! - `dispatch` はゲートウェイの claim → ストア上で `pending → queued` → 送信の順。
//!   送信されるのは常にストアに書いた後のレコード

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use super::escalation::EscalationWorkflow;
use super::gateway::{
    DispatchReceipt, ExecutionGateway, GatewayStatus, HealthProbe, ReplayReport, StagedEntry,
};
use super::resolver::DependencyResolver;
use super::role_queue::{QueueCounts, RoleQueue, RoleQueueView};
use super::status::{EngineStatus, RoleSummary};
use crate::domain::{
    Decision, DecisionChoice, DecisionId, DecisionRequest, DecisionStatus, DomainEvent,
    RelayError, Role, StatusUpdate, Task, TaskId, TaskResult, TaskSpec, TaskStatus,
};
use crate::ports::{Clock, IdGenerator, TaskStore};

/// Result of `complete`: the finished task and whatever it released.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub task: Task,
    pub unblocked: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatched {
    pub task: Task,
    #[serde(flatten)]
    pub receipt: DispatchReceipt,
}

pub struct Orchestrator {
    pub(crate) tasks: Arc<dyn TaskStore>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) resolver: DependencyResolver,
    pub(crate) queues: RoleQueueView,
    pub(crate) escalation: EscalationWorkflow,
    pub(crate) gateway: Arc<ExecutionGateway>,
    pub(crate) events: broadcast::Sender<DomainEvent>,
}

impl Orchestrator {
    // ---- tasks ----

    pub async fn create_task(&self, spec: TaskSpec) -> Result<Task, RelayError> {
        let role = spec.validate()?;
        let id = self.ids.generate_task_id();

        let mut blocked_by = BTreeSet::new();
        for dep in &spec.dependencies {
            if *dep == id {
                return Err(RelayError::validation("a task cannot depend on itself"));
            }
            let blocker = self.tasks.get(*dep).await?.ok_or_else(|| {
                RelayError::validation(format!("unknown dependency {dep}"))
            })?;
            // already satisfied
            if blocker.status != TaskStatus::Completed {
                blocked_by.insert(*dep);
            }
        }

        let task = Task::new(id, spec, role, blocked_by, self.clock.now());
        self.tasks.insert(task.clone()).await?;

        info!(
            task_id = %task.id,
            role = %task.assigned_role,
            status = %task.status,
            priority = task.priority.weight(),
            "task created"
        );
        self.emit(DomainEvent::TaskCreated {
            task_id: task.id,
            role: task.assigned_role.clone(),
            status: task.status,
        });
        Ok(task)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, RelayError> {
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| RelayError::task_not_found(id))
    }

    pub async fn update_status(
        &self,
        id: TaskId,
        update: StatusUpdate,
    ) -> Result<Task, RelayError> {
        let now = self.clock.now();
        let previous = Mutex::new(None);

        let task = self
            .tasks
            .update(id, &|task: &mut Task| {
                let from = task.status;
                if task.apply_status(&update, now)? {
                    *previous
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(from);
                }
                Ok(())
            })
            .await?;

        self.record_transition(&task, previous);
        Ok(task)
    }

    fn record_transition(&self, task: &Task, previous: Mutex<Option<TaskStatus>>) {
        let previous = previous
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(from) = previous
            && from != task.status
        {
            info!(task_id = %task.id, %from, to = %task.status, "task status changed");
            self.emit(DomainEvent::TaskStatusChanged {
                task_id: task.id,
                from,
                to: task.status,
            });
        }
    }

    pub async fn list_by_role(
        &self,
        role: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<Task>, RelayError> {
        self.tasks.list_by_role(&Role::new(role)?, statuses).await
    }

    /// Mark the task completed and release its dependents.
    pub async fn complete(
        &self,
        id: TaskId,
        result: Option<TaskResult>,
    ) -> Result<Completion, RelayError> {
        let mut update = StatusUpdate::new(TaskStatus::Completed);
        update.result = result;
        let task = self.update_status(id, update).await?;
        let unblocked = self.resolver.resolve(id).await?;
        Ok(Completion { task, unblocked })
    }

    pub async fn resolve(&self, completed: TaskId) -> Result<Vec<TaskId>, RelayError> {
        self.resolver.resolve(completed).await
    }

    // ---- queues ----

    pub async fn queue_for(&self, role: &str) -> Result<RoleQueue, RelayError> {
        self.queues.queue_for(&Role::new(role)?).await
    }

    pub async fn next_for(&self, role: &str) -> Result<Option<Task>, RelayError> {
        self.queues.next_for(&Role::new(role)?).await
    }

    pub async fn counts(&self, role: &str) -> Result<QueueCounts, RelayError> {
        self.queues.counts(&Role::new(role)?).await
    }

    // ---- dispatch ----

    /// Hand a task to the execution gateway. A `pending` task becomes `queued`.
    ///
    /// Fails with `InvalidState` while another dispatch of the same task is in
    /// flight or the task is waiting in the staging queue.
    pub async fn dispatch(&self, id: TaskId) -> Result<Dispatched, RelayError> {
        let claim = self.gateway.claim(id)?;
        let now = self.clock.now();
        let previous = Mutex::new(None);

        let task = self
            .tasks
            .update(id, &|task: &mut Task| {
                if !task.status.is_dispatchable() {
                    return Err(RelayError::invalid_state(format!(
                        "{} is {} and cannot be dispatched",
                        task.id, task.status
                    )));
                }
                if task.status == TaskStatus::Pending {
                    task.apply_status(&StatusUpdate::new(TaskStatus::Queued), now)?;
                    *previous
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) =
                        Some(TaskStatus::Pending);
                }
                Ok(())
            })
            .await?;
        self.record_transition(&task, previous);

        let receipt = self.gateway.queue_claimed(claim, &task).await?;
        self.emit(DomainEvent::TaskDispatched {
            task_id: id,
            live: receipt.is_live(),
            position: receipt.position,
        });
        Ok(Dispatched { task, receipt })
    }

    /// Dispatch the role's highest-priority `pending` task, if it has one.
    ///
    /// `queued` tasks have already been handed over and are left alone.
    pub async fn dispatch_next(&self, role: &str) -> Result<Option<Dispatched>, RelayError> {
        match self.queues.next_pending(&Role::new(role)?).await? {
            Some(task) => self.dispatch(task.id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn gateway_status(&self) -> GatewayStatus {
        self.gateway.status().await
    }

    pub async fn staged(&self) -> Vec<StagedEntry> {
        self.gateway.staged().await
    }

    /// Forward staged tasks, re-reading each one first. Tasks that were cancelled,
    /// finished or removed while staged are dropped instead of sent.
    pub async fn replay_staged(&self) -> ReplayReport {
        let tasks = &self.tasks;
        self.gateway
            .replay_staged_with(|staged: Task| async move {
                let current = tasks.get(staged.id).await?;
                Ok::<_, RelayError>(current.filter(|task| task.status.is_dispatchable()))
            })
            .await
    }

    pub async fn probe_health(&self) -> bool {
        self.gateway.probe_health().await
    }

    pub fn spawn_health_probe(&self) -> HealthProbe {
        self.gateway.spawn_health_probe()
    }

    // ---- decisions ----

    pub async fn open_decision(&self, request: DecisionRequest) -> Result<Decision, RelayError> {
        self.escalation.open(request).await
    }

    pub async fn get_decision(&self, id: DecisionId) -> Result<Decision, RelayError> {
        self.escalation.get(id).await
    }

    pub async fn decide(
        &self,
        id: DecisionId,
        choice: DecisionChoice,
        notes: Option<String>,
    ) -> Result<Decision, RelayError> {
        self.escalation.decide(id, choice, notes).await
    }

    pub async fn defer(
        &self,
        id: DecisionId,
        defer_until: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<Decision, RelayError> {
        self.escalation.defer(id, defer_until, reason).await
    }

    pub async fn delegate(&self, id: DecisionId, delegate_to: &str) -> Result<Decision, RelayError> {
        self.escalation.delegate(id, delegate_to).await
    }

    pub async fn list_decisions(
        &self,
        status: Option<DecisionStatus>,
    ) -> Result<Vec<Decision>, RelayError> {
        self.escalation.list(status).await
    }

    // ---- observation ----

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> Result<EngineStatus, RelayError> {
        let mut roles = Vec::new();
        for role in self.tasks.roles().await? {
            let counts = self.queues.counts(&role).await?;
            roles.push(RoleSummary { role, counts });
        }
        Ok(EngineStatus {
            gateway: self.gateway.status().await,
            cascade: self.resolver.policy(),
            roles,
            pending_decisions: self.escalation.list(None).await?.len(),
        })
    }

    fn emit(&self, event: DomainEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
