//! Escalation / decision workflow.
//!
//! Decisions are independent of task status; they only reference a task for context.
//! Every transition is pending-only and goes through `DecisionStore::update`, so a
//! rejected transition never reaches storage.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::info;

use crate::domain::{
    Decision, DecisionChoice, DecisionId, DecisionRequest, DecisionStatus, DomainEvent,
    RelayError,
};
use crate::ports::{Clock, DecisionStore, IdGenerator, TaskStore};

pub struct EscalationWorkflow {
    decisions: Arc<dyn DecisionStore>,
    tasks: Arc<dyn TaskStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<DomainEvent>,
}

impl EscalationWorkflow {
    pub fn new(
        decisions: Arc<dyn DecisionStore>,
        tasks: Arc<dyn TaskStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<DomainEvent>,
    ) -> Self {
        Self {
            decisions,
            tasks,
            ids,
            clock,
            events,
        }
    }

    pub async fn open(&self, request: DecisionRequest) -> Result<Decision, RelayError> {
        if let Some(task_id) = request.task_id
            && self.tasks.get(task_id).await?.is_none()
        {
            return Err(RelayError::validation(format!(
                "decision references unknown task {task_id}"
            )));
        }

        let decision = Decision::open(self.ids.generate_decision_id(), request, self.clock.now())?;
        self.decisions.insert(decision.clone()).await?;

        info!(decision_id = %decision.id, role = %decision.requesting_role, "decision opened");
        let _ = self.events.send(DomainEvent::DecisionOpened {
            decision_id: decision.id,
        });
        Ok(decision)
    }

    pub async fn get(&self, id: DecisionId) -> Result<Decision, RelayError> {
        self.decisions
            .get(id)
            .await?
            .ok_or_else(|| RelayError::decision_not_found(id))
    }

    pub async fn decide(
        &self,
        id: DecisionId,
        choice: DecisionChoice,
        notes: Option<String>,
    ) -> Result<Decision, RelayError> {
        let now = self.clock.now();
        let decided = self
            .decisions
            .update(id, &|d: &mut Decision| d.decide(choice, notes.clone(), now))
            .await?;
        self.resolved(&decided, Some(choice));
        Ok(decided)
    }

    pub async fn defer(
        &self,
        id: DecisionId,
        defer_until: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<Decision, RelayError> {
        let now = self.clock.now();
        let deferred = self
            .decisions
            .update(id, &|d: &mut Decision| d.defer(defer_until, reason.clone(), now))
            .await?;
        self.resolved(&deferred, None);
        Ok(deferred)
    }

    pub async fn delegate(&self, id: DecisionId, delegate_to: &str) -> Result<Decision, RelayError> {
        let now = self.clock.now();
        let delegated = self
            .decisions
            .update(id, &|d: &mut Decision| d.delegate(delegate_to, now))
            .await?;
        self.resolved(&delegated, None);
        Ok(delegated)
    }

    /// Decisions with the given status; `None` lists pending ones.
    pub async fn list(&self, status: Option<DecisionStatus>) -> Result<Vec<Decision>, RelayError> {
        self.decisions
            .list(Some(status.unwrap_or(DecisionStatus::Pending)))
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<Decision>, RelayError> {
        self.decisions.list(None).await
    }

    fn resolved(&self, decision: &Decision, choice: Option<DecisionChoice>) {
        info!(
            decision_id = %decision.id,
            status = %decision.status,
            choice = ?choice,
            "decision resolved"
        );
        let _ = self.events.send(DomainEvent::DecisionResolved {
            decision_id: decision.id,
            status: decision.status,
        });
    }
}
