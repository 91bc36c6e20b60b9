//! Dependency resolution: unblock dependents when a blocker completes.
//!
//! Design:
//! - Edges live inline in each dependent's `blocked_by` set; there is no separate
//!   graph to keep in sync.
//! - Dependents are found by scanning every partition, then edited per partition
//!   (one lock, one atomic write per role).
//! - A failed partition write aborts the pass. Records already written stay
//!   consistent and a rerun picks up the rest.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::{DomainEvent, RelayError, Role, Task, TaskId, TaskStatus};
use crate::ports::{Clock, TaskStore};

/// How far a single resolution pass reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CascadePolicy {
    /// Only the direct dependents of the completed task.
    #[default]
    Direct,
    /// Dependents that are already `completed` have their own dependents resolved
    /// in the same pass.
    ThroughCompleted,
}

impl CascadePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CascadePolicy::Direct => "direct",
            CascadePolicy::ThroughCompleted => "through-completed",
        }
    }
}

impl fmt::Display for CascadePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CascadePolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(CascadePolicy::Direct),
            "through-completed" | "through_completed" => Ok(CascadePolicy::ThroughCompleted),
            other => Err(RelayError::validation(format!(
                "unknown cascade policy: {other}"
            ))),
        }
    }
}

pub struct DependencyResolver {
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    policy: CascadePolicy,
    events: broadcast::Sender<DomainEvent>,
}

impl DependencyResolver {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        policy: CascadePolicy,
        events: broadcast::Sender<DomainEvent>,
    ) -> Self {
        Self {
            tasks,
            clock,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> CascadePolicy {
        self.policy
    }

    /// Remove `completed` from every dependent's blocker set.
    ///
    /// Returns the ids that moved from `blocked` to `pending`. Running it again for
    /// the same id finds no dependents and returns an empty list.
    pub async fn resolve(&self, completed: TaskId) -> Result<Vec<TaskId>, RelayError> {
        let mut unblocked = Vec::new();
        let mut frontier = vec![completed];
        let mut seen = HashSet::from([completed]);

        while let Some(blocker) = frontier.pop() {
            let dependents = self.tasks.dependents_of(blocker).await?;
            if dependents.is_empty() {
                continue;
            }

            let roles: BTreeSet<Role> = dependents
                .iter()
                .map(|t| t.assigned_role.clone())
                .collect();
            for role in roles {
                let changed = self.clear_in_partition(&role, blocker, &mut unblocked).await?;

                if self.policy == CascadePolicy::ThroughCompleted {
                    for task in changed {
                        if task.status == TaskStatus::Completed && seen.insert(task.id) {
                            frontier.push(task.id);
                        }
                    }
                }
            }
        }

        if !unblocked.is_empty() {
            info!(
                completed = %completed,
                unblocked = unblocked.len(),
                policy = %self.policy,
                "dependents unblocked"
            );
            // no subscribers is fine
            let _ = self.events.send(DomainEvent::TasksUnblocked {
                completed,
                unblocked: unblocked.clone(),
            });
        }
        Ok(unblocked)
    }

    async fn clear_in_partition(
        &self,
        role: &Role,
        blocker: TaskId,
        unblocked: &mut Vec<TaskId>,
    ) -> Result<Vec<Task>, RelayError> {
        let now = self.clock.now();
        let moved = Mutex::new(Vec::new());

        let changed = self
            .tasks
            .update_partition(role, &|task: &mut Task| {
                if !task.is_waiting_on(blocker) {
                    return false;
                }
                if task.clear_blocker(blocker, now) {
                    moved
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(task.id);
                }
                true
            })
            .await?;

        let moved = moved
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(%role, %blocker, edited = changed.len(), unblocked = moved.len(), "partition resolved");
        unblocked.extend(moved);
        Ok(changed)
    }
}
