//! Decision model: escalation records that need an arbiter.
//!
//! A decision starts `Pending` and takes exactly one terminal transition
//! (`Decided`, `Deferred` or `Delegated`). Records are audit entries, so after that
//! transition nothing about them changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::RelayError;
use super::ids::{DecisionId, TaskId};
use super::task::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Decided,
    Deferred,
    Delegated,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Decided => "decided",
            DecisionStatus::Deferred => "deferred",
            DecisionStatus::Delegated => "delegated",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(DecisionStatus::Pending),
            "decided" => Ok(DecisionStatus::Decided),
            "deferred" => Ok(DecisionStatus::Deferred),
            "delegated" => Ok(DecisionStatus::Delegated),
            _ => Err(RelayError::validation(format!(
                "unknown decision status '{s}' (expected pending, decided, deferred or delegated)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionChoice {
    Approve,
    Reject,
    Modify,
    Escalate,
}

impl DecisionChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionChoice::Approve => "approve",
            DecisionChoice::Reject => "reject",
            DecisionChoice::Modify => "modify",
            DecisionChoice::Escalate => "escalate",
        }
    }
}

impl fmt::Display for DecisionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionChoice {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(DecisionChoice::Approve),
            "reject" => Ok(DecisionChoice::Reject),
            "modify" => Ok(DecisionChoice::Modify),
            "escalate" => Ok(DecisionChoice::Escalate),
            _ => Err(RelayError::validation(format!(
                "unknown decision choice '{s}' (expected approve, reject, modify or escalate)"
            ))),
        }
    }
}

/// Input for opening a new decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub task_id: Option<TaskId>,

    pub requesting_role: String,

    /// What the arbiter is asked to decide.
    pub summary: String,

    #[serde(default)]
    pub context: serde_json::Value,
}

impl DecisionRequest {
    pub fn new(requesting_role: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            requesting_role: requesting_role.into(),
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    pub requesting_role: Role,
    pub summary: String,

    #[serde(default)]
    pub context: serde_json::Value,

    pub status: DecisionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<DecisionChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl Decision {
    pub fn open(
        id: DecisionId,
        request: DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<Self, RelayError> {
        let requesting_role = Role::new(request.requesting_role)?;
        if request.summary.trim().is_empty() {
            return Err(RelayError::validation("decision summary must not be empty"));
        }
        Ok(Self {
            id,
            task_id: request.task_id,
            requesting_role,
            summary: request.summary,
            context: request.context,
            status: DecisionStatus::Pending,
            choice: None,
            notes: None,
            delegate_to: None,
            defer_until: None,
            reason: None,
            created_at: now,
            decided_at: None,
        })
    }

    fn ensure_pending(&self, action: &str) -> Result<(), RelayError> {
        if self.status != DecisionStatus::Pending {
            return Err(RelayError::invalid_state(format!(
                "cannot {action} {}: already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn decide(
        &mut self,
        choice: DecisionChoice,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        self.ensure_pending("decide")?;
        self.status = DecisionStatus::Decided;
        self.choice = Some(choice);
        self.notes = notes;
        self.decided_at = Some(now);
        Ok(())
    }

    pub fn defer(
        &mut self,
        defer_until: Option<DateTime<Utc>>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        self.ensure_pending("defer")?;
        self.status = DecisionStatus::Deferred;
        self.defer_until = defer_until;
        self.reason = reason;
        self.decided_at = Some(now);
        Ok(())
    }

    pub fn delegate(&mut self, delegate_to: &str, now: DateTime<Utc>) -> Result<(), RelayError> {
        let delegate_to = delegate_to.trim();
        if delegate_to.is_empty() {
            return Err(RelayError::validation("delegate_to must not be empty"));
        }
        self.ensure_pending("delegate")?;
        self.status = DecisionStatus::Delegated;
        self.delegate_to = Some(delegate_to.to_string());
        self.decided_at = Some(now);
        Ok(())
    }
}
