//! Task record, creation spec and status updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::errors::RelayError;
use super::ids::TaskId;
use super::priority::Priority;
use super::result::TaskResult;
use super::state::TaskStatus;

/// Name of the role a task is assigned to (e.g. `backend`, `reviewer`).
///
/// Roles are also storage partition keys, so only a conservative character set is
/// accepted: ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Role(String);

impl Role {
    pub fn new(s: impl Into<String>) -> Result<Self, RelayError> {
        let s = s.into();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RelayError::validation("assigned role is required"));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RelayError::validation(format!(
                "role '{trimmed}' may only contain ASCII letters, digits, '-' and '_'"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Role {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Role::new(value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Input for `create_task`.
///
/// `assigned_role` is kept as a raw string so that a missing/blank role surfaces as
/// a validation error from `validate()` rather than a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,

    pub content: String,

    #[serde(default)]
    pub assigned_role: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    /// Tasks that must complete before this one may leave `blocked`.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TaskSpec {
    /// Convenience constructor for the common case.
    pub fn new(title: impl Into<String>, content: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            assigned_role: Some(role.into()),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, blocker: TaskId) -> Self {
        self.dependencies.push(blocker);
        self
    }

    /// Checks the fields that do not need the store. Returns the parsed role.
    pub fn validate(&self) -> Result<Role, RelayError> {
        if self.title.trim().is_empty() {
            return Err(RelayError::validation("title must not be empty"));
        }
        if self.content.trim().is_empty() {
            return Err(RelayError::validation("content must not be empty"));
        }
        let role = self
            .assigned_role
            .as_deref()
            .ok_or_else(|| RelayError::validation("assigned role is required"))?;
        Role::new(role)
    }
}

/// Requested status change plus whatever the caller wants to attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl StatusUpdate {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            metadata: serde_json::Map::new(),
            result: None,
        }
    }

    pub fn with_result(mut self, result: TaskResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The persisted task record.
///
/// Design:
/// - `status` and `blocked_by` live in the same record so one atomic write always
///   carries a consistent pair.
/// - State transitions happen through methods, not direct field writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub content: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assigned_role: Role,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub blocked_by: BTreeSet<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Build a new record. `blocked_by` must already be validated against the store.
    pub fn new(
        id: TaskId,
        spec: TaskSpec,
        role: Role,
        blocked_by: BTreeSet<TaskId>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if blocked_by.is_empty() {
            TaskStatus::Pending
        } else {
            TaskStatus::Blocked
        };
        Self {
            id,
            title: spec.title.trim().to_string(),
            content: spec.content,
            status,
            priority: spec.priority,
            assigned_role: role,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            blocked_by,
            result: None,
            metadata: spec.metadata,
        }
    }

    /// Apply a status update.
    ///
    /// Returns `Ok(false)` when the update is a no-op (re-applying the current
    /// terminal status), `Ok(true)` when the record changed.
    ///
    /// - `blocked` is only accepted while `blocked_by` is non-empty
    /// - a task with open blockers cannot become `pending`/`queued`/`active`, but may be
    ///   closed as `completed`/`failed`/`cancelled`; its blocker set is kept
    pub fn apply_status(
        &mut self,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool, RelayError> {
        if self.status.is_terminal() {
            if self.status == update.status {
                return Ok(false);
            }
            return Err(RelayError::invalid_state(format!(
                "{} is {} and cannot move to {}",
                self.id, self.status, update.status
            )));
        }

        let runnable = matches!(
            update.status,
            TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Active
        );
        if runnable && !self.blocked_by.is_empty() {
            return Err(RelayError::invalid_state(format!(
                "{} still waits on {} blocker(s) and cannot move to {}",
                self.id,
                self.blocked_by.len(),
                update.status
            )));
        }

        if update.status == TaskStatus::Blocked && self.blocked_by.is_empty() {
            return Err(RelayError::invalid_state(format!(
                "{} has no open blockers and cannot move to blocked",
                self.id
            )));
        }

        self.status = update.status;
        match update.status {
            TaskStatus::Active if self.started_at.is_none() => self.started_at = Some(now),
            TaskStatus::Completed if self.completed_at.is_none() => self.completed_at = Some(now),
            _ => {}
        }
        for (key, value) in &update.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        self.updated_at = now;
        Ok(true)
    }

    /// Drop `completed` from the blocker set.
    ///
    /// Returns true when this call moved the task from `blocked` to `pending`.
    /// Terminal tasks keep their status; only set membership is corrected.
    pub fn clear_blocker(&mut self, completed: TaskId, now: DateTime<Utc>) -> bool {
        if !self.blocked_by.remove(&completed) {
            return false;
        }
        self.updated_at = now;
        if self.blocked_by.is_empty() && self.status == TaskStatus::Blocked {
            self.status = TaskStatus::Pending;
            return true;
        }
        false
    }

    pub fn is_waiting_on(&self, blocker: TaskId) -> bool {
        self.blocked_by.contains(&blocker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn new_task(blocked_by: BTreeSet<TaskId>) -> Task {
        let spec = TaskSpec::new("Write parser", "Tokenize the input", "backend");
        let role = spec.validate().unwrap();
        Task::new(TaskId::from_ulid(Ulid::new()), spec, role, blocked_by, now())
    }

    #[test]
    fn initial_status_depends_on_blockers() {
        assert_eq!(new_task(BTreeSet::new()).status, TaskStatus::Pending);

        let blocker = TaskId::from_ulid(Ulid::new());
        assert_eq!(new_task(BTreeSet::from([blocker])).status, TaskStatus::Blocked);
    }

    #[test]
    fn validate_rejects_blank_fields() {
        let blank_title = TaskSpec::new("  ", "body", "backend");
        assert!(matches!(blank_title.validate(), Err(RelayError::Validation(_))));

        let blank_content = TaskSpec::new("title", "", "backend");
        assert!(matches!(blank_content.validate(), Err(RelayError::Validation(_))));

        let mut no_role = TaskSpec::new("title", "body", "x");
        no_role.assigned_role = None;
        assert!(matches!(no_role.validate(), Err(RelayError::Validation(_))));
    }

    #[test]
    fn role_rejects_path_characters() {
        assert!(Role::new("../etc").is_err());
        assert!(Role::new("qa_team-2").is_ok());
    }

    #[test]
    fn completing_stamps_completed_at_once() {
        let mut task = new_task(BTreeSet::new());
        let first = now();
        assert!(task.apply_status(&StatusUpdate::new(TaskStatus::Completed), first).unwrap());
        assert_eq!(task.completed_at, Some(first));

        // second completion is a harmless no-op
        let later = first + chrono::Duration::minutes(5);
        assert!(!task.apply_status(&StatusUpdate::new(TaskStatus::Completed), later).unwrap());
        assert_eq!(task.completed_at, Some(first));
    }

    #[test]
    fn terminal_task_rejects_other_status() {
        let mut task = new_task(BTreeSet::new());
        task.apply_status(&StatusUpdate::new(TaskStatus::Cancelled), now()).unwrap();
        let err = task
            .apply_status(&StatusUpdate::new(TaskStatus::Active), now())
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidState(_)));
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn blocked_task_cannot_become_runnable() {
        let blocker = TaskId::from_ulid(Ulid::new());
        let mut task = new_task(BTreeSet::from([blocker]));
        let err = task
            .apply_status(&StatusUpdate::new(TaskStatus::Queued), now())
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidState(_)));
    }

    #[test]
    fn blocked_requires_open_blockers() {
        let mut task = new_task(BTreeSet::new());
        let err = task
            .apply_status(&StatusUpdate::new(TaskStatus::Blocked), now())
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidState(_)));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn blocked_task_can_be_closed_with_blockers_kept() {
        let blocker = TaskId::from_ulid(Ulid::new());
        let mut completed = new_task(BTreeSet::from([blocker]));
        assert!(completed
            .apply_status(&StatusUpdate::new(TaskStatus::Completed), now())
            .unwrap());
        assert_eq!(completed.status, TaskStatus::Completed);
        assert!(completed.is_waiting_on(blocker));

        // resolution later corrects membership without touching the terminal status
        assert!(!completed.clear_blocker(blocker, now()));
        assert_eq!(completed.status, TaskStatus::Completed);
        assert!(completed.blocked_by.is_empty());

        let mut cancelled = new_task(BTreeSet::from([blocker]));
        cancelled
            .apply_status(&StatusUpdate::new(TaskStatus::Cancelled), now())
            .unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
    }

    #[test]
    fn active_stamps_started_at_and_merges_metadata() {
        let mut task = new_task(BTreeSet::new());
        let update = StatusUpdate::new(TaskStatus::Active)
            .with_metadata("worker", serde_json::json!("w-1"));
        task.apply_status(&update, now()).unwrap();
        assert_eq!(task.started_at, Some(now()));
        assert_eq!(task.metadata["worker"], "w-1");
    }

    #[test]
    fn clear_blocker_unblocks_only_when_empty() {
        let a = TaskId::from_ulid(Ulid::new());
        let b = TaskId::from_ulid(Ulid::new());
        let mut task = new_task(BTreeSet::from([a, b]));

        assert!(!task.clear_blocker(a, now()));
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(task.clear_blocker(b, now()));
        assert_eq!(task.status, TaskStatus::Pending);
        // idempotent
        assert!(!task.clear_blocker(b, now()));
    }

    #[test]
    fn record_roundtrips_through_json() {
        let blocker = TaskId::from_ulid(Ulid::new());
        let task = new_task(BTreeSet::from([blocker]));
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
