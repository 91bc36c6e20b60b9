//! Task lifecycle states.
//!
//! State transitions:
//! - created -> Pending (no blockers) | Blocked (blockers present)
//! - Blocked -> Pending (resolver cleared the last blocker)
//! - Pending -> Queued -> Active -> Completed | Failed
//! - any non-terminal -> Cancelled
//!
//! Completed / Failed / Cancelled are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Ready to be picked up; no outstanding blockers.
    Pending,

    /// Handed to the execution gateway.
    Queued,

    /// Being worked on.
    Active,

    /// Waiting on at least one blocker.
    Blocked,

    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Active,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Is this task eligible for dispatch by the execution gateway?
    pub fn is_dispatchable(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                RelayError::validation(format!(
                    "unknown task status '{s}' (expected one of pending, queued, active, blocked, completed, failed, cancelled)"
                ))
            })
    }
}

/// Parse a comma separated status filter such as `queued,active`.
///
/// An empty string yields an empty filter, which callers treat as "all statuses".
pub fn parse_status_filter(raw: &str) -> Result<Vec<TaskStatus>, RelayError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}
