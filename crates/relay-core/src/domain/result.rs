//! TaskResult: the opaque output a role produces for a task.
//!
//! The engine never interprets the content. It is produced elsewhere (typically by a
//! text-generation collaborator) and attached to the task on `update_status`/`complete`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultKind {
    Success,
    Failure,
    Partial,
}

/// A reference to something produced while working on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Artifact {
    /// Generated text (a draft, a review, a plan...).
    Text(String),

    /// Path to a file produced/used.
    FilePath(String),

    /// URL reference (e.g., a pull request).
    Url(String),

    /// Arbitrary structured output.
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub kind: ResultKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl TaskResult {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            kind: ResultKind::Success,
            summary: Some(summary.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            kind: ResultKind::Failure,
            summary: Some(reason.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_kind_serializes_as_screaming_case() {
        let s = serde_json::to_string(&ResultKind::Partial).unwrap();
        assert_eq!(s, "\"PARTIAL\"");
    }

    #[test]
    fn artifact_is_tagged_enum() {
        let a = Artifact::Url("https://example.test/pr/1".to_string());
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["kind"], "Url");
        assert_eq!(v["value"], "https://example.test/pr/1");
    }

    #[test]
    fn empty_fields_are_omitted() {
        let v = serde_json::to_value(TaskResult::success("done")).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "SUCCESS", "summary": "done"}));
    }
}
