//! Errors - エラー型と分類
//!
//! 呼び出し側に返すエラーはすべて `RelayError` に集約する。
//! `UpstreamUnavailable` だけは ExecutionGateway の中で吸収され、呼び出し側には出ない。

use thiserror::Error;

/// ErrorKind は運用上の分類
///
/// - Caller: 呼び出し側の入力や状態の誤り（リトライ無意味）
/// - Upstream: 外部実行サービスの障害（縮退運転で吸収）
/// - Infrastructure: 永続化の障害（必ず表に出す）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Caller,
    Upstream,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed input: missing required field, enum value outside the fixed set.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown task or decision id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation illegal in the current state-machine state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Execution service unreachable or timed out.
    #[error("execution service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A write or read against the backing medium failed.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn task_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "task",
            id: id.to_string(),
        }
    }

    pub fn decision_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "decision",
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::NotFound { .. } | Self::InvalidState(_) => {
                ErrorKind::Caller
            }
            Self::UpstreamUnavailable(_) => ErrorKind::Upstream,
            Self::Persistence(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_propagation_policy() {
        assert_eq!(RelayError::validation("x").kind(), ErrorKind::Caller);
        assert_eq!(RelayError::task_not_found("task-1").kind(), ErrorKind::Caller);
        assert_eq!(RelayError::invalid_state("x").kind(), ErrorKind::Caller);
        assert_eq!(
            RelayError::UpstreamUnavailable("down".into()).kind(),
            ErrorKind::Upstream
        );
        assert_eq!(
            RelayError::from(std::io::Error::other("disk")).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn not_found_message_names_the_record() {
        let err = RelayError::decision_not_found("decision-42");
        assert_eq!(err.to_string(), "decision not found: decision-42");
    }
}
