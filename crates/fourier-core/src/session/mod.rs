//! Per-run audit log.
//!
//! The orchestrator writes checkpoints (prompts, responses, verification,
//! analysis, iteration records, final outcome) through a [`SessionSink`].
//! Each run owns a distinct namespace keyed by its [`SessionId`]; the core
//! never reads back what it wrote.

pub mod fs;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::RunRequest;

pub use fs::{FsSessionLog, IterationFiles, SessionContext};

/// Errors raised by a session sink.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid session id: {0}")]
    InvalidId(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// `session_<YYYYmmdd_HHMMSS>_<8 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("session_{timestamp}_{}", &suffix[..8]))
    }

    /// Accept an existing id, rejecting anything that could escape a base directory.
    pub fn parse(id: &str) -> SessionResult<Self> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(id.to_string()))
        } else {
            Err(SessionError::InvalidId(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(id: String) -> SessionResult<Self> {
        Self::parse(&id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checkpoints written during one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKey {
    /// Derivation prompt.
    #[serde(rename = "prompt_1")]
    Prompt1,
    /// Accumulated derivation markdown.
    #[serde(rename = "response_1")]
    Response1,
    /// Translation prompt.
    #[serde(rename = "prompt_2")]
    Prompt2,
    /// Parsed translation reply.
    #[serde(rename = "response_2")]
    Response2,
    Verification,
    /// Error-analysis prompt.
    #[serde(rename = "prompt_3")]
    Prompt3,
    ErrorAnalysis,
    IterationRecord,
}

impl CheckpointKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt1 => "prompt_1",
            Self::Response1 => "response_1",
            Self::Prompt2 => "prompt_2",
            Self::Response2 => "response_2",
            Self::Verification => "verification",
            Self::Prompt3 => "prompt_3",
            Self::ErrorAnalysis => "error_analysis",
            Self::IterationRecord => "iteration_record",
        }
    }

    /// File extension used by [`FsSessionLog`].
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Prompt1 | Self::Prompt2 | Self::Prompt3 => "txt",
            Self::Response1 => "md",
            _ => "json",
        }
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status recorded in session metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

/// Append-only audit sink.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Open a new namespace for `request`.
    async fn create_session(&self, request: &RunRequest) -> SessionResult<SessionId>;

    /// Append a checkpoint. Text checkpoints carry a `Value::String`.
    async fn append(
        &self,
        session: &SessionId,
        iteration: Option<u32>,
        key: CheckpointKey,
        value: &Value,
    ) -> SessionResult<()>;

    /// Record the terminal outcome.
    async fn finish(
        &self,
        session: &SessionId,
        status: SessionStatus,
        outcome: &Value,
    ) -> SessionResult<()>;
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSessionLog;

#[async_trait]
impl SessionSink for NullSessionLog {
    async fn create_session(&self, _request: &RunRequest) -> SessionResult<SessionId> {
        Ok(SessionId::generate())
    }

    async fn append(
        &self,
        _session: &SessionId,
        _iteration: Option<u32>,
        _key: CheckpointKey,
        _value: &Value,
    ) -> SessionResult<()> {
        Ok(())
    }

    async fn finish(
        &self,
        _session: &SessionId,
        _status: SessionStatus,
        _outcome: &Value,
    ) -> SessionResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_session_id_format() {
        let id = SessionId::generate();
        let re = Regex::new(r"^session_\d{8}_\d{6}_[0-9a-f]{8}$").expect("regex");
        assert!(re.is_match(id.as_str()), "{id}");
    }

    #[test]
    fn test_session_id_rejects_traversal() {
        assert!(SessionId::parse("../etc").is_err());
        assert!(SessionId::parse("a/b").is_err());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("session_20240101_120000_abcdef01").is_ok());
    }

    #[test]
    fn test_session_id_deserialize_validates() {
        let id: SessionId =
            serde_json::from_str("\"session_20240101_120000_abcdef01\"").expect("valid id");
        assert_eq!(id.as_str(), "session_20240101_120000_abcdef01");
        assert_eq!(
            serde_json::to_string(&id).expect("serialize"),
            "\"session_20240101_120000_abcdef01\""
        );
        assert!(serde_json::from_str::<SessionId>("\"../../etc\"").is_err());
        assert!(serde_json::from_str::<SessionId>("\"\"").is_err());
    }

    #[test]
    fn test_checkpoint_key_names() {
        assert_eq!(CheckpointKey::Prompt1.as_str(), "prompt_1");
        assert_eq!(CheckpointKey::Response1.extension(), "md");
        assert_eq!(CheckpointKey::ErrorAnalysis.extension(), "json");
        let json = serde_json::to_string(&CheckpointKey::Response2).expect("serialize");
        assert_eq!(json, "\"response_2\"");
    }
}
