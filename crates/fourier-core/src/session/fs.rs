//! Filesystem session log.
//!
//! ```text
//! <base>/<session_id>/
//!   metadata.json
//!   user_input.json
//!   iteration_<n>/<checkpoint>.{txt,md,json}
//!   final_result.json
//!   final_result.digest
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use super::{
    CheckpointKey, SessionError, SessionId, SessionResult, SessionSink, SessionStatus,
};
use crate::domain::RunRequest;

const METADATA: &str = "metadata.json";
const USER_INPUT: &str = "user_input.json";
const FINAL_RESULT: &str = "final_result.json";
const FINAL_DIGEST: &str = "final_result.digest";

/// Files of one iteration directory, keyed by file stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationFiles {
    pub iteration: u32,
    pub files: BTreeMap<String, Value>,
}

/// Everything stored for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub metadata: Value,
    pub user_input: Value,
    pub iterations: Vec<IterationFiles>,
    pub final_result: Option<Value>,
}

/// [`SessionSink`] writing one directory per session under `base_dir`.
#[derive(Debug, Clone)]
pub struct FsSessionLog {
    base_dir: PathBuf,
}

impl FsSessionLog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.base_dir.join(session.as_str())
    }

    /// Read `final_result.json` and verify it against `final_result.digest`.
    pub async fn read_final_result(&self, session: &SessionId) -> SessionResult<Value> {
        let dir = self.existing_dir(session).await?;
        let bytes = fs::read(dir.join(FINAL_RESULT)).await?;
        let expected = fs::read_to_string(dir.join(FINAL_DIGEST)).await?;
        let actual = digest(&bytes);
        if expected.trim() != actual {
            return Err(SessionError::DigestMismatch {
                expected: expected.trim().to_string(),
                actual,
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load metadata, input, every iteration's files and the final result.
    pub async fn load_session(&self, session: &SessionId) -> SessionResult<SessionContext> {
        let dir = self.existing_dir(session).await?;
        let metadata = read_json(&dir.join(METADATA)).await?;
        let user_input = read_json(&dir.join(USER_INPUT)).await?;

        let mut iterations = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(n) = name
                .strip_prefix("iteration_")
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            iterations.push(IterationFiles {
                iteration: n,
                files: read_iteration_dir(&entry.path()).await?,
            });
        }
        iterations.sort_by_key(|i| i.iteration);

        let final_path = dir.join(FINAL_RESULT);
        let final_result = if fs::try_exists(&final_path).await? {
            Some(self.read_final_result(session).await?)
        } else {
            None
        };

        Ok(SessionContext {
            session_id: session.clone(),
            metadata,
            user_input,
            iterations,
            final_result,
        })
    }

    async fn existing_dir(&self, session: &SessionId) -> SessionResult<PathBuf> {
        let dir = self.session_dir(session);
        if fs::try_exists(&dir).await? {
            Ok(dir)
        } else {
            Err(SessionError::NotFound(session.to_string()))
        }
    }

    async fn update_metadata(
        &self,
        session: &SessionId,
        update: impl FnOnce(&mut serde_json::Map<String, Value>),
    ) -> SessionResult<()> {
        let path = self.session_dir(session).join(METADATA);
        let mut metadata = read_json(&path).await?;
        if let Some(obj) = metadata.as_object_mut() {
            update(obj);
        }
        write_json(&path, &metadata).await
    }
}

#[async_trait]
impl SessionSink for FsSessionLog {
    async fn create_session(&self, request: &RunRequest) -> SessionResult<SessionId> {
        let session = SessionId::generate();
        let dir = self.session_dir(&session);
        fs::create_dir_all(&dir).await?;

        let metadata = json!({
            "session_id": session,
            "created_at": Utc::now().to_rfc3339(),
            "status": SessionStatus::Running,
        });
        write_json(&dir.join(METADATA), &metadata).await?;
        write_json(&dir.join(USER_INPUT), &serde_json::to_value(request)?).await?;

        info!(session_id = %session, dir = %dir.display(), "session created");
        Ok(session)
    }

    async fn append(
        &self,
        session: &SessionId,
        iteration: Option<u32>,
        key: CheckpointKey,
        value: &Value,
    ) -> SessionResult<()> {
        let mut dir = self.session_dir(session);
        if let Some(n) = iteration {
            dir = dir.join(format!("iteration_{n}"));
        }
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.{}", key.as_str(), key.extension()));
        match (key.extension(), value) {
            ("json", _) => write_json(&path, value).await?,
            (_, Value::String(text)) => fs::write(&path, text.as_bytes()).await?,
            (_, other) => fs::write(&path, other.to_string().as_bytes()).await?,
        }
        debug!(session_id = %session, ?iteration, key = %key, "checkpoint saved");
        Ok(())
    }

    async fn finish(
        &self,
        session: &SessionId,
        status: SessionStatus,
        outcome: &Value,
    ) -> SessionResult<()> {
        let dir = self.session_dir(session);
        let bytes = serde_json::to_vec_pretty(outcome)?;
        fs::write(dir.join(FINAL_RESULT), &bytes).await?;
        fs::write(dir.join(FINAL_DIGEST), digest(&bytes).as_bytes()).await?;

        let finished_at = Utc::now().to_rfc3339();
        self.update_metadata(session, |meta| {
            meta.insert("status".to_string(), json!(status));
            meta.insert("finished_at".to_string(), json!(finished_at));
            if status == SessionStatus::Failed {
                if let Some(reason) = outcome.get("reason") {
                    meta.insert("failure_reason".to_string(), reason.clone());
                }
            }
        })
        .await?;

        info!(session_id = %session, ?status, "session finished");
        Ok(())
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

async fn write_json(path: &Path, value: &Value) -> SessionResult<()> {
    fs::write(path, serde_json::to_vec_pretty(value)?).await?;
    Ok(())
}

async fn read_json(path: &Path) -> SessionResult<Value> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn read_iteration_dir(dir: &Path) -> SessionResult<BTreeMap<String, Value>> {
    let mut files = BTreeMap::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        let value = if path.extension().is_some_and(|e| e == "json") {
            read_json(&path).await?
        } else {
            Value::String(fs::read_to_string(&path).await?)
        };
        files.insert(stem, value);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        RunRequest::new("np.sin(t)", 6.283185307179586, 1, 20).expect("request")
    }

    #[tokio::test]
    async fn test_session_layout() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = FsSessionLog::new(tmp.path());
        let session = log.create_session(&request()).await.expect("create");

        log.append(
            &session,
            Some(1),
            CheckpointKey::Prompt1,
            &Value::String("derive".into()),
        )
        .await
        .expect("append prompt");
        log.append(
            &session,
            Some(1),
            CheckpointKey::Response1,
            &Value::String("## Step 1".into()),
        )
        .await
        .expect("append response");
        log.append(&session, Some(1), CheckpointKey::Response2, &json!({"a": 1}))
            .await
            .expect("append json");

        let dir = log.session_dir(&session);
        assert!(dir.join("metadata.json").exists());
        assert!(dir.join("user_input.json").exists());
        assert!(dir.join("iteration_1/prompt_1.txt").exists());
        assert!(dir.join("iteration_1/response_1.md").exists());
        assert!(dir.join("iteration_1/response_2.json").exists());
        let md = std::fs::read_to_string(dir.join("iteration_1/response_1.md")).expect("read");
        assert_eq!(md, "## Step 1");
    }

    #[tokio::test]
    async fn test_final_result_digest_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = FsSessionLog::new(tmp.path());
        let session = log.create_session(&request()).await.expect("create");
        let outcome = json!({"success": true, "status": "verified"});
        log.finish(&session, SessionStatus::Completed, &outcome)
            .await
            .expect("finish");

        assert_eq!(log.read_final_result(&session).await.expect("read"), outcome);

        let ctx = log.load_session(&session).await.expect("load");
        assert_eq!(ctx.metadata["status"], "completed");
        assert_eq!(ctx.user_input["n_terms"], 1);
        assert_eq!(ctx.final_result, Some(outcome));
    }

    #[tokio::test]
    async fn test_tampered_final_result_detected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = FsSessionLog::new(tmp.path());
        let session = log.create_session(&request()).await.expect("create");
        log.finish(&session, SessionStatus::Completed, &json!({"success": true}))
            .await
            .expect("finish");

        std::fs::write(
            log.session_dir(&session).join("final_result.json"),
            br#"{"success": false}"#,
        )
        .expect("tamper");

        let err = log.read_final_result(&session).await.unwrap_err();
        assert!(matches!(err, SessionError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_failed_status_records_reason() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = FsSessionLog::new(tmp.path());
        let session = log.create_session(&request()).await.expect("create");
        log.finish(
            &session,
            SessionStatus::Failed,
            &json!({"success": false, "reason": "Error analysis inconclusive"}),
        )
        .await
        .expect("finish");

        let ctx = log.load_session(&session).await.expect("load");
        assert_eq!(ctx.metadata["status"], "failed");
        assert_eq!(ctx.metadata["failure_reason"], "Error analysis inconclusive");
    }

    #[tokio::test]
    async fn test_load_iterations_sorted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = FsSessionLog::new(tmp.path());
        let session = log.create_session(&request()).await.expect("create");
        for n in [2, 1, 10] {
            log.append(&session, Some(n), CheckpointKey::Verification, &json!({"n": n}))
                .await
                .expect("append");
        }
        let ctx = log.load_session(&session).await.expect("load");
        let order: Vec<u32> = ctx.iterations.iter().map(|i| i.iteration).collect();
        assert_eq!(order, vec![1, 2, 10]);
        assert_eq!(ctx.iterations[0].files["verification"]["n"], 1);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = FsSessionLog::new(tmp.path());
        let id = SessionId::parse("session_20240101_000000_deadbeef").expect("id");
        assert!(matches!(
            log.load_session(&id).await.unwrap_err(),
            SessionError::NotFound(_)
        ));
    }
}
