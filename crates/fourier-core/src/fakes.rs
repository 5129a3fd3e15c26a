//! Deterministic fakes for the model gateway and the session sink.
//!
//! `ScriptedGateway` replays queued replies and records every request, and
//! `MemorySessionLog` keeps checkpoints in memory. Neither touches the
//! network or the filesystem.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::domain::RunRequest;
use crate::gateway::{CompletionRequest, GatewayError, ModelGateway, TextStream};
use crate::session::{
    CheckpointKey, SessionError, SessionId, SessionResult, SessionSink, SessionStatus,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ScriptedGateway
// ---------------------------------------------------------------------------

/// Which capability a recorded request went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Complete,
    Stream,
}

/// One scripted reply to a `stream` call.
#[derive(Debug, Clone)]
pub enum ScriptedStream {
    /// Yield these fragments, then end.
    Chunks(Vec<String>),
    /// Yield these fragments, then fail.
    FailAfter(Vec<String>, GatewayError),
    /// Fail before any fragment.
    Error(GatewayError),
}

/// [`ModelGateway`] that replays queued replies in FIFO order.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    completions: Mutex<VecDeque<Result<String, GatewayError>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    calls: Mutex<Vec<(CallKind, CompletionRequest)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful `complete` reply.
    pub fn with_completion(self, text: impl Into<String>) -> Self {
        lock(&self.completions).push_back(Ok(text.into()));
        self
    }

    /// Queue a failing `complete` reply.
    pub fn with_completion_error(self, error: GatewayError) -> Self {
        lock(&self.completions).push_back(Err(error));
        self
    }

    /// Queue a `stream` reply yielding `chunks`.
    pub fn with_stream<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = chunks.into_iter().map(Into::into).collect();
        lock(&self.streams).push_back(ScriptedStream::Chunks(chunks));
        self
    }

    pub fn with_stream_reply(self, reply: ScriptedStream) -> Self {
        lock(&self.streams).push_back(reply);
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<(CallKind, CompletionRequest)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, kind: CallKind) -> usize {
        lock(&self.calls).iter().filter(|(k, _)| *k == kind).count()
    }

    /// Replies still queued (completions, streams).
    pub fn remaining(&self) -> (usize, usize) {
        (lock(&self.completions).len(), lock(&self.streams).len())
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError> {
        lock(&self.calls).push((CallKind::Complete, request));
        lock(&self.completions)
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Exhausted("complete".to_string())))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, GatewayError> {
        lock(&self.calls).push((CallKind::Stream, request));
        let reply = lock(&self.streams)
            .pop_front()
            .ok_or_else(|| GatewayError::Exhausted("stream".to_string()))?;

        let items: Vec<Result<String, GatewayError>> = match reply {
            ScriptedStream::Chunks(chunks) => chunks.into_iter().map(Ok).collect(),
            ScriptedStream::FailAfter(chunks, error) => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(error)))
                .collect(),
            ScriptedStream::Error(error) => return Err(error),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

// ---------------------------------------------------------------------------
// MemorySessionLog
// ---------------------------------------------------------------------------

/// One appended checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntry {
    pub session: SessionId,
    pub iteration: Option<u32>,
    pub key: CheckpointKey,
    pub value: Value,
}

/// In-memory [`SessionSink`].
#[derive(Debug, Default)]
pub struct MemorySessionLog {
    sessions: Mutex<Vec<(SessionId, RunRequest)>>,
    entries: Mutex<Vec<SessionEntry>>,
    finished: Mutex<HashMap<SessionId, (SessionStatus, Value)>>,
    fail_writes: bool,
}

impl MemorySessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log whose every operation fails; used to check that sink errors never end a run.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        lock(&self.sessions).iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn entries(&self) -> Vec<SessionEntry> {
        lock(&self.entries).clone()
    }

    pub fn entries_for(&self, key: CheckpointKey) -> Vec<SessionEntry> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.key == key)
            .cloned()
            .collect()
    }

    pub fn count(&self, key: CheckpointKey) -> usize {
        lock(&self.entries).iter().filter(|e| e.key == key).count()
    }

    pub fn finished(&self, session: &SessionId) -> Option<(SessionStatus, Value)> {
        lock(&self.finished).get(session).cloned()
    }

    fn check(&self) -> SessionResult<()> {
        if self.fail_writes {
            return Err(SessionError::Io(std::io::Error::other("memory log set to fail")));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionSink for MemorySessionLog {
    async fn create_session(&self, request: &RunRequest) -> SessionResult<SessionId> {
        self.check()?;
        let id = SessionId::generate();
        lock(&self.sessions).push((id.clone(), request.clone()));
        Ok(id)
    }

    async fn append(
        &self,
        session: &SessionId,
        iteration: Option<u32>,
        key: CheckpointKey,
        value: &Value,
    ) -> SessionResult<()> {
        self.check()?;
        lock(&self.entries).push(SessionEntry {
            session: session.clone(),
            iteration,
            key,
            value: value.clone(),
        });
        Ok(())
    }

    async fn finish(
        &self,
        session: &SessionId,
        status: SessionStatus,
        outcome: &Value,
    ) -> SessionResult<()> {
        self.check()?;
        lock(&self.finished).insert(session.clone(), (status, outcome.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_gateway_fifo() {
        let gw = ScriptedGateway::new()
            .with_completion("first")
            .with_completion_error(GatewayError::Empty)
            .with_stream(["a", "b"]);

        let req = CompletionRequest::new("m", "p");
        assert_eq!(gw.complete(req.clone()).await.expect("first"), "first");
        assert_eq!(gw.complete(req.clone()).await.unwrap_err(), GatewayError::Empty);
        assert!(matches!(
            gw.complete(req.clone()).await.unwrap_err(),
            GatewayError::Exhausted(_)
        ));

        let chunks: Vec<_> = gw.stream(req).await.expect("stream").collect().await;
        assert_eq!(chunks, vec![Ok("a".to_string()), Ok("b".to_string())]);
        assert_eq!(gw.call_count(CallKind::Complete), 3);
        assert_eq!(gw.call_count(CallKind::Stream), 1);
    }

    #[tokio::test]
    async fn test_scripted_stream_failure() {
        let gw = ScriptedGateway::new().with_stream_reply(ScriptedStream::FailAfter(
            vec!["x".to_string()],
            GatewayError::Transport("reset".to_string()),
        ));
        let items: Vec<_> = gw
            .stream(CompletionRequest::new("m", "p"))
            .await
            .expect("stream")
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_memory_session_log() {
        let log = MemorySessionLog::new();
        let req = RunRequest::new("t", 1.0, 1, 20).expect("request");
        let id = log.create_session(&req).await.expect("create");
        log.append(&id, Some(1), CheckpointKey::Prompt1, &Value::String("p".into()))
            .await
            .expect("append");
        log.finish(&id, SessionStatus::Completed, &Value::Null)
            .await
            .expect("finish");

        assert_eq!(log.sessions(), vec![id.clone()]);
        assert_eq!(log.count(CheckpointKey::Prompt1), 1);
        assert_eq!(log.finished(&id).map(|f| f.0), Some(SessionStatus::Completed));
    }

    #[tokio::test]
    async fn test_failing_log() {
        let log = MemorySessionLog::failing();
        let req = RunRequest::new("t", 1.0, 1, 20).expect("request");
        assert!(log.create_session(&req).await.is_err());
    }
}
