//! Iteration records and the terminal run outcome.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::RunEvent;
use crate::classifier::DiscrepancyClassification;
use crate::domain::CodeArtifacts;
use crate::oracle::Verification;
use crate::session::{SessionId, SessionStatus};

/// Where an iteration's derivation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivationSource {
    Fresh,
    /// Carried over by a code-only retry.
    Reused { from_iteration: u32 },
}

/// One loop pass. Written once to the session log, never edited afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    /// Empty when the derivation was reused.
    pub derivation: String,
    pub derivation_source: DerivationSource,
    pub code: Option<CodeArtifacts>,
    pub verification: Option<Verification>,
    pub classification: Option<DiscrepancyClassification>,
    /// Set when the iteration was abandoned.
    pub error: Option<String>,
}

impl IterationRecord {
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            derivation: String::new(),
            derivation_source: DerivationSource::Fresh,
            code: None,
            verification: None,
            classification: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Verified,
    /// Unverified but accepted by the analysis (`auto_stop`).
    AcceptableError,
    Failed,
    MaxIterationsReached,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::AcceptableError => "acceptable_error",
            Self::Failed => "failed",
            Self::MaxIterationsReached => "max_iterations_reached",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Verified | Self::AcceptableError)
    }

    pub fn session_status(&self) -> SessionStatus {
        if self.is_success() {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Series for plotting the accepted reconstruction against the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    pub t_points: Vec<f64>,
    pub original_values: Vec<f64>,
    pub reconstructed_values: Vec<f64>,
    pub pointwise_errors: Vec<f64>,
    pub max_pointwise_error: f64,
}

impl Visualization {
    /// `None` when the verification produced no numbers.
    pub fn from_verification(verification: &Verification) -> Option<Self> {
        let result = verification.result()?;
        Some(Self {
            t_points: result.test_points.clone(),
            original_values: result.original_values.clone(),
            reconstructed_values: result.reconstructed_values.clone(),
            pointwise_errors: result.pointwise_errors.clone(),
            max_pointwise_error: result.error_metrics.max_absolute_error,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Terminal record of a run; carried by the last event of every stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Absent only when the request was rejected before a session existed.
    pub session_id: Option<SessionId>,
    pub success: bool,
    pub status: OutcomeStatus,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeArtifacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_analysis: Option<DiscrepancyClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,
    /// Every iteration record of the run, in order, abandoned ones included.
    #[serde(default)]
    pub history: Vec<IterationRecord>,
    pub timing: Timing,
}

/// Incremental construction of a [`RunOutcome`].
#[derive(Debug, Clone)]
pub(crate) struct OutcomeBuilder {
    outcome: RunOutcome,
    clock: Instant,
}

impl OutcomeBuilder {
    pub(crate) fn new(
        session_id: Option<SessionId>,
        status: OutcomeStatus,
        iterations: u32,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Self {
        Self {
            outcome: RunOutcome {
                session_id,
                success: status.is_success(),
                status,
                iterations,
                reason: None,
                derivation: None,
                code: None,
                verification: None,
                error_analysis: None,
                visualization: None,
                history: Vec::new(),
                timing: Timing {
                    started_at,
                    finished_at: started_at,
                    duration_ms: 0,
                },
            },
            clock,
        }
    }

    pub(crate) fn reason(mut self, reason: impl Into<String>) -> Self {
        self.outcome.reason = Some(reason.into());
        self
    }

    pub(crate) fn artifacts(
        mut self,
        derivation: &str,
        code: &CodeArtifacts,
        verification: &Verification,
    ) -> Self {
        self.outcome.derivation = Some(derivation.to_string());
        self.outcome.code = Some(code.clone());
        self.outcome.visualization = Visualization::from_verification(verification);
        self.outcome.verification = Some(verification.clone());
        self
    }

    pub(crate) fn analysis(mut self, analysis: &DiscrepancyClassification) -> Self {
        self.outcome.error_analysis = Some(analysis.clone());
        self
    }

    pub(crate) fn history(mut self, history: &[IterationRecord]) -> Self {
        self.outcome.history = history.to_vec();
        self
    }

    pub(crate) fn build(mut self) -> RunOutcome {
        self.outcome.timing.finished_at = Utc::now();
        self.outcome.timing.duration_ms =
            u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.outcome
    }
}

/// Everything a run emitted, collected by `Orchestrator::run_to_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub events: Vec<RunEvent>,
    pub outcome: Option<RunOutcome>,
}

impl RunReport {
    /// Event type names in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.iter().map(RunEvent::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn last_kind(&self) -> Option<&'static str> {
        self.events.last().map(RunEvent::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_to_session_status() {
        assert_eq!(OutcomeStatus::Verified.session_status(), SessionStatus::Completed);
        assert_eq!(
            OutcomeStatus::AcceptableError.session_status(),
            SessionStatus::Completed
        );
        assert_eq!(
            OutcomeStatus::MaxIterationsReached.session_status(),
            SessionStatus::Failed
        );
        assert!(!OutcomeStatus::MaxIterationsReached.is_success());
    }

    #[test]
    fn test_derivation_source_serialization() {
        let json = serde_json::to_value(DerivationSource::Reused { from_iteration: 1 })
            .expect("serialize");
        assert_eq!(json["kind"], "reused");
        assert_eq!(json["from_iteration"], 1);
    }

    #[test]
    fn test_builder_sets_success_from_status() {
        let outcome = OutcomeBuilder::new(
            None,
            OutcomeStatus::Failed,
            0,
            Utc::now(),
            Instant::now(),
        )
        .reason("bad request")
        .build();
        assert!(!outcome.success);
        assert!(outcome.history.is_empty());
        assert_eq!(outcome.reason.as_deref(), Some("bad request"));
        assert!(outcome.timing.finished_at >= outcome.timing.started_at);
    }
}
