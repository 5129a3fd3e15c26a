//! Progress events emitted by a run.

use serde::{Deserialize, Serialize};

use super::outcome::RunOutcome;
use crate::classifier::DiscrepancyClassification;
use crate::domain::CodeArtifacts;
use crate::extract::ParseStrategy;
use crate::oracle::Verification;
use crate::session::SessionId;

/// One element of the run's event stream.
///
/// Serialized as a flat record with a `type` discriminator. Consumers should
/// ignore types they do not recognise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    SessionCreated {
        session_id: SessionId,
    },
    IterationStart {
        iteration: u32,
    },
    /// One streamed fragment of the derivation.
    DerivationChunk {
        iteration: u32,
        content: String,
    },
    DerivationComplete {
        iteration: u32,
        full_text: String,
    },
    CodeGenerated {
        iteration: u32,
        code: CodeArtifacts,
        parse_strategy: ParseStrategy,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    VerificationResult {
        iteration: u32,
        result: Verification,
    },
    ErrorAnalysis {
        iteration: u32,
        analysis: DiscrepancyClassification,
    },
    /// Non-fatal: the iteration was abandoned and the loop moves on.
    IterationError {
        iteration: u32,
        error: String,
    },
    Success {
        result: RunOutcome,
    },
    SuccessWithWarning {
        result: RunOutcome,
    },
    Failed {
        reason: String,
        result: RunOutcome,
    },
    MaxIterationsReached {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        iterations: u32,
        result: RunOutcome,
    },
}

impl RunEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::IterationStart { .. } => "iteration_start",
            Self::DerivationChunk { .. } => "derivation_chunk",
            Self::DerivationComplete { .. } => "derivation_complete",
            Self::CodeGenerated { .. } => "code_generated",
            Self::VerificationResult { .. } => "verification_result",
            Self::ErrorAnalysis { .. } => "error_analysis",
            Self::IterationError { .. } => "iteration_error",
            Self::Success { .. } => "success",
            Self::SuccessWithWarning { .. } => "success_with_warning",
            Self::Failed { .. } => "failed",
            Self::MaxIterationsReached { .. } => "max_iterations_reached",
        }
    }

    /// The run outcome, for terminal events.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            Self::Success { result }
            | Self::SuccessWithWarning { result }
            | Self::Failed { result, .. }
            | Self::MaxIterationsReached { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn iteration(&self) -> Option<u32> {
        match self {
            Self::IterationStart { iteration }
            | Self::DerivationChunk { iteration, .. }
            | Self::DerivationComplete { iteration, .. }
            | Self::CodeGenerated { iteration, .. }
            | Self::VerificationResult { iteration, .. }
            | Self::ErrorAnalysis { iteration, .. }
            | Self::IterationError { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }
}
