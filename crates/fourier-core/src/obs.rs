//! Structured observability hooks for the derive-translate-verify loop.
//!
//! This module provides:
//! - Session-scoped tracing spans via `RunSpan` RAII guard and [`run_span`]
//! - Emission functions for key lifecycle events: start, iteration, verification, analysis, finish
//!
//! Events are emitted at `info!` level (configurable via `FOURIER_LOG` env var).

use tracing::{info, warn, Span};

/// RAII guard that enters a session-scoped span for synchronous sections.
///
/// The entered guard is not `Send`; async code instruments futures with
/// [`run_span`] instead.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("session_20240101_120000_abcdef01");
/// // every tracing call here carries session_id
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the session id.
    pub fn enter(session_id: &str) -> Self {
        Self {
            _span: run_span(session_id).entered(),
        }
    }
}

/// Span tagged with the session id, for `Instrument`.
pub fn run_span(session_id: &str) -> Span {
    tracing::info_span!("fourier.run", session_id = %session_id)
}

/// Emit event: run started.
///
/// # Example
///
/// ```ignore
/// emit_run_started("session_x", "np.sin(t)", 6.28, 3);
/// // logs: event=run.started session_id=session_x function=np.sin(t) period=6.28 n_terms=3
/// ```
pub fn emit_run_started(session_id: &str, function_expr: &str, period: f64, n_terms: u32) {
    info!(
        event = "run.started",
        session_id = %session_id,
        function = %function_expr,
        period = period,
        n_terms = n_terms,
    );
}

/// Emit event: run rejected before a session was created.
pub fn emit_run_rejected(error: &dyn std::fmt::Display) {
    warn!(event = "run.rejected", error = %error);
}

/// Emit event: iteration started, noting whether the derivation is carried over.
pub fn emit_iteration_started(session_id: &str, iteration: u32, derivation_reused: bool) {
    info!(
        event = "iteration.started",
        session_id = %session_id,
        iteration = iteration,
        derivation_reused = derivation_reused,
    );
}

/// Emit event: verification finished.
pub fn emit_verification(
    session_id: &str,
    iteration: u32,
    verified: bool,
    max_relative_error: Option<f64>,
) {
    info!(
        event = "iteration.verified",
        session_id = %session_id,
        iteration = iteration,
        verified = verified,
        max_relative_error = max_relative_error,
    );
}

/// Emit event: discrepancy classified and decision taken.
pub fn emit_analysis(session_id: &str, iteration: u32, category: &str, decision: &str) {
    info!(
        event = "iteration.analysed",
        session_id = %session_id,
        iteration = iteration,
        category = %category,
        decision = %decision,
    );
}

/// Emit event: iteration aborted by an error (warning level).
pub fn emit_iteration_error(session_id: &str, iteration: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "iteration.error",
        session_id = %session_id,
        iteration = iteration,
        error = %error,
    );
}

/// Emit event: run finished with terminal status, iteration count and duration.
pub fn emit_run_finished(
    session_id: &str,
    status: &str,
    iterations: u32,
    duration_ms: u64,
    success: bool,
) {
    info!(
        event = "run.finished",
        session_id = %session_id,
        status = %status,
        iterations = iterations,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: session log write failed (warning level).
pub fn emit_sink_error(session_id: &str, checkpoint: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "session.write_error",
        session_id = %session_id,
        checkpoint = %checkpoint,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        // Just ensure RunSpan::enter doesn't panic
        let _span = RunSpan::enter("session_20240101_120000_abcdef01");
    }

    #[test]
    fn test_emitters_without_subscriber() {
        emit_run_started("s", "np.sin(t)", 1.0, 1);
        emit_iteration_started("s", 1, false);
        emit_verification("s", 1, true, Some(0.0));
        emit_analysis("s", 1, "unknown", "stop");
        emit_iteration_error("s", 1, &"boom");
        emit_run_finished("s", "verified", 1, 3, true);
        emit_sink_error("s", "prompt_1", &"disk full");
        emit_run_rejected(&"bad period");
    }
}
