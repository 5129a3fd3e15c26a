//! Sampling, evaluation and the verification verdict.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::metrics::{self, ErrorMetrics};
use crate::domain::Coefficients;
use crate::expr::{compile_function, CompiledFunction, EvalError};

/// A function the oracle can evaluate at a sample point.
pub trait SampledFunction {
    fn sample(&self, t: f64) -> Result<f64, EvalError>;
}

impl SampledFunction for CompiledFunction {
    fn sample(&self, t: f64) -> Result<f64, EvalError> {
        self.eval(t)
    }
}

/// Reconstruction synthesised from coefficients.
#[derive(Debug, Clone)]
pub struct CoefficientSeries {
    pub coefficients: Coefficients,
    pub period: f64,
}

impl SampledFunction for CoefficientSeries {
    fn sample(&self, t: f64) -> Result<f64, EvalError> {
        Ok(self.coefficients.evaluate(t, self.period))
    }
}

/// Adapter for plain closures.
pub struct FromFn<F>(pub F);

impl<F> SampledFunction for FromFn<F>
where
    F: Fn(f64) -> f64,
{
    fn sample(&self, t: f64) -> Result<f64, EvalError> {
        Ok((self.0)(t))
    }
}

/// Sample points: `points` evenly spaced over `[0, periods × period)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingPlan {
    pub periods: u32,
    pub points: usize,
}

impl Default for SamplingPlan {
    fn default() -> Self {
        Self {
            periods: 2,
            points: 500,
        }
    }
}

impl SamplingPlan {
    pub fn sample_points(&self, period: f64) -> Vec<f64> {
        let span = self.periods as f64 * period;
        let n = self.points as f64;
        (0..self.points).map(|i| i as f64 * span / n).collect()
    }
}

/// Why verification could not produce numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationErrorType {
    /// Source failed to compile, or raised / went non-finite at a sample point.
    CodeExecutionError,
    /// Anything else that stopped the comparison.
    VerificationException,
}

impl EvaluationErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeExecutionError => "code_execution_error",
            Self::VerificationException => "verification_exception",
        }
    }
}

/// Numbers produced by a completed comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_verified: bool,
    pub error_metrics: ErrorMetrics,
    pub test_points: Vec<f64>,
    pub original_values: Vec<f64>,
    pub reconstructed_values: Vec<f64>,
    pub pointwise_errors: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<Coefficients>,
}

/// An evaluation failure, reported in place of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    pub error_type: EvaluationErrorType,
    pub error_message: String,
}

/// Outcome of one oracle invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Verification {
    Completed(VerificationResult),
    EvaluationFailed(EvaluationFailure),
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Completed(r) if r.is_verified)
    }

    pub fn result(&self) -> Option<&VerificationResult> {
        match self {
            Self::Completed(r) => Some(r),
            Self::EvaluationFailed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&EvaluationFailure> {
        match self {
            Self::Completed(_) => None,
            Self::EvaluationFailed(f) => Some(f),
        }
    }

    /// Max relative error, when numbers exist.
    pub fn max_relative_error(&self) -> Option<f64> {
        self.result().map(|r| r.error_metrics.max_relative_error)
    }

    pub(crate) fn failed(error_type: EvaluationErrorType, message: impl Into<String>) -> Self {
        Self::EvaluationFailed(EvaluationFailure {
            error_type,
            error_message: message.into(),
        })
    }
}

/// Deterministic comparison of an original function against a reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericalOracle {
    pub threshold: f64,
    pub zero_threshold: f64,
    pub plan: SamplingPlan,
}

impl Default for NumericalOracle {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            zero_threshold: 1e-6,
            plan: SamplingPlan::default(),
        }
    }
}

impl NumericalOracle {
    pub fn new(threshold: f64, zero_threshold: f64, plan: SamplingPlan) -> Self {
        Self {
            threshold,
            zero_threshold,
            plan,
        }
    }

    /// Compile both sources (`f` and `reconstruct`) and compare them.
    pub fn verify_functions(
        &self,
        original_src: &str,
        reconstruction_src: &str,
        period: f64,
    ) -> Verification {
        let original = match compile_function(original_src, "f") {
            Ok(f) => f,
            Err(e) => return compile_failure("original function", e),
        };
        let reconstruction = match compile_function(reconstruction_src, "reconstruct") {
            Ok(f) => f,
            Err(e) => return compile_failure("reconstruction function", e),
        };
        self.verify_callables(&original, &reconstruction, period)
    }

    /// Compile the original and compare it against a coefficient series.
    pub fn verify_coefficients(
        &self,
        original_src: &str,
        coefficients: &Coefficients,
        period: f64,
    ) -> Verification {
        if coefficients.an.len() != coefficients.bn.len() {
            return Verification::failed(
                EvaluationErrorType::VerificationException,
                format!(
                    "coefficient lists differ in length: an={}, bn={}",
                    coefficients.an.len(),
                    coefficients.bn.len()
                ),
            );
        }
        let original = match compile_function(original_src, "f") {
            Ok(f) => f,
            Err(e) => return compile_failure("original function", e),
        };
        let series = CoefficientSeries {
            coefficients: coefficients.clone(),
            period,
        };
        match self.verify_callables(&original, &series, period) {
            Verification::Completed(mut result) => {
                result.coefficients = Some(coefficients.clone());
                Verification::Completed(result)
            }
            failed => failed,
        }
    }

    /// Compare any two sampled functions.
    pub fn verify_callables(
        &self,
        original: &dyn SampledFunction,
        reconstruction: &dyn SampledFunction,
        period: f64,
    ) -> Verification {
        if !(period.is_finite() && period > 0.0) {
            return Verification::failed(
                EvaluationErrorType::VerificationException,
                format!("period must be finite and positive, got {period}"),
            );
        }
        if self.plan.points == 0 || self.plan.periods == 0 {
            return Verification::failed(
                EvaluationErrorType::VerificationException,
                "sampling plan has no points",
            );
        }

        let points = self.plan.sample_points(period);
        let original_values = match evaluate(original, &points) {
            Ok(v) => v,
            Err(e) => return evaluation_failure(e),
        };
        let reconstructed_values = match evaluate(reconstruction, &points) {
            Ok(v) => v,
            Err(e) => return evaluation_failure(e),
        };

        let (error_metrics, pointwise_errors) = metrics::compute(
            &points,
            &original_values,
            &reconstructed_values,
            self.zero_threshold,
        );
        let is_verified = error_metrics.max_relative_error < self.threshold;

        info!(
            verified = is_verified,
            max_relative_error = error_metrics.max_relative_error,
            pattern = %error_metrics.error_pattern,
            "verification finished"
        );

        Verification::Completed(VerificationResult {
            is_verified,
            error_metrics,
            test_points: points,
            original_values,
            reconstructed_values,
            pointwise_errors,
            coefficients: None,
        })
    }
}

fn evaluate(f: &dyn SampledFunction, points: &[f64]) -> Result<Vec<f64>, EvalError> {
    points
        .iter()
        .map(|&t| {
            let value = f.sample(t)?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(EvalError::NonFinite { t, value })
            }
        })
        .collect()
}

fn compile_failure(what: &str, err: EvalError) -> Verification {
    debug!(error = %err, "{what} failed to compile");
    Verification::failed(
        EvaluationErrorType::CodeExecutionError,
        format!("Error compiling {what}: {err}"),
    )
}

fn evaluation_failure(err: EvalError) -> Verification {
    debug!(error = %err, "function evaluation failed");
    Verification::failed(
        EvaluationErrorType::CodeExecutionError,
        format!("Error evaluating functions: {err}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{PI, TAU};

    fn sine_coefficients(b1: f64) -> Coefficients {
        Coefficients {
            a0: 0.0,
            an: vec![0.0],
            bn: vec![b1],
        }
    }

    #[test]
    fn test_sample_points_half_open() {
        let plan = SamplingPlan {
            periods: 2,
            points: 4,
        };
        assert_eq!(plan.sample_points(1.0), vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_perfect_sine_is_verified() {
        let oracle = NumericalOracle::default();
        let v = oracle.verify_coefficients("np.sin(t)", &sine_coefficients(1.0), TAU);
        assert!(v.is_verified());
        let result = v.result().expect("completed");
        assert!(result.error_metrics.max_relative_error < 1e-12);
        assert_eq!(result.test_points.len(), 500);
        assert_eq!(result.coefficients, Some(sine_coefficients(1.0)));
    }

    #[test]
    fn test_scaled_sine_is_uniform_and_unverified() {
        let oracle = NumericalOracle::default();
        let v = oracle.verify_coefficients("np.sin(t)", &sine_coefficients(1.5), TAU);
        assert!(!v.is_verified());
        let result = v.result().expect("completed");
        assert_eq!(result.error_metrics.error_pattern, metrics::ErrorPattern::Uniform);
    }

    #[test]
    fn test_function_sources() {
        let oracle = NumericalOracle::default();
        let v = oracle.verify_functions(
            "def f(t):\n    return np.cos(t)",
            "def reconstruct(t):\n    return math.cos(t)",
            TAU,
        );
        assert!(v.is_verified());
    }

    #[test]
    fn test_compile_error_is_code_execution_error() {
        let oracle = NumericalOracle::default();
        let v = oracle.verify_functions("def f(t):\n    return np.sin(", "np.sin(t)", TAU);
        let failure = v.failure().expect("failure");
        assert_eq!(failure.error_type, EvaluationErrorType::CodeExecutionError);
        assert!(!v.is_verified());
    }

    #[test]
    fn test_non_finite_is_code_execution_error() {
        let oracle = NumericalOracle::default();
        let v = oracle.verify_functions("1 / t", "0", TAU);
        let failure = v.failure().expect("failure");
        assert_eq!(failure.error_type, EvaluationErrorType::CodeExecutionError);
    }

    #[test]
    fn test_error_equal_to_threshold_is_not_verified() {
        let threshold = metrics::relative_error(1.0, 1.05, 1e-6);
        let oracle = NumericalOracle::new(threshold, 1e-6, SamplingPlan::default());
        let v = oracle.verify_callables(&FromFn(|_| 1.0), &FromFn(|_| 1.05), TAU);
        let result = v.result().expect("completed");
        assert_eq!(result.error_metrics.max_relative_error, threshold);
        assert!(!v.is_verified());

        let looser = NumericalOracle::new(threshold * 1.01, 1e-6, SamplingPlan::default());
        assert!(looser
            .verify_callables(&FromFn(|_| 1.0), &FromFn(|_| 1.05), TAU)
            .is_verified());
    }

    #[test]
    fn test_runaway_generators_fail_without_panicking() {
        let oracle = NumericalOracle::default();
        for reconstruction in [
            "sum(1 for n in range(1e300))",
            "sum(0*n for n in range(-1e300, 1e300))",
            "sum(sum(1 for m in range(100000)) for n in range(100000))",
        ] {
            let v = oracle.verify_functions("np.sin(t)", reconstruction, TAU);
            let failure = v.failure().expect("failure");
            assert_eq!(failure.error_type, EvaluationErrorType::CodeExecutionError);
        }
    }

    #[test]
    fn test_bad_period_is_verification_exception() {
        let oracle = NumericalOracle::default();
        let v = oracle.verify_callables(&FromFn(f64::sin), &FromFn(f64::sin), -1.0);
        let failure = v.failure().expect("failure");
        assert_eq!(failure.error_type, EvaluationErrorType::VerificationException);
    }

    #[test]
    fn test_idempotent_metrics() {
        let oracle = NumericalOracle::default();
        let first = oracle.verify_functions("np.exp(np.sin(t))", "1 + np.sin(t)", TAU);
        let second = oracle.verify_functions("np.exp(np.sin(t))", "1 + np.sin(t)", TAU);
        let (a, b) = (first.result().expect("a"), second.result().expect("b"));
        assert_eq!(
            a.error_metrics.max_relative_error.to_bits(),
            b.error_metrics.max_relative_error.to_bits()
        );
        assert_eq!(
            a.error_metrics.mean_absolute_error.to_bits(),
            b.error_metrics.mean_absolute_error.to_bits()
        );
    }

    #[test]
    fn test_square_wave_gibbs() {
        let n_terms = 15;
        let bn: Vec<f64> = (1..=n_terms)
            .map(|n| if n % 2 == 1 { 4.0 / (n as f64 * PI) } else { 0.0 })
            .collect();
        let coefficients = Coefficients {
            a0: 0.0,
            an: vec![0.0; n_terms],
            bn,
        };
        let oracle = NumericalOracle::default();
        let v = oracle.verify_coefficients(
            "np.where(np.sin(t) >= 0, 1.0, -1.0)",
            &coefficients,
            TAU,
        );
        let result = v.result().expect("completed");
        assert!(!result.is_verified);
        assert_eq!(
            result.error_metrics.error_pattern,
            metrics::ErrorPattern::PeakAtDiscontinuities
        );
    }

    #[test]
    fn test_failure_serializes_flat() {
        let v = Verification::failed(EvaluationErrorType::CodeExecutionError, "boom");
        let json = serde_json::to_value(&v).expect("serialize");
        assert_eq!(json["error_type"], "code_execution_error");
        assert_eq!(json["error_message"], "boom");
    }
}
