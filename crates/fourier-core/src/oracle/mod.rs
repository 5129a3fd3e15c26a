//! Numerical oracle.
//!
//! Evaluates an original function and a candidate reconstruction at identical
//! sample points and reports pointwise errors, aggregates and an error-pattern
//! tag. Evaluation failures come back as a [`Verification::EvaluationFailed`]
//! value, never as a panic or an `Err`.

pub mod metrics;
pub mod verify;

pub use metrics::{relative_error, ErrorMetrics, ErrorPattern};
pub use verify::{
    CoefficientSeries, EvaluationErrorType, EvaluationFailure, FromFn, NumericalOracle,
    SampledFunction, SamplingPlan, Verification, VerificationResult,
};
