//! Fourier Core Library
//!
//! LLM-derived Fourier series, cross-checked against a numerical oracle, with
//! a bounded retry loop driven by a model-side discrepancy classifier.

pub mod classifier;
pub mod config;
pub mod domain;
pub mod expr;
pub mod extract;
pub mod fakes;
pub mod gateway;
pub mod obs;
pub mod oracle;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod telemetry;

pub use classifier::{
    ClassifierDecision, ClassifierError, DiscrepancyClassification, DiscrepancyClassifier,
    ErrorCategory, RecalculationTarget, RetryScope, Severity,
};
pub use config::{AnthropicConfig, EngineConfig, TranslationMode};
pub use domain::{
    CodeArtifacts, Coefficients, FourierError, Reconstruction, Result, RunRequest,
    TranslationError,
};
pub use expr::{compile_function, CompiledFunction, EvalError};
pub use extract::{Extraction, Extractor, ParseError, ParseStrategy, RepairModel, ResponseShape};
pub use gateway::{AnthropicGateway, CompletionRequest, GatewayError, ModelGateway, TextStream};
pub use oracle::{
    relative_error, ErrorMetrics, ErrorPattern, NumericalOracle, SamplingPlan, Verification,
    VerificationResult,
};
pub use orchestrator::{
    DerivationSource, IterationRecord, Orchestrator, OutcomeStatus, RunEvent, RunOutcome,
    RunReport,
};
pub use prompts::{AnalysisContext, DefaultPrompts, PromptBuilder};
pub use session::{
    CheckpointKey, FsSessionLog, NullSessionLog, SessionError, SessionId, SessionSink,
    SessionStatus,
};
pub use telemetry::init_tracing;

/// Crate version, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
