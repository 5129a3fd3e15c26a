//! Bounded derive, translate, verify, classify loop.
//!
//! [`Orchestrator::run`] returns a lazy event stream. Each iteration:
//!
//! 1. stream a derivation (skipped when a code-only retry carries one over)
//! 2. translate it into function sources or coefficients
//! 3. verify numerically; a pass ends the run
//! 4. classify the discrepancy and stop, fail, or retry at the chosen scope
//!
//! Errors inside an iteration consume that iteration and never end the run.
//! Dropping the stream stops the run at its next suspension point.

pub mod events;
pub mod outcome;

use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tracing::{Instrument, Span};

use crate::classifier::{Classified, ClassifierDecision, DiscrepancyClassifier, RetryScope};
use crate::config::EngineConfig;
use crate::domain::{CodeArtifacts, FourierError, Reconstruction, Result, RunRequest};
use crate::extract::{Extractor, ParseStrategy, RepairModel, ResponseShape};
use crate::gateway::{CompletionRequest, ModelGateway};
use crate::obs;
use crate::oracle::{EvaluationErrorType, NumericalOracle, SamplingPlan, Verification};
use crate::prompts::{AnalysisContext, DefaultPrompts, PromptBuilder};
use crate::session::{CheckpointKey, NullSessionLog, SessionId, SessionSink};

pub use events::RunEvent;
pub use outcome::{
    DerivationSource, IterationRecord, OutcomeStatus, RunOutcome, RunReport, Timing,
    Visualization,
};

use outcome::OutcomeBuilder;

const INCONCLUSIVE: &str = "Error analysis inconclusive";

/// A validated translation reply.
#[derive(Debug, Clone)]
struct Translated {
    code: CodeArtifacts,
    strategy: ParseStrategy,
    warnings: Vec<String>,
}

/// Drives runs. Cheap to clone; every run is independent.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    gateway: Arc<dyn ModelGateway>,
    prompts: Arc<dyn PromptBuilder>,
    sink: Arc<dyn SessionSink>,
    oracle: NumericalOracle,
    extractor: Extractor,
    classifier: DiscrepancyClassifier,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("oracle", &self.oracle)
            .field("extractor", &self.extractor)
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator with [`DefaultPrompts`] and no session log.
    pub fn new(config: EngineConfig, gateway: Arc<dyn ModelGateway>) -> Result<Self> {
        config.validate()?;
        let oracle = NumericalOracle::new(
            config.error_threshold,
            config.zero_threshold,
            SamplingPlan {
                periods: config.test_periods,
                points: config.test_points,
            },
        );
        let prompts: Arc<dyn PromptBuilder> = Arc::new(DefaultPrompts);
        let extractor = build_extractor(&config, &gateway, &prompts);
        let classifier = build_classifier(&config, &gateway, &prompts, &extractor);
        Ok(Self {
            config: Arc::new(config),
            gateway,
            prompts,
            sink: Arc::new(NullSessionLog),
            oracle,
            extractor,
            classifier,
        })
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.extractor = build_extractor(&self.config, &self.gateway, &prompts);
        self.classifier = build_classifier(&self.config, &self.gateway, &prompts, &self.extractor);
        self.prompts = prompts;
        self
    }

    pub fn with_session_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a run. Nothing happens until the stream is polled.
    ///
    /// The last event is always terminal (`success`, `success_with_warning`,
    /// `failed` or `max_iterations_reached`) and carries the [`RunOutcome`].
    pub fn run(&self, request: RunRequest) -> BoxStream<'static, RunEvent> {
        let this = self.clone();

        Box::pin(stream! {
            let clock = Instant::now();
            let started_at = Utc::now();

            if let Err(e) = request.validate(this.config.max_terms) {
                obs::emit_run_rejected(&e);
                let result = OutcomeBuilder::new(None, OutcomeStatus::Failed, 0, started_at, clock)
                    .reason(e.to_string())
                    .build();
                yield RunEvent::Failed { reason: e.to_string(), result };
                return;
            }

            let session = match this.sink.create_session(&request).await {
                Ok(id) => id,
                Err(e) => {
                    let id = SessionId::generate();
                    obs::emit_sink_error(id.as_str(), "create_session", &e);
                    id
                }
            };
            let span = obs::run_span(session.as_str());
            span.in_scope(|| {
                obs::emit_run_started(
                    session.as_str(),
                    &request.function_expr,
                    request.period,
                    request.n_terms,
                )
            });
            yield RunEvent::SessionCreated { session_id: session.clone() };

            let max_iterations = this.config.max_iterations;
            let mut retry_hint: Option<String> = None;
            // Derivation text and the iteration that produced it.
            let mut carried: Option<(String, u32)> = None;
            let mut history: Vec<IterationRecord> = Vec::new();

            for iteration in 1..=max_iterations {
                span.in_scope(|| {
                    obs::emit_iteration_started(session.as_str(), iteration, carried.is_some())
                });
                yield RunEvent::IterationStart { iteration };
                let mut record = IterationRecord::new(iteration);

                // Stage 1: derivation.
                let derivation = match &carried {
                    Some((text, from)) => {
                        record.derivation_source = DerivationSource::Reused { from_iteration: *from };
                        text.clone()
                    }
                    None => {
                        let prompt = this.prompts.derivation(&request, retry_hint.as_deref());
                        this.checkpoint(&session, iteration, CheckpointKey::Prompt1, &prompt).await;
                        let completion = this.completion(&this.config.derivation_model, prompt);

                        let mut chunks = match this.gateway.stream(completion).instrument(span.clone()).await {
                            Ok(chunks) => chunks,
                            Err(e) => {
                                yield this.abandon(&session, &span, &mut history, record, FourierError::from(e)).await;
                                continue;
                            }
                        };
                        let mut text = String::new();
                        let mut failure = None;
                        while let Some(item) = chunks.next().await {
                            match item {
                                Ok(chunk) => {
                                    text.push_str(&chunk);
                                    yield RunEvent::DerivationChunk { iteration, content: chunk };
                                }
                                Err(e) => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        if let Some(e) = failure {
                            yield this.abandon(&session, &span, &mut history, record, FourierError::from(e)).await;
                            continue;
                        }

                        this.checkpoint(&session, iteration, CheckpointKey::Response1, &text).await;
                        record.derivation = text.clone();
                        yield RunEvent::DerivationComplete { iteration, full_text: text.clone() };
                        text
                    }
                };

                // Stage 2: translation. The hint only reaches this stage on a code-only retry.
                let hint = carried.as_ref().and(retry_hint.as_deref());
                let translated = match this
                    .translate(&session, iteration, &request, &derivation, hint)
                    .instrument(span.clone())
                    .await
                {
                    Ok(t) => t,
                    Err(e) => {
                        yield this.abandon(&session, &span, &mut history, record, e).await;
                        continue;
                    }
                };
                record.code = Some(translated.code.clone());
                yield RunEvent::CodeGenerated {
                    iteration,
                    code: translated.code.clone(),
                    parse_strategy: translated.strategy,
                    warnings: translated.warnings,
                };
                let code = translated.code;

                // Stage 3: verification.
                let verification = this.verify(&span, &code, request.period).await;
                span.in_scope(|| {
                    obs::emit_verification(
                        session.as_str(),
                        iteration,
                        verification.is_verified(),
                        verification.max_relative_error(),
                    )
                });
                this.checkpoint(&session, iteration, CheckpointKey::Verification, &verification).await;
                record.verification = Some(verification.clone());
                yield RunEvent::VerificationResult { iteration, result: verification.clone() };

                if verification.is_verified() {
                    this.checkpoint(&session, iteration, CheckpointKey::IterationRecord, &record).await;
                    history.push(record);
                    let result = OutcomeBuilder::new(
                        Some(session.clone()),
                        OutcomeStatus::Verified,
                        iteration,
                        started_at,
                        clock,
                    )
                    .artifacts(&derivation, &code, &verification)
                    .history(&history)
                    .build();
                    this.finish(&session, &span, &result).await;
                    yield RunEvent::Success { result };
                    return;
                }

                // Stage 4: discrepancy classification.
                let ctx = AnalysisContext {
                    request: &request,
                    derivation: &derivation,
                    artifacts: Some(&code),
                    verification: &verification,
                    threshold: this.config.error_threshold,
                };
                let classified = match this
                    .analyse(&session, iteration, &ctx)
                    .instrument(span.clone())
                    .await
                {
                    Ok(c) => c,
                    Err(e) => {
                        yield this.abandon(&session, &span, &mut history, record, e).await;
                        continue;
                    }
                };
                let analysis = classified.classification;
                record.classification = Some(analysis.clone());
                this.checkpoint(&session, iteration, CheckpointKey::IterationRecord, &record).await;
                history.push(record);
                yield RunEvent::ErrorAnalysis { iteration, analysis: analysis.clone() };

                let decision = analysis.decision();
                span.in_scope(|| {
                    obs::emit_analysis(
                        session.as_str(),
                        iteration,
                        analysis.error_category.as_str(),
                        decision_name(decision),
                    )
                });

                match decision {
                    ClassifierDecision::Stop => {
                        let result = OutcomeBuilder::new(
                            Some(session.clone()),
                            OutcomeStatus::AcceptableError,
                            iteration,
                            started_at,
                            clock,
                        )
                        .artifacts(&derivation, &code, &verification)
                        .analysis(&analysis)
                        .history(&history)
                        .build();
                        this.finish(&session, &span, &result).await;
                        yield RunEvent::SuccessWithWarning { result };
                        return;
                    }
                    ClassifierDecision::Inconclusive => {
                        let result = OutcomeBuilder::new(
                            Some(session.clone()),
                            OutcomeStatus::Failed,
                            iteration,
                            started_at,
                            clock,
                        )
                        .reason(INCONCLUSIVE)
                        .artifacts(&derivation, &code, &verification)
                        .analysis(&analysis)
                        .history(&history)
                        .build();
                        this.finish(&session, &span, &result).await;
                        yield RunEvent::Failed { reason: INCONCLUSIVE.to_string(), result };
                        return;
                    }
                    ClassifierDecision::Retry(scope) => {
                        retry_hint = analysis.suggestion_to_ai.clone();
                        carried = match scope {
                            RetryScope::CodeOnly => {
                                let from = carried.as_ref().map_or(iteration, |(_, from)| *from);
                                Some((derivation, from))
                            }
                            RetryScope::Derivation => None,
                        };
                    }
                }
            }

            let reason = format!("Max iterations ({max_iterations}) reached");
            let result = OutcomeBuilder::new(
                Some(session.clone()),
                OutcomeStatus::MaxIterationsReached,
                max_iterations,
                started_at,
                clock,
            )
            .reason(reason)
            .history(&history)
            .build();
            this.finish(&session, &span, &result).await;
            yield RunEvent::MaxIterationsReached {
                session_id: Some(session),
                iterations: max_iterations,
                result,
            };
        })
    }

    /// Drive a run to completion and collect every event.
    pub async fn run_to_end(&self, request: RunRequest) -> RunReport {
        let events: Vec<RunEvent> = self.run(request).collect().await;
        let outcome = events.last().and_then(RunEvent::outcome).cloned();
        RunReport { events, outcome }
    }

    fn completion(&self, model: &str, prompt: String) -> CompletionRequest {
        CompletionRequest::new(model, prompt)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature)
    }

    async fn translate(
        &self,
        session: &SessionId,
        iteration: u32,
        request: &RunRequest,
        derivation: &str,
        hint: Option<&str>,
    ) -> Result<Translated> {
        let mode = self.config.translation_mode;
        let prompt = self.prompts.translation(request, derivation, mode, hint);
        self.checkpoint(session, iteration, CheckpointKey::Prompt2, &prompt)
            .await;

        let reply = self
            .gateway
            .complete(self.completion(&self.config.derivation_model, prompt))
            .await?;
        let extraction = self
            .extractor
            .extract(&reply, &ResponseShape::translation(mode))
            .await?;
        self.checkpoint(session, iteration, CheckpointKey::Response2, &extraction.value)
            .await;

        let code = CodeArtifacts::from_translation(&extraction.value, request.n_terms as usize)?;
        Ok(Translated {
            code,
            strategy: extraction.strategy,
            warnings: extraction.warnings,
        })
    }

    /// Sampling is CPU-bound, so it runs on the blocking pool.
    async fn verify(&self, span: &Span, code: &CodeArtifacts, period: f64) -> Verification {
        let oracle = self.oracle.clone();
        let code = code.clone();
        let span = span.clone();
        let task = tokio::task::spawn_blocking(move || {
            span.in_scope(|| match &code.reconstruction {
                Reconstruction::Source { source } => {
                    oracle.verify_functions(&code.original_function, source, period)
                }
                Reconstruction::Coefficients { coefficients } => {
                    oracle.verify_coefficients(&code.original_function, coefficients, period)
                }
            })
        });
        match task.await {
            Ok(verification) => verification,
            Err(e) => Verification::failed(
                EvaluationErrorType::VerificationException,
                format!("verification task failed: {e}"),
            ),
        }
    }

    async fn analyse(
        &self,
        session: &SessionId,
        iteration: u32,
        ctx: &AnalysisContext<'_>,
    ) -> Result<Classified> {
        let prompt = self.classifier.prompt(ctx);
        self.checkpoint(session, iteration, CheckpointKey::Prompt3, &prompt)
            .await;
        let classified = self.classifier.classify_prompt(prompt).await?;
        self.checkpoint(
            session,
            iteration,
            CheckpointKey::ErrorAnalysis,
            &classified.classification,
        )
        .await;
        Ok(classified)
    }

    /// Record a failed iteration and build its event.
    async fn abandon(
        &self,
        session: &SessionId,
        span: &Span,
        history: &mut Vec<IterationRecord>,
        mut record: IterationRecord,
        error: FourierError,
    ) -> RunEvent {
        let iteration = record.iteration;
        span.in_scope(|| obs::emit_iteration_error(session.as_str(), iteration, &error));
        record.error = Some(error.to_string());
        self.checkpoint(session, iteration, CheckpointKey::IterationRecord, &record)
            .await;
        history.push(record);
        RunEvent::IterationError {
            iteration,
            error: error.to_string(),
        }
    }

    async fn finish(&self, session: &SessionId, span: &Span, outcome: &RunOutcome) {
        span.in_scope(|| {
            obs::emit_run_finished(
                session.as_str(),
                outcome.status.as_str(),
                outcome.iterations,
                outcome.timing.duration_ms,
                outcome.success,
            )
        });
        let value = match serde_json::to_value(outcome) {
            Ok(v) => v,
            Err(e) => {
                obs::emit_sink_error(session.as_str(), "final_result", &e);
                return;
            }
        };
        if let Err(e) = self
            .sink
            .finish(session, outcome.status.session_status(), &value)
            .await
        {
            obs::emit_sink_error(session.as_str(), "final_result", &e);
        }
    }

    /// Append a checkpoint; failures are logged and swallowed.
    async fn checkpoint<T: Serialize + ?Sized>(
        &self,
        session: &SessionId,
        iteration: u32,
        key: CheckpointKey,
        value: &T,
    ) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                obs::emit_sink_error(session.as_str(), key.as_str(), &e);
                return;
            }
        };
        if let Err(e) = self.sink.append(session, Some(iteration), key, &value).await {
            obs::emit_sink_error(session.as_str(), key.as_str(), &e);
        }
    }
}

fn decision_name(decision: ClassifierDecision) -> &'static str {
    match decision {
        ClassifierDecision::Stop => "stop",
        ClassifierDecision::Inconclusive => "inconclusive",
        ClassifierDecision::Retry(RetryScope::Derivation) => "retry_derivation",
        ClassifierDecision::Retry(RetryScope::CodeOnly) => "retry_code_only",
    }
}

fn build_extractor(
    config: &EngineConfig,
    gateway: &Arc<dyn ModelGateway>,
    prompts: &Arc<dyn PromptBuilder>,
) -> Extractor {
    match &config.repair_model {
        Some(model) => Extractor::with_repair(RepairModel {
            gateway: Arc::clone(gateway),
            prompts: Arc::clone(prompts),
            model: model.clone(),
            max_tokens: config.max_tokens,
        }),
        None => Extractor::new(),
    }
}

fn build_classifier(
    config: &EngineConfig,
    gateway: &Arc<dyn ModelGateway>,
    prompts: &Arc<dyn PromptBuilder>,
    extractor: &Extractor,
) -> DiscrepancyClassifier {
    DiscrepancyClassifier::new(
        Arc::clone(gateway),
        Arc::clone(prompts),
        config.analysis_model.clone(),
    )
    .with_extractor(extractor.clone())
    .with_max_tokens(config.max_tokens)
    .with_temperature(config.temperature)
}
