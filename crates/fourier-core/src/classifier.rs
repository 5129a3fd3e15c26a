//! Discrepancy classifier.
//!
//! Asks the model why a verification failed and turns the reply into a
//! [`DiscrepancyClassification`]. Missing or out-of-set fields are defaulted,
//! never raised, so a sloppy analysis reply cannot abort a run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::extract::{Extractor, ParseError, ParseStrategy, ResponseShape};
use crate::gateway::{CompletionRequest, GatewayError, ModelGateway};
use crate::prompts::{AnalysisContext, PromptBuilder};

/// Errors raised while obtaining a classification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    #[error("analysis call failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("analysis reply unreadable: {0}")]
    Parse(#[from] ParseError),
}

/// Closed set of discrepancy causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    GibbsPhenomenon,
    InsufficientTerms,
    DerivationError,
    CodeTranslationError,
    NumericalPrecision,
    #[default]
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GibbsPhenomenon => "gibbs_phenomenon",
            Self::InsufficientTerms => "insufficient_terms",
            Self::DerivationError => "derivation_error",
            Self::CodeTranslationError => "code_translation_error",
            Self::NumericalPrecision => "numerical_precision",
            Self::Unknown => "unknown",
        }
    }

    /// Anything outside the set maps to `Unknown`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "gibbs_phenomenon" => Self::GibbsPhenomenon,
            "insufficient_terms" => Self::InsufficientTerms,
            "derivation_error" => Self::DerivationError,
            "code_translation_error" => Self::CodeTranslationError,
            "numerical_precision" => Self::NumericalPrecision,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Acceptable,
    #[default]
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acceptable => "acceptable",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acceptable" => Some(Self::Acceptable),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the model asked the next attempt to restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalculationTarget {
    Derivation,
    CodeOnly,
}

impl RecalculationTarget {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "derivation" => Some(Self::Derivation),
            "code_only" => Some(Self::CodeOnly),
            _ => None,
        }
    }
}

/// Scope of the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Discard the derivation and start over.
    Derivation,
    /// Keep the derivation, regenerate the translation only.
    CodeOnly,
}

/// What the orchestrator does with a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierDecision {
    /// Accept the unverified result with a warning.
    Stop,
    /// Neither stop nor retry was requested.
    Inconclusive,
    Retry(RetryScope),
}

const DEFAULT_EXPLANATION: &str = "The error analysis did not include an explanation.";
const DEFAULT_SUGGESTION: &str = "Review the verification result and try again.";

/// Validated error-analysis reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyClassification {
    pub error_category: ErrorCategory,
    pub severity: Severity,
    pub need_recalculation: bool,
    pub recalculation_target: Option<RecalculationTarget>,
    pub explanation: String,
    pub suggestion_to_user: String,
    pub suggestion_to_ai: Option<String>,
    pub auto_stop: bool,
    /// Fields that were missing or invalid and replaced by defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defaulted_fields: Vec<String>,
}

impl DiscrepancyClassification {
    /// Build from a parsed reply, defaulting anything missing or malformed.
    ///
    /// Defaults lean towards stopping: unknown category, warning severity,
    /// no recalculation, `auto_stop = true`.
    pub fn from_value(value: &Value) -> Self {
        let empty = Map::new();
        let obj = value.as_object().unwrap_or(&empty);
        let mut defaulted = Vec::new();

        let error_category = match obj.get("error_category").and_then(Value::as_str) {
            Some(s) => {
                let category = ErrorCategory::parse_lenient(s);
                if category == ErrorCategory::Unknown && s.trim() != "unknown" {
                    defaulted.push("error_category".to_string());
                }
                category
            }
            None => {
                defaulted.push("error_category".to_string());
                ErrorCategory::Unknown
            }
        };

        let severity = obj
            .get("severity")
            .and_then(Value::as_str)
            .and_then(Severity::parse)
            .unwrap_or_else(|| {
                defaulted.push("severity".to_string());
                Severity::default()
            });

        let need_recalculation = flag(obj, "need_recalculation").unwrap_or_else(|| {
            defaulted.push("need_recalculation".to_string());
            false
        });

        let recalculation_target = match obj.get("recalculation_target") {
            None => {
                defaulted.push("recalculation_target".to_string());
                None
            }
            Some(Value::Null) => None,
            Some(v) => {
                let target = v.as_str().and_then(RecalculationTarget::parse);
                if target.is_none() {
                    defaulted.push("recalculation_target".to_string());
                }
                target
            }
        };

        let explanation = text(obj, "explanation").unwrap_or_else(|| {
            defaulted.push("explanation".to_string());
            DEFAULT_EXPLANATION.to_string()
        });

        let suggestion_to_user = text(obj, "suggestion_to_user").unwrap_or_else(|| {
            defaulted.push("suggestion_to_user".to_string());
            DEFAULT_SUGGESTION.to_string()
        });

        let suggestion_to_ai = text(obj, "suggestion_to_ai").filter(|s| !s.trim().is_empty());

        let auto_stop = flag(obj, "auto_stop").unwrap_or_else(|| {
            defaulted.push("auto_stop".to_string());
            true
        });

        Self {
            error_category,
            severity,
            need_recalculation,
            recalculation_target,
            explanation,
            suggestion_to_user,
            suggestion_to_ai,
            auto_stop,
            defaulted_fields: defaulted,
        }
    }

    pub fn decision(&self) -> ClassifierDecision {
        if self.auto_stop {
            return ClassifierDecision::Stop;
        }
        if !self.need_recalculation {
            return ClassifierDecision::Inconclusive;
        }
        match (self.error_category, self.recalculation_target) {
            (ErrorCategory::CodeTranslationError, Some(RecalculationTarget::CodeOnly)) => {
                ClassifierDecision::Retry(RetryScope::CodeOnly)
            }
            _ => ClassifierDecision::Retry(RetryScope::Derivation),
        }
    }
}

fn flag(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// A classification plus how its reply was recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub classification: DiscrepancyClassification,
    pub strategy: ParseStrategy,
}

/// Runs the error-analysis completion and validates the reply.
#[derive(Clone)]
pub struct DiscrepancyClassifier {
    gateway: Arc<dyn ModelGateway>,
    prompts: Arc<dyn PromptBuilder>,
    extractor: Extractor,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for DiscrepancyClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscrepancyClassifier")
            .field("model", &self.model)
            .field("extractor", &self.extractor)
            .finish()
    }
}

impl DiscrepancyClassifier {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        prompts: Arc<dyn PromptBuilder>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            prompts,
            extractor: Extractor::new(),
            model: model.into(),
            max_tokens: 8192,
            temperature: 0.0,
        }
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// The analysis prompt for `ctx`.
    pub fn prompt(&self, ctx: &AnalysisContext<'_>) -> String {
        self.prompts.error_analysis(ctx)
    }

    /// Build the prompt for `ctx` and classify.
    pub async fn classify(
        &self,
        ctx: &AnalysisContext<'_>,
    ) -> Result<DiscrepancyClassification, ClassifierError> {
        let prompt = self.prompt(ctx);
        Ok(self.classify_prompt(prompt).await?.classification)
    }

    /// Send an already-built analysis prompt and validate the reply.
    pub async fn classify_prompt(&self, prompt: String) -> Result<Classified, ClassifierError> {
        let request = CompletionRequest::new(&self.model, prompt)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);
        let reply = self.gateway.complete(request).await?;
        let extraction = self
            .extractor
            .extract(&reply, &ResponseShape::analysis())
            .await?;

        let classification = DiscrepancyClassification::from_value(&extraction.value);
        if !classification.defaulted_fields.is_empty() {
            warn!(
                fields = ?classification.defaulted_fields,
                "error analysis fields defaulted"
            );
        }
        info!(
            category = %classification.error_category,
            severity = %classification.severity,
            need_recalculation = classification.need_recalculation,
            auto_stop = classification.auto_stop,
            "error analysis classified"
        );
        Ok(Classified {
            classification,
            strategy: extraction.strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::domain::RunRequest;
    use crate::fakes::ScriptedGateway;
    use crate::oracle::{EvaluationErrorType, EvaluationFailure, Verification};
    use crate::prompts::DefaultPrompts;

    fn full() -> Value {
        json!({
            "error_category": "derivation_error",
            "severity": "critical",
            "need_recalculation": true,
            "recalculation_target": "derivation",
            "explanation": "b1 has the wrong sign",
            "suggestion_to_user": "wait for the retry",
            "suggestion_to_ai": "check the sign of b1",
            "auto_stop": false
        })
    }

    #[test]
    fn test_complete_reply() {
        let c = DiscrepancyClassification::from_value(&full());
        assert_eq!(c.error_category, ErrorCategory::DerivationError);
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.recalculation_target, Some(RecalculationTarget::Derivation));
        assert_eq!(c.suggestion_to_ai.as_deref(), Some("check the sign of b1"));
        assert!(c.defaulted_fields.is_empty());
        assert_eq!(c.decision(), ClassifierDecision::Retry(RetryScope::Derivation));
    }

    #[test]
    fn test_missing_severity_defaults_to_warning() {
        let mut reply = full();
        reply.as_object_mut().expect("object").remove("severity");
        let c = DiscrepancyClassification::from_value(&reply);
        assert_eq!(c.severity, Severity::Warning);
        assert_eq!(c.defaulted_fields, vec!["severity".to_string()]);
        assert_eq!(
            serde_json::to_value(&c).expect("serialize")["severity"],
            "warning"
        );
    }

    #[test]
    fn test_empty_reply_uses_conservative_defaults() {
        let c = DiscrepancyClassification::from_value(&json!({}));
        assert_eq!(c.error_category, ErrorCategory::Unknown);
        assert_eq!(c.severity, Severity::Warning);
        assert!(!c.need_recalculation);
        assert_eq!(c.recalculation_target, None);
        assert!(c.auto_stop);
        assert_eq!(c.decision(), ClassifierDecision::Stop);
        assert_eq!(c.defaulted_fields.len(), 7);
    }

    #[test]
    fn test_out_of_set_category_is_unknown() {
        let mut reply = full();
        reply["error_category"] = json!("cosmic_rays");
        let c = DiscrepancyClassification::from_value(&reply);
        assert_eq!(c.error_category, ErrorCategory::Unknown);
        assert!(c.defaulted_fields.contains(&"error_category".to_string()));
    }

    #[test]
    fn test_code_only_needs_translation_category() {
        let mut reply = full();
        reply["error_category"] = json!("code_translation_error");
        reply["recalculation_target"] = json!("code_only");
        let c = DiscrepancyClassification::from_value(&reply);
        assert_eq!(c.decision(), ClassifierDecision::Retry(RetryScope::CodeOnly));

        reply["error_category"] = json!("derivation_error");
        let c = DiscrepancyClassification::from_value(&reply);
        assert_eq!(c.decision(), ClassifierDecision::Retry(RetryScope::Derivation));
    }

    #[test]
    fn test_unspecified_target_restarts_derivation() {
        let mut reply = full();
        reply["recalculation_target"] = Value::Null;
        let c = DiscrepancyClassification::from_value(&reply);
        assert_eq!(c.decision(), ClassifierDecision::Retry(RetryScope::Derivation));
    }

    #[test]
    fn test_inconclusive() {
        let mut reply = full();
        reply["need_recalculation"] = json!(false);
        let c = DiscrepancyClassification::from_value(&reply);
        assert_eq!(c.decision(), ClassifierDecision::Inconclusive);
    }

    #[test]
    fn test_string_booleans_accepted() {
        let mut reply = full();
        reply["auto_stop"] = json!("true");
        let c = DiscrepancyClassification::from_value(&reply);
        assert!(c.auto_stop);
        assert!(c.defaulted_fields.is_empty());
    }

    #[tokio::test]
    async fn test_classify_through_gateway() {
        let reply = format!("```json\n{}\n```", serde_json::to_string_pretty(&full()).expect("json"));
        let gateway = Arc::new(ScriptedGateway::new().with_completion(reply));
        let classifier =
            DiscrepancyClassifier::new(gateway.clone(), Arc::new(DefaultPrompts), "analysis-model");

        let request = RunRequest::new("np.sin(t)", 6.283185307179586, 1, 20).expect("request");
        let verification = Verification::EvaluationFailed(EvaluationFailure {
            error_type: EvaluationErrorType::CodeExecutionError,
            error_message: "unknown name 'foo'".to_string(),
        });
        let ctx = AnalysisContext {
            request: &request,
            derivation: "## Step 1",
            artifacts: None,
            verification: &verification,
            threshold: 0.05,
        };

        let c = classifier.classify(&ctx).await.expect("classify");
        assert_eq!(c.error_category, ErrorCategory::DerivationError);
        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.model, "analysis-model");
        assert!(calls[0].1.prompt.contains("unknown name 'foo'"));
    }

    #[tokio::test]
    async fn test_gateway_failure_surfaces() {
        let gateway = Arc::new(ScriptedGateway::new().with_completion_error(GatewayError::Empty));
        let classifier = DiscrepancyClassifier::new(gateway, Arc::new(DefaultPrompts), "m");
        let err = classifier.classify_prompt("p".to_string()).await.unwrap_err();
        assert_eq!(err, ClassifierError::Gateway(GatewayError::Empty));
    }
}
