//! Structured-response extractor.
//!
//! Turns raw model text that should contain one JSON object into a
//! `serde_json::Value`, trying a fixed, ordered list of recovery strategies.
//! The first success wins and every attempt is recorded.
//!
//! 1. `direct_json`: parse as-is
//! 2. `cleaned_json`: strip fences, then fix commas, quotes and raw newlines
//! 3. `codeblock_extraction`: parse the first fenced block (cleaned on failure)
//! 4. `regex_extraction`: balanced-brace candidates, longest first, that carry
//!    an anchor key of the expected shape
//! 5. `ai_repair`: ask the model for corrected JSON (only when configured)

mod cleanup;
pub mod shape;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::gateway::{CompletionRequest, ModelGateway};
use crate::prompts::PromptBuilder;

pub use shape::ResponseShape;

/// Raw text sent for model-assisted repair is truncated to this many chars.
pub const REPAIR_INPUT_LIMIT: usize = 3000;

/// The recovery strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    DirectJson,
    CleanedJson,
    CodeblockExtraction,
    RegexExtraction,
    AiRepair,
}

impl ParseStrategy {
    pub const ORDER: [ParseStrategy; 5] = [
        Self::DirectJson,
        Self::CleanedJson,
        Self::CodeblockExtraction,
        Self::RegexExtraction,
        Self::AiRepair,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectJson => "direct_json",
            Self::CleanedJson => "cleaned_json",
            Self::CodeblockExtraction => "codeblock_extraction",
            Self::RegexExtraction => "regex_extraction",
            Self::AiRepair => "ai_repair",
        }
    }
}

impl std::fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseAttempt {
    pub strategy: ParseStrategy,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// A successfully extracted object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub value: Value,
    pub strategy: ParseStrategy,
    pub attempts: Vec<ParseAttempt>,
    /// Shape violations found after parsing. Not fatal.
    pub warnings: Vec<String>,
}

/// Every strategy failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to parse response after {} attempts: {}", .attempts.len(), summarize(.attempts))]
pub struct ParseError {
    pub attempts: Vec<ParseAttempt>,
}

fn summarize(attempts: &[ParseAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Model-assisted repair backend for strategy 5.
#[derive(Clone)]
pub struct RepairModel {
    pub gateway: Arc<dyn ModelGateway>,
    pub prompts: Arc<dyn PromptBuilder>,
    pub model: String,
    pub max_tokens: u32,
}

/// Ordered-strategy JSON extractor.
#[derive(Clone, Default)]
pub struct Extractor {
    repair: Option<RepairModel>,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("repair_model", &self.repair.as_ref().map(|r| &r.model))
            .finish()
    }
}

impl Extractor {
    /// Extractor without model-assisted repair; never touches the network.
    pub fn new() -> Self {
        Self { repair: None }
    }

    pub fn with_repair(repair: RepairModel) -> Self {
        Self {
            repair: Some(repair),
        }
    }

    pub fn has_repair(&self) -> bool {
        self.repair.is_some()
    }

    /// Run the strategies in order against `raw`.
    pub async fn extract(
        &self,
        raw: &str,
        shape: &ResponseShape,
    ) -> Result<Extraction, ParseError> {
        let mut attempts = Vec::new();

        for strategy in ParseStrategy::ORDER {
            let outcome = match strategy {
                ParseStrategy::DirectJson => parse_object(raw),
                ParseStrategy::CleanedJson => parse_object(&cleanup::clean(raw)),
                ParseStrategy::CodeblockExtraction => from_codeblock(raw),
                ParseStrategy::RegexExtraction => from_candidates(raw, shape),
                ParseStrategy::AiRepair => match &self.repair {
                    Some(repair) => repair_with_model(repair, raw).await,
                    None => continue,
                },
            };

            match outcome {
                Ok(mut value) => {
                    attempts.push(ParseAttempt {
                        strategy,
                        success: true,
                        error: String::new(),
                    });
                    let warnings = shape.conform(&mut value);
                    if !warnings.is_empty() {
                        warn!(shape = shape.name, ?warnings, "response shape warnings");
                    }
                    info!(shape = shape.name, strategy = %strategy, "parsed model response");
                    return Ok(Extraction {
                        value,
                        strategy,
                        attempts,
                        warnings,
                    });
                }
                Err(error) => {
                    debug!(strategy = %strategy, %error, "parse attempt failed");
                    attempts.push(ParseAttempt {
                        strategy,
                        success: false,
                        error,
                    });
                }
            }
        }

        Err(ParseError { attempts })
    }
}

fn parse_object(text: &str) -> Result<Value, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if value.is_object() {
        Ok(value)
    } else {
        Err("parsed value is not a JSON object".to_string())
    }
}

fn from_codeblock(raw: &str) -> Result<Value, String> {
    let block = cleanup::fenced_block(raw).ok_or_else(|| "no code block found".to_string())?;
    parse_object(&block).or_else(|_| parse_object(&cleanup::clean(&block)))
}

fn from_candidates(raw: &str, shape: &ResponseShape) -> Result<Value, String> {
    for candidate in cleanup::balanced_objects(raw) {
        let parsed = parse_object(candidate)
            .or_else(|_| parse_object(&cleanup::repair_json(candidate)));
        if let Ok(value) = parsed {
            if shape.anchors_match(&value) {
                return Ok(value);
            }
        }
    }
    Err("no JSON object with the expected keys found".to_string())
}

async fn repair_with_model(repair: &RepairModel, raw: &str) -> Result<Value, String> {
    let truncated: String = raw.chars().take(REPAIR_INPUT_LIMIT).collect();
    let request = CompletionRequest::new(&repair.model, repair.prompts.json_repair(&truncated))
        .with_max_tokens(repair.max_tokens)
        .with_temperature(0.0);
    let reply = repair
        .gateway
        .complete(request)
        .await
        .map_err(|e| format!("model-assisted repair failed: {e}"))?;
    parse_object(&cleanup::clean(&reply))
}
